//! Common test data, message shapes and builders

use repair_manager::repair::token_range::format_range_list;
use repair_manager::repair::{
    DriverNode, Notification, ProgressEventType, RepairStateSnapshot, ReplicaSet, TableReference,
    TokenRange, VnodeRepairState, VnodeRepairStates,
};
use uuid::Uuid;

/// Common keyspace and table names
pub mod tables {
    pub const KEYSPACE: &str = "ks";
    pub const TABLE: &str = "tb";
    pub const OTHER_TABLE: &str = "events";
}

/// Common datacenters
pub mod datacenters {
    pub const DC1: &str = "dc1";
    pub const DC2: &str = "dc2";
}

pub fn table() -> TableReference {
    TableReference::new(Uuid::new_v4(), tables::KEYSPACE, tables::TABLE)
}

pub fn table_named(keyspace: &str, name: &str) -> TableReference {
    TableReference::new(Uuid::new_v4(), keyspace, name)
}

pub fn node(datacenter: &str, address: &str) -> DriverNode {
    DriverNode::new(Uuid::new_v4(), datacenter, address)
}

pub fn replicas(nodes: &[&DriverNode]) -> ReplicaSet {
    nodes.iter().map(|n| (*n).clone()).collect()
}

pub fn range(start: i64, end: i64) -> TokenRange {
    TokenRange::new(start, end)
}

/// The storage service's message for a session that repaired `ranges`.
pub fn repair_message(ranges: &[TokenRange]) -> String {
    format!(
        "Repair session RepairSession for range {} finished",
        format_range_list(ranges)
    )
}

/// The storage service's message for a session that failed.
pub fn failed_repair_message(ranges: &[TokenRange], error: &str) -> String {
    format!(
        "Repair session RepairSession for range {} failed with error {}",
        format_range_list(ranges),
        error
    )
}

pub fn command_message(command: i32, text: &str) -> String {
    format!("Repair command #{} {}", command, text)
}

pub fn progress(message: impl Into<String>, count: i32, total: i32) -> Notification {
    Notification::progress(message, ProgressEventType::Progress, count, total)
}

pub fn finished(ranges: &[TokenRange]) -> Notification {
    Notification::progress(
        repair_message(ranges),
        ProgressEventType::Progress,
        ranges.len() as i32,
        ranges.len() as i32,
    )
}

pub fn failed(ranges: &[TokenRange], error: &str) -> Notification {
    Notification::progress(
        failed_repair_message(ranges, error),
        ProgressEventType::Error,
        0,
        ranges.len() as i32,
    )
}

/// Builder for snapshots with explicit vnode states.
pub struct SnapshotBuilder {
    states: Vec<VnodeRepairState>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self { states: Vec::new() }
    }

    pub fn vnode(mut self, range: TokenRange, replicas: &ReplicaSet, last_repaired_at: i64) -> Self {
        self.states
            .push(VnodeRepairState::new(range, replicas.clone(), last_repaired_at));
        self
    }

    pub fn build(self, now: i64) -> RepairStateSnapshot {
        RepairStateSnapshot::from_states(VnodeRepairStates::from_states(self.states), now)
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}
