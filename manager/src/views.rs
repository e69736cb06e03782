//! Read-only projections of repair jobs for monitoring.
//!
//! Views are computed on every read from the job's latest snapshot and hold
//! no state of their own.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::repair::{RepairConfiguration, RepairStateSnapshot, RepairType, TableReference};
use crate::scheduler::ScheduleStatus;

/// Marks an on-demand job that has not completed.
pub const NEVER_COMPLETED: i64 = -1;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledRepairJobView {
    pub id: Uuid,
    pub table: TableReference,
    pub configuration: RepairConfiguration,
    pub state_snapshot: Arc<RepairStateSnapshot>,
    pub status: ScheduleStatus,
    pub progress: f64,
    pub next_repair_at: i64,
    pub repair_type: RepairType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnDemandStatus {
    InQueue,
    Running,
    Completed,
}

impl fmt::Display for OnDemandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OnDemandStatus::InQueue => "IN_QUEUE",
            OnDemandStatus::Running => "RUNNING",
            OnDemandStatus::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnDemandRepairJobView {
    pub id: Uuid,
    pub host_id: Uuid,
    pub table: TableReference,
    pub status: OnDemandStatus,
    pub progress: f64,
    /// Epoch millis, or [`NEVER_COMPLETED`].
    pub completed_at: i64,
    pub repair_type: RepairType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// What the node itself reports about a scheduled table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRepairMetrics {
    pub table: TableReference,
    pub live_disk_space_used: u64,
    pub max_repaired_at: i64,
    pub percent_repaired: f64,
    /// Oldest vnode repair according to this node's own state.
    pub last_completed_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLiveness {
    pub live: Vec<String>,
    pub unreachable: Vec<String>,
}

impl OnDemandRepairJobView {
    pub fn is_completed(&self) -> bool {
        self.status == OnDemandStatus::Completed
    }
}
