use serde::Serialize;
use std::collections::BTreeSet;

use super::VnodeRepairStates;
use crate::repair::topology::datacenters;
use crate::repair::{ReplicaSet, TokenRange};

/// Ranges sharing one replica set, repairable with one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaRepairGroup {
    replicas: ReplicaSet,
    ranges: Vec<TokenRange>,
}

impl ReplicaRepairGroup {
    pub fn new(replicas: ReplicaSet, mut ranges: Vec<TokenRange>) -> Self {
        ranges.sort();
        ranges.dedup();
        Self { replicas, ranges }
    }

    pub fn replicas(&self) -> &ReplicaSet {
        &self.replicas
    }

    pub fn ranges(&self) -> &[TokenRange] {
        &self.ranges
    }

    pub fn datacenters(&self) -> BTreeSet<String> {
        datacenters(&self.replicas)
    }

    /// True if the two groups have at least one replica in common.
    pub fn shares_replica_with(&self, other: &ReplicaRepairGroup) -> bool {
        !self.replicas.is_disjoint(&other.replicas)
    }
}

/// Point-in-time repair state of one table. Never mutated once built; every
/// scheduling cycle publishes a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairStateSnapshot {
    last_completed_at: i64,
    created_at: i64,
    vnode_repair_states: VnodeRepairStates,
    replica_repair_groups: Vec<ReplicaRepairGroup>,
}

impl RepairStateSnapshot {
    pub fn builder() -> RepairStateSnapshotBuilder {
        RepairStateSnapshotBuilder::default()
    }

    /// Snapshot derived from `states` at time `now`.
    ///
    /// `last_completed_at` is the oldest repair of any vnode. With no vnodes
    /// there is nothing to repair and it is `now`.
    pub fn from_states(states: VnodeRepairStates, now: i64) -> Self {
        let last_completed_at = states.min_repaired_at().unwrap_or(now);
        let replica_repair_groups = states.group_by_replicas();
        Self {
            last_completed_at,
            created_at: now,
            vnode_repair_states: states,
            replica_repair_groups,
        }
    }

    pub fn last_completed_at(&self) -> i64 {
        self.last_completed_at
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn vnode_repair_states(&self) -> &VnodeRepairStates {
        &self.vnode_repair_states
    }

    pub fn replica_repair_groups(&self) -> &[ReplicaRepairGroup] {
        &self.replica_repair_groups
    }
}

#[derive(Debug, Default)]
pub struct RepairStateSnapshotBuilder {
    last_completed_at: Option<i64>,
    created_at: i64,
    vnode_repair_states: VnodeRepairStates,
    replica_repair_groups: Vec<ReplicaRepairGroup>,
}

impl RepairStateSnapshotBuilder {
    pub fn with_last_completed_at(mut self, last_completed_at: i64) -> Self {
        self.last_completed_at = Some(last_completed_at);
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_vnode_repair_states(mut self, states: VnodeRepairStates) -> Self {
        self.vnode_repair_states = states;
        self
    }

    pub fn with_replica_repair_groups(mut self, groups: Vec<ReplicaRepairGroup>) -> Self {
        self.replica_repair_groups = groups;
        self
    }

    /// Without an explicit `last_completed_at` the minimum over the vnode
    /// states is used.
    pub fn build(self) -> RepairStateSnapshot {
        let last_completed_at = self.last_completed_at.unwrap_or_else(|| {
            self.vnode_repair_states
                .min_repaired_at()
                .unwrap_or(self.created_at)
        });
        RepairStateSnapshot {
            last_completed_at,
            created_at: self.created_at,
            vnode_repair_states: self.vnode_repair_states,
            replica_repair_groups: self.replica_repair_groups,
        }
    }
}
