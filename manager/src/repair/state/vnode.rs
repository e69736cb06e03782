use serde::{Deserialize, Serialize};

use crate::repair::{ReplicaSet, TokenRange};

/// Repair history of one vnode: a range, who replicates it, and when it was
/// last repaired (epoch millis).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VnodeRepairState {
    range: TokenRange,
    replicas: ReplicaSet,
    last_repaired_at: i64,
}

impl VnodeRepairState {
    /// Timestamp of a vnode with no known repair.
    pub const UNREPAIRED: i64 = 0;

    pub fn new(range: TokenRange, replicas: ReplicaSet, last_repaired_at: i64) -> Self {
        Self {
            range,
            replicas,
            last_repaired_at,
        }
    }

    pub fn unrepaired(range: TokenRange, replicas: ReplicaSet) -> Self {
        Self::new(range, replicas, Self::UNREPAIRED)
    }

    pub fn range(&self) -> &TokenRange {
        &self.range
    }

    pub fn replicas(&self) -> &ReplicaSet {
        &self.replicas
    }

    pub fn last_repaired_at(&self) -> i64 {
        self.last_repaired_at
    }

    /// Same range replicated by the same nodes.
    pub fn is_same_vnode(&self, other: &VnodeRepairState) -> bool {
        self.range == other.range && self.replicas == other.replicas
    }

    /// Copy of this state repaired at `repaired_at`. Never moves backwards.
    pub fn repaired_at(&self, repaired_at: i64) -> Self {
        Self {
            range: self.range,
            replicas: self.replicas.clone(),
            last_repaired_at: self.last_repaired_at.max(repaired_at),
        }
    }
}
