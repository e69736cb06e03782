//! Per-vnode repair history and the snapshots built from it.

mod snapshot;
mod vnode;
mod vnodes;

pub use snapshot::{RepairStateSnapshot, RepairStateSnapshotBuilder, ReplicaRepairGroup};
pub use vnode::VnodeRepairState;
pub use vnodes::{VnodeRepairStates, VnodeRepairStatesBuilder};
