//! Repair state tracking and execution.
//!
//! - [`TokenRange`]: `(start, end]` intervals on the token ring.
//! - [`VnodeRepairStates`]: when each owned range was last repaired, merged
//!   against current topology.
//! - [`RepairStateSnapshot`]: immutable per-cycle view with replica groups.
//! - [`RepairConfiguration`]: interval, parallelism, unwind ratio, thresholds.
//! - [`RepairTask`]: one repair invocation driven to completion by
//!   notifications from the management interface.

pub mod configuration;
pub mod proxy;
pub mod state;
pub mod task;
pub mod token_range;
pub mod topology;

pub use configuration::{RepairConfiguration, RepairConfigurationBuilder, RepairParallelism, RepairType};
pub use proxy::{Notification, NotificationListener, ProgressEventType, RepairProxy};
pub use state::{
    RepairStateSnapshot, ReplicaRepairGroup, VnodeRepairState, VnodeRepairStates,
};
pub use task::{RepairTask, RepairTaskState, RepairedRanges};
pub use token_range::TokenRange;
pub use topology::{DriverNode, ReplicaSet, ReplicationState, TableReference};
