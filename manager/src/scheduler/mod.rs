//! Periodic repair scheduling
//!
//! Every tick the scheduler:
//! - rebuilds each table's repair state from topology and stored history
//! - evaluates what is due with [`policy::evaluate`]
//! - runs due replica groups under [`ReplicaLocks`], never two groups with a
//!   common replica at once
//! - publishes the results as new snapshots and writes them to history
//!
//! Ticks come from a repeated `tokio-cron-scheduler` job; a tick that fires
//! while the previous cycle is still running is skipped.

pub mod dispatch;
pub mod jobs;
pub mod operations;
pub mod policy;

pub use dispatch::{ActiveLock, DispatchConstraint, DispatchRejection, ReplicaLease, ReplicaLocks};
pub use jobs::{OnDemandRepairJob, ScheduledRepairJob};
pub use operations::{CycleSummary, RepairScheduler, SchedulerSettings};
pub use policy::{RepairPlan, ScheduleStatus};
