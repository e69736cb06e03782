pub mod clock;
pub mod config;
pub mod constants;
pub mod errors;
pub mod history;
pub mod repair;
pub mod scheduler;
pub mod telemetry;
pub mod views;
pub mod web;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigManager, RepairSettings, TableRepairPlan};
pub use errors::{ConfigError, ProxyError, RepairFailureCause, RepairTaskError};
pub use history::{InMemoryRepairHistory, RepairHistory, SqliteRepairHistory};
pub use repair::{
    DriverNode, Notification, NotificationListener, ProgressEventType, RepairConfiguration,
    RepairParallelism, RepairProxy, RepairStateSnapshot, RepairTask, RepairTaskState,
    RepairType, ReplicaRepairGroup, ReplicaSet, ReplicationState, TableReference, TokenRange,
    VnodeRepairState, VnodeRepairStates,
};
pub use scheduler::{RepairScheduler, ScheduleStatus, SchedulerSettings};
pub use views::{
    NodeLiveness, OnDemandRepairJobView, OnDemandStatus, ScheduledRepairJobView, TableRepairMetrics,
};
