//! Default values for repair scheduling

pub mod repair {
    /// Default time between two full repairs of a table (7 days)
    pub const DEFAULT_INTERVAL_SECONDS: u64 = 7 * 24 * 3600;

    /// A table is LATE once it has gone this long past its interval (8 days)
    pub const DEFAULT_WARNING_TIME_SECONDS: u64 = 8 * 24 * 3600;

    /// A table is OVERDUE once it has gone this long past its interval (10 days)
    pub const DEFAULT_ERROR_TIME_SECONDS: u64 = 10 * 24 * 3600;

    pub const DEFAULT_UNWIND_RATIO: f64 = 0.0;

    /// Hard deadline for a single repair invocation (3 hours)
    pub const DEFAULT_REPAIR_TIMEOUT_SECONDS: u64 = 3 * 3600;
}

pub mod scheduler {
    /// How often the scheduler re-evaluates every job
    pub const DEFAULT_RUN_INTERVAL_SECONDS: u64 = 30;

    /// How long a completed on-demand repair stays listed (1 day)
    pub const DEFAULT_ON_DEMAND_RETENTION_SECONDS: u64 = 24 * 3600;
}

pub mod notification {
    pub const DATA_TYPE: &str = "type";
    pub const DATA_PROGRESS_COUNT: &str = "progressCount";
    pub const DATA_TOTAL: &str = "total";

    pub const FINISHED_MARKER: &str = "finished";
    pub const FAILED_MARKER: &str = "failed with error";
}

pub mod options {
    pub const PARALLELISM: &str = "parallelism";
    pub const PRIMARY_RANGE: &str = "primaryRange";
    pub const INCREMENTAL: &str = "incremental";
    pub const RANGES: &str = "ranges";
    pub const COLUMN_FAMILIES: &str = "columnFamilies";
    pub const HOSTS: &str = "hosts";
}
