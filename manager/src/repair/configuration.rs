//! Repair policy parameters for one table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::constants::repair;
use crate::errors::ConfigError;

/// How replicas of a repaired range take part in the repair, and how many
/// groups may run at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairParallelism {
    Parallel,
    Sequential,
    DatacenterAware,
}

impl RepairParallelism {
    /// Value of the `parallelism` repair option understood by the storage service.
    pub fn as_option(&self) -> &'static str {
        match self {
            RepairParallelism::Parallel => "parallel",
            RepairParallelism::Sequential => "sequential",
            RepairParallelism::DatacenterAware => "dc_parallel",
        }
    }
}

impl FromStr for RepairParallelism {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "parallel" => Ok(RepairParallelism::Parallel),
            "sequential" => Ok(RepairParallelism::Sequential),
            "datacenter_aware" | "dc_parallel" => Ok(RepairParallelism::DatacenterAware),
            other => Err(ConfigError::invalid(
                "parallelism",
                format!("unknown parallelism '{}'", other),
            )),
        }
    }
}

impl fmt::Display for RepairParallelism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepairParallelism::Parallel => "PARALLEL",
            RepairParallelism::Sequential => "SEQUENTIAL",
            RepairParallelism::DatacenterAware => "DATACENTER_AWARE",
        };
        f.write_str(name)
    }
}

/// How a replica group is split into repair invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairType {
    /// One invocation per range, unwinding between invocations
    Vnode,
    /// One invocation covering every range of the group
    ParallelVnode,
    /// One invocation per group with incremental repair enabled
    Incremental,
}

impl FromStr for RepairType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vnode" => Ok(RepairType::Vnode),
            "parallel_vnode" => Ok(RepairType::ParallelVnode),
            "incremental" => Ok(RepairType::Incremental),
            other => Err(ConfigError::invalid(
                "repair_type",
                format!("unknown repair type '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairConfiguration {
    pub interval: Duration,
    pub parallelism: RepairParallelism,
    pub unwind_ratio: f64,
    pub warning_time: Duration,
    pub error_time: Duration,
    pub repair_type: RepairType,
}

impl RepairConfiguration {
    pub fn builder() -> RepairConfigurationBuilder {
        RepairConfigurationBuilder::default()
    }

    /// Problems that are accepted but worth surfacing to operators.
    pub fn validation_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.warning_time >= self.error_time {
            warnings.push(format!(
                "warning time ({}s) is not below error time ({}s); status goes straight from ON_TIME to OVERDUE",
                self.warning_time.as_secs(),
                self.error_time.as_secs()
            ));
        }
        warnings
    }

    /// Time to pause after a unit of repair work that took `elapsed`.
    pub fn unwind_delay(&self, elapsed: Duration) -> Duration {
        if !(self.unwind_ratio > 0.0) {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(elapsed.as_secs_f64() * self.unwind_ratio)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RepairConfiguration {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(repair::DEFAULT_INTERVAL_SECONDS),
            parallelism: RepairParallelism::Parallel,
            unwind_ratio: repair::DEFAULT_UNWIND_RATIO,
            warning_time: Duration::from_secs(repair::DEFAULT_WARNING_TIME_SECONDS),
            error_time: Duration::from_secs(repair::DEFAULT_ERROR_TIME_SECONDS),
            repair_type: RepairType::Vnode,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepairConfigurationBuilder {
    interval: Option<Duration>,
    parallelism: Option<RepairParallelism>,
    unwind_ratio: Option<f64>,
    warning_time: Option<Duration>,
    error_time: Option<Duration>,
    repair_type: Option<RepairType>,
}

impl RepairConfigurationBuilder {
    pub fn with_repair_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_parallelism(mut self, parallelism: RepairParallelism) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    pub fn with_repair_unwind_ratio(mut self, ratio: f64) -> Self {
        self.unwind_ratio = Some(ratio);
        self
    }

    pub fn with_repair_warning_time(mut self, warning_time: Duration) -> Self {
        self.warning_time = Some(warning_time);
        self
    }

    pub fn with_repair_error_time(mut self, error_time: Duration) -> Self {
        self.error_time = Some(error_time);
        self
    }

    pub fn with_repair_type(mut self, repair_type: RepairType) -> Self {
        self.repair_type = Some(repair_type);
        self
    }

    pub fn build(self) -> Result<RepairConfiguration, ConfigError> {
        let defaults = RepairConfiguration::default();
        let configuration = RepairConfiguration {
            interval: self.interval.unwrap_or(defaults.interval),
            parallelism: self.parallelism.unwrap_or(defaults.parallelism),
            unwind_ratio: self.unwind_ratio.unwrap_or(defaults.unwind_ratio),
            warning_time: self.warning_time.unwrap_or(defaults.warning_time),
            error_time: self.error_time.unwrap_or(defaults.error_time),
            repair_type: self.repair_type.unwrap_or(defaults.repair_type),
        };

        if configuration.interval.is_zero() {
            return Err(ConfigError::invalid(
                "repair_interval",
                "repair interval must be positive",
            ));
        }
        if !configuration.unwind_ratio.is_finite() || configuration.unwind_ratio < 0.0 {
            return Err(ConfigError::invalid(
                "unwind_ratio",
                format!(
                    "unwind ratio must be a finite value >= 0, got {}",
                    configuration.unwind_ratio
                ),
            ));
        }

        for warning in configuration.validation_warnings() {
            warn!("Accepting repair configuration with {}", warning);
        }

        Ok(configuration)
    }
}
