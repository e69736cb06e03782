//! File configuration
//!
//! `main.toml` holds the scheduler settings and a `[defaults]` table of repair
//! settings. Every other `<keyspace>.toml` in the directory overrides those
//! defaults per table:
//!
//! ```toml
//! [tables.events]
//! repair_interval_seconds = 86400
//! parallelism = "datacenter_aware"
//! unwind_ratio = 0.5
//!
//! [tables.audit_log]
//! enabled = false
//! ```

pub mod manager;
pub use manager::ConfigManager;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::constants::{repair, scheduler};
use crate::errors::ConfigError;
use crate::repair::{RepairConfiguration, RepairParallelism, RepairType, TableReference};
use crate::scheduler::SchedulerSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host_id: Uuid,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_run_interval")]
    pub run_interval_seconds: u64,
    #[serde(default = "default_repair_timeout")]
    pub repair_timeout_seconds: u64,
    #[serde(default = "default_on_demand_retention")]
    pub on_demand_retention_seconds: u64,
    pub history_path: Option<String>,
    #[serde(default)]
    pub defaults: RepairSettings,
    // Populated from the keyspace files
    #[serde(skip)]
    pub keyspaces: HashMap<String, KeyspaceConfigFile>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8095
}

fn default_run_interval() -> u64 {
    scheduler::DEFAULT_RUN_INTERVAL_SECONDS
}

fn default_repair_timeout() -> u64 {
    repair::DEFAULT_REPAIR_TIMEOUT_SECONDS
}

fn default_on_demand_retention() -> u64 {
    scheduler::DEFAULT_ON_DEMAND_RETENTION_SECONDS
}

/// Repair settings as written in the files. Unset values fall back to the
/// `[defaults]` table, then to the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairSettings {
    pub enabled: Option<bool>,
    pub repair_interval_seconds: Option<u64>,
    pub parallelism: Option<String>,
    pub unwind_ratio: Option<f64>,
    pub warning_time_seconds: Option<u64>,
    pub error_time_seconds: Option<u64>,
    pub repair_type: Option<String>,
}

impl RepairSettings {
    /// `self` with every value set in `over` replaced.
    pub fn overlay(&self, over: &RepairSettings) -> RepairSettings {
        RepairSettings {
            enabled: over.enabled.or(self.enabled),
            repair_interval_seconds: over.repair_interval_seconds.or(self.repair_interval_seconds),
            parallelism: over.parallelism.clone().or_else(|| self.parallelism.clone()),
            unwind_ratio: over.unwind_ratio.or(self.unwind_ratio),
            warning_time_seconds: over.warning_time_seconds.or(self.warning_time_seconds),
            error_time_seconds: over.error_time_seconds.or(self.error_time_seconds),
            repair_type: over.repair_type.clone().or_else(|| self.repair_type.clone()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn to_configuration(&self) -> Result<RepairConfiguration, ConfigError> {
        let mut builder = RepairConfiguration::builder();
        if let Some(seconds) = self.repair_interval_seconds {
            builder = builder.with_repair_interval(Duration::from_secs(seconds));
        }
        if let Some(parallelism) = &self.parallelism {
            builder = builder.with_parallelism(parallelism.parse::<RepairParallelism>()?);
        }
        if let Some(ratio) = self.unwind_ratio {
            builder = builder.with_repair_unwind_ratio(ratio);
        }
        if let Some(seconds) = self.warning_time_seconds {
            builder = builder.with_repair_warning_time(Duration::from_secs(seconds));
        }
        if let Some(seconds) = self.error_time_seconds {
            builder = builder.with_repair_error_time(Duration::from_secs(seconds));
        }
        if let Some(repair_type) = &self.repair_type {
            builder = builder.with_repair_type(repair_type.parse::<RepairType>()?);
        }
        builder.build()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyspaceConfigFile {
    #[serde(default)]
    pub tables: HashMap<String, RepairSettings>,
}

/// A table to schedule with the configuration it resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRepairPlan {
    pub table: TableReference,
    pub configuration: RepairConfiguration,
}

impl Config {
    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host_id.is_nil() {
            return Err(ConfigError::MissingRequired {
                field: "host_id".to_string(),
            });
        }
        if self.run_interval_seconds == 0 {
            return Err(ConfigError::invalid(
                "run_interval_seconds",
                "run interval must be positive",
            ));
        }
        if self.repair_timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "repair_timeout_seconds",
                "repair timeout must be positive",
            ));
        }
        self.defaults.to_configuration()?;
        for (keyspace, file) in &self.keyspaces {
            for (table, settings) in &file.tables {
                self.defaults
                    .overlay(settings)
                    .to_configuration()
                    .map_err(|e| match e {
                        ConfigError::InvalidValue { field, reason } => ConfigError::InvalidValue {
                            field: format!("{}.{}.{}", keyspace, table, field),
                            reason,
                        },
                        other => other,
                    })?;
            }
        }
        Ok(())
    }

    pub fn scheduler_settings(&self) -> Result<SchedulerSettings, ConfigError> {
        Ok(SchedulerSettings {
            host_id: self.host_id,
            run_interval: Duration::from_secs(self.run_interval_seconds),
            repair_timeout: Duration::from_secs(self.repair_timeout_seconds),
            on_demand_retention: Duration::from_secs(self.on_demand_retention_seconds),
            default_configuration: self.defaults.to_configuration()?,
        })
    }

    /// Effective settings of one table.
    pub fn settings_for(&self, keyspace: &str, table: &str) -> RepairSettings {
        match self
            .keyspaces
            .get(keyspace)
            .and_then(|file| file.tables.get(table))
        {
            Some(overrides) => self.defaults.overlay(overrides),
            None => self.defaults.clone(),
        }
    }

    /// The plan for `table`, or `None` when repairs of it are disabled.
    pub fn plan_for(&self, table: &TableReference) -> Result<Option<TableRepairPlan>, ConfigError> {
        let settings = self.settings_for(&table.keyspace, &table.table);
        if !settings.is_enabled() {
            return Ok(None);
        }
        Ok(Some(TableRepairPlan {
            table: table.clone(),
            configuration: settings.to_configuration()?,
        }))
    }

    /// `(keyspace, table)` pairs named in keyspace files, sorted.
    pub fn configured_tables(&self) -> Vec<(String, String)> {
        let mut tables: Vec<(String, String)> = self
            .keyspaces
            .iter()
            .flat_map(|(keyspace, file)| {
                file.tables
                    .keys()
                    .map(move |table| (keyspace.clone(), table.clone()))
            })
            .collect();
        tables.sort();
        tables
    }
}
