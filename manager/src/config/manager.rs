use super::{Config, KeyspaceConfigFile, TableRepairPlan};
use crate::errors::ConfigError;
use crate::repair::TableReference;
use anyhow::{anyhow, Result};
use glob::glob;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

pub struct ConfigManager {
    config_dir: String,
    current_config: Arc<Config>,
}

impl ConfigManager {
    pub async fn new(config_dir: String) -> Result<Self> {
        let config = Self::load_configuration(&config_dir).await?;
        Ok(Self {
            config_dir,
            current_config: Arc::new(config),
        })
    }

    pub fn get_current_config(&self) -> Arc<Config> {
        self.current_config.clone()
    }

    pub fn config_dir(&self) -> &str {
        &self.config_dir
    }

    /// Resolve `tables` against the configuration, leaving out disabled ones.
    pub fn plans(&self, tables: &[TableReference]) -> Result<Vec<TableRepairPlan>, ConfigError> {
        let mut plans = Vec::new();
        for table in tables {
            match self.current_config.plan_for(table)? {
                Some(plan) => plans.push(plan),
                None => info!("Repairs of {} are disabled", table),
            }
        }

        let config = &self.current_config;
        for (keyspace, table) in config.configured_tables() {
            if !tables
                .iter()
                .any(|t| t.keyspace == keyspace && t.table == table)
            {
                warn!("Configured table {}.{} does not exist", keyspace, table);
            }
        }
        Ok(plans)
    }

    async fn load_configuration(config_dir: &str) -> Result<Config> {
        let main_config_path = format!("{}/main.toml", config_dir);
        let main_config_content = fs::read_to_string(&main_config_path).await.map_err(|e| {
            ConfigError::LoadFailed {
                path: main_config_path.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut config: Config =
            toml::from_str(&main_config_content).map_err(|e| ConfigError::ParseError {
                reason: format!("{}: {}", main_config_path, e),
            })?;

        let pattern = format!("{}/*.toml", config_dir);
        let mut keyspaces = HashMap::new();

        for entry in glob(&pattern).map_err(|e| anyhow!("Glob pattern error: {}", e))? {
            let path = entry.map_err(|e| anyhow!("Glob entry error: {}", e))?;
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| anyhow!("Invalid filename"))?;

            if filename == "main.toml" {
                continue;
            }

            let keyspace = filename
                .strip_suffix(".toml")
                .ok_or_else(|| anyhow!("Invalid config filename: {}", filename))?;

            debug!("Loading keyspace config: {}", path.display());

            let content = fs::read_to_string(&path)
                .await
                .map_err(|e| ConfigError::LoadFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;

            let keyspace_file: KeyspaceConfigFile =
                toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                    reason: format!("{}: {}", path.display(), e),
                })?;

            keyspaces.insert(keyspace.to_string(), keyspace_file);
        }

        config.keyspaces = keyspaces;
        config.validate()?;

        for warning in config.defaults.to_configuration()?.validation_warnings() {
            warn!("Repair defaults: {}", warning);
        }

        info!(
            "Loaded repair configuration for {} keyspace(s), {} table override(s)",
            config.keyspaces.len(),
            config.configured_tables().len()
        );

        Ok(config)
    }
}
