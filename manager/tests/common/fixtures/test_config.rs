//! Test configuration builder for writing config directories

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const TEST_HOST_ID: &str = "6ba7b810-9dad-11d1-80b4-00c04fd430c8";

/// Builder for a temporary configuration directory
pub struct TestConfigBuilder {
    temp_dir: TempDir,
    main_config: MainConfigBuilder,
    keyspaces: BTreeMap<String, KeyspaceConfigBuilder>,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self {
            temp_dir,
            main_config: MainConfigBuilder::default(),
            keyspaces: BTreeMap::new(),
        }
    }

    /// Configure main settings
    pub fn with_main_config<F>(mut self, f: F) -> Self
    where
        F: FnOnce(MainConfigBuilder) -> MainConfigBuilder,
    {
        self.main_config = f(self.main_config);
        self
    }

    /// Add a keyspace file
    pub fn with_keyspace<F>(mut self, keyspace: &str, f: F) -> Self
    where
        F: FnOnce(KeyspaceConfigBuilder) -> KeyspaceConfigBuilder,
    {
        let builder = f(KeyspaceConfigBuilder::default());
        self.keyspaces.insert(keyspace.to_string(), builder);
        self
    }

    /// Write the config files to the temp directory
    pub fn build(self) -> TestConfig {
        let config_dir = self.temp_dir.path().join("config");
        fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        fs::write(config_dir.join("main.toml"), self.main_config.to_toml())
            .expect("Failed to write main.toml");

        for (keyspace, builder) in self.keyspaces {
            fs::write(
                config_dir.join(format!("{}.toml", keyspace)),
                builder.to_toml(),
            )
            .expect("Failed to write keyspace config");
        }

        TestConfig {
            _temp_dir: self.temp_dir,
            config_dir,
        }
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Main configuration builder
#[derive(Clone)]
pub struct MainConfigBuilder {
    host_id: String,
    run_interval_seconds: u64,
    repair_timeout_seconds: u64,
    history_path: Option<String>,
    defaults: Vec<(String, String)>,
}

impl MainConfigBuilder {
    pub fn run_interval(mut self, seconds: u64) -> Self {
        self.run_interval_seconds = seconds;
        self
    }

    pub fn repair_timeout(mut self, seconds: u64) -> Self {
        self.repair_timeout_seconds = seconds;
        self
    }

    pub fn history_path(mut self, path: &str) -> Self {
        self.history_path = Some(path.to_string());
        self
    }

    /// Raw `key = value` line for the `[defaults]` table
    pub fn default_setting(mut self, key: &str, value: &str) -> Self {
        self.defaults.push((key.to_string(), value.to_string()));
        self
    }

    fn to_toml(&self) -> String {
        let mut toml = format!(
            r#"
host_id = "{}"
run_interval_seconds = {}
repair_timeout_seconds = {}
"#,
            self.host_id, self.run_interval_seconds, self.repair_timeout_seconds
        );
        if let Some(path) = &self.history_path {
            toml.push_str(&format!("history_path = \"{}\"\n", path));
        }
        if !self.defaults.is_empty() {
            toml.push_str("\n[defaults]\n");
            for (key, value) in &self.defaults {
                toml.push_str(&format!("{} = {}\n", key, value));
            }
        }
        toml
    }
}

impl Default for MainConfigBuilder {
    fn default() -> Self {
        Self {
            host_id: TEST_HOST_ID.to_string(),
            run_interval_seconds: 30,
            repair_timeout_seconds: 3600,
            history_path: None,
            defaults: Vec::new(),
        }
    }
}

/// Keyspace file builder
#[derive(Clone, Default)]
pub struct KeyspaceConfigBuilder {
    tables: BTreeMap<String, Vec<(String, String)>>,
}

impl KeyspaceConfigBuilder {
    /// Raw `key = value` line for `[tables.<table>]`
    pub fn table_setting(mut self, table: &str, key: &str, value: &str) -> Self {
        self.tables
            .entry(table.to_string())
            .or_default()
            .push((key.to_string(), value.to_string()));
        self
    }

    fn to_toml(&self) -> String {
        let mut toml = String::new();
        for (table, settings) in &self.tables {
            toml.push_str(&format!("\n[tables.{}]\n", table));
            for (key, value) in settings {
                toml.push_str(&format!("{} = {}\n", key, value));
            }
        }
        toml
    }
}

/// Built test configuration with temp directory
pub struct TestConfig {
    _temp_dir: TempDir,
    pub config_dir: PathBuf,
}

impl TestConfig {
    pub fn config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    pub fn config_dir_string(&self) -> String {
        self.config_dir.display().to_string()
    }
}
