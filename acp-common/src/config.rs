//! Configuration loading and database path resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the engine TOML config file
pub const CONFIG_ENV_VAR: &str = "ACP_BASKETS_CONFIG";

/// Environment variable naming the SQLite database file
pub const DATABASE_ENV_VAR: &str = "ACP_BASKETS_DB";

/// Recomputation engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of reconciliation workers
    pub worker_count: usize,
    /// Attempts per reconciliation before the failure is reported
    pub max_attempts: u32,
    /// First retry delay
    pub initial_backoff_ms: u64,
    /// Retry delay cap
    pub max_backoff_ms: u64,
    /// EventBus buffer size
    pub event_bus_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 1000,
            event_bus_capacity: 1000,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document, missing keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(Error::Config(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }
        if self.event_bus_capacity == 0 {
            return Err(Error::Config("event_bus_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Engine config resolution, in priority order:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. User config file (`~/.config/acp-baskets/config.toml`)
/// 4. Compiled defaults
///
/// An explicitly named file (1 or 2) must exist and parse.
pub fn load_engine_config(cli_arg: Option<&Path>) -> Result<EngineConfig> {
    if let Some(path) = cli_arg {
        return EngineConfig::from_file(path);
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return EngineConfig::from_file(Path::new(&path));
    }

    if let Some(path) = default_config_file() {
        if path.exists() {
            return EngineConfig::from_file(&path);
        }
    }

    Ok(EngineConfig::default())
}

/// Database path resolution: CLI argument, then environment variable, then
/// the OS-dependent data directory
pub fn resolve_database_path(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DATABASE_ENV_VAR) {
        return PathBuf::from(path);
    }

    get_default_data_folder().join("acp.db")
}

fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("acp-baskets").join("config.toml"))
}

fn get_default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("acp-baskets"))
        .unwrap_or_else(|| PathBuf::from("./acp_data"))
}
