//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::storage::WalSyncMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sampler: SamplerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Event store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Keep a commit log under `data_dir`; false runs fully in memory
    #[serde(default = "default_persist")]
    pub persist: bool,

    #[serde(default)]
    pub sync_mode: WalSyncMode,

    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_ms: u64,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("timeflow").to_string_lossy().to_string())
        .unwrap_or_else(|| "./timeflow_data".to_string())
}

fn default_persist() -> bool {
    true
}

fn default_broadcast_capacity() -> usize {
    1024
}

fn default_reconnect_backoff() -> u64 {
    100
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            persist: default_persist(),
            sync_mode: WalSyncMode::default(),
            broadcast_capacity: default_broadcast_capacity(),
            reconnect_backoff_ms: default_reconnect_backoff(),
        }
    }
}

impl From<&StorageConfig> for crate::storage::StorageConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.persist.then(|| PathBuf::from(&config.data_dir)),
            wal_sync: config.sync_mode,
            broadcast_capacity: config.broadcast_capacity.max(1),
            reconnect_backoff: Duration::from_millis(config.reconnect_backoff_ms),
        }
    }
}

/// Sampler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SamplerConfig {
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
}

fn default_flush_interval() -> u64 {
    1000
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval(),
        }
    }
}

impl From<&SamplerConfig> for crate::sampler::SamplerConfig {
    fn from(config: &SamplerConfig) -> Self {
        Self {
            flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("timeflow").join("config.toml")),
            Some(PathBuf::from("/etc/timeflow/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `TIMEFLOW_*` overrides looked up through `var`
    ///
    /// Values that fail to parse are ignored with a warning.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Storage overrides
        if let Some(data_dir) = var("TIMEFLOW_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }
        if let Some(persist) = var("TIMEFLOW_PERSIST") {
            match persist.parse() {
                Ok(p) => self.storage.persist = p,
                Err(_) => tracing::warn!("Ignoring TIMEFLOW_PERSIST={:?}", persist),
            }
        }

        // Sampler overrides
        if let Some(interval) = var("TIMEFLOW_FLUSH_INTERVAL_MS") {
            match interval.parse() {
                Ok(ms) => self.sampler.flush_interval_ms = ms,
                Err(_) => tracing::warn!("Ignoring TIMEFLOW_FLUSH_INTERVAL_MS={:?}", interval),
            }
        }

        // Logging overrides
        if let Some(level) = var("TIMEFLOW_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("TIMEFLOW_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Timeflow Configuration
#
# Environment variables override these settings:
# - TIMEFLOW_DATA_DIR
# - TIMEFLOW_PERSIST
# - TIMEFLOW_FLUSH_INTERVAL_MS
# - TIMEFLOW_LOG_LEVEL
# - TIMEFLOW_LOG_FORMAT

[storage]
# Directory for the commit log
data_dir = "~/.local/share/timeflow"

# Keep a commit log; false runs fully in memory
persist = true

# Commit log sync: every_write, batched or none
sync_mode = "batched"

# Live updates buffered per subscriber before it must reconnect
broadcast_capacity = 1024

# Pause before a broken subscription reconnects (ms)
reconnect_backoff_ms = 100

[sampler]
# How often aggregated samples are written to the store (ms)
flush_interval_ms = 1000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
