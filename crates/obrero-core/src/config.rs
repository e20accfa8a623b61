use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("config validation error: {message}")]
    Validation { message: String },
}

/// Worker service configuration.
///
/// `shared_db_path` is the SQLite file producers write workflow rows into;
/// `worker_db_path` receives the worker's own run records. The two paths
/// may coincide: each store only creates its own tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    pub shared_db_path: PathBuf,
    pub worker_db_path: PathBuf,
    pub poll_interval_seconds: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            shared_db_path: PathBuf::from("database.db"),
            worker_db_path: PathBuf::from("data/worker_workflows.db"),
            poll_interval_seconds: 10.0,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.poll_interval_seconds.is_finite() || self.poll_interval_seconds <= 0.0 {
            return Err(ConfigError::Validation {
                message: format!(
                    "poll_interval_seconds must be a finite number > 0, got {}",
                    self.poll_interval_seconds
                ),
            });
        }

        if self.shared_db_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                message: "shared_db_path must not be empty".to_string(),
            });
        }

        if self.worker_db_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                message: "worker_db_path must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

/// Load and validate a `WorkerConfig` from a TOML file path.
///
/// Returns the default config if the file does not exist.
pub fn load_config(path: &Path) -> Result<WorkerConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(WorkerConfig::default());
    }

    let data = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_config(&data)
}

/// Parse and validate a `WorkerConfig` from a TOML string.
pub fn parse_config(data: &str) -> Result<WorkerConfig, ConfigError> {
    let config: WorkerConfig = toml::from_str(data)?;
    config.validate()?;
    Ok(config)
}
