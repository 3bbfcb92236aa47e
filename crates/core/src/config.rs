use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chart_spec::ChartOptions;
use crate::reconnect_policy::{ReconnectPolicy, DEFAULT_MAX_RECONNECT_ATTEMPTS};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const ENDPOINT_ENV: &str = "NLSQL_WEBSOCKET_URL";
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/agent";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: String,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub display_precision: u32,
    pub database_options: Vec<String>,
    pub llm_options: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect_delay_ms: 3_000,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            display_precision: 2,
            database_options: vec!["inventory_vega".to_string(), "sakila".to_string()],
            llm_options: vec!["gpt_oss".to_string(), "aws".to_string()],
        }
    }
}

impl ClientConfig {
    pub fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        Self::load_from_path(dir.join(CONFIG_FILE_NAME))
    }

    /// Missing or blank files yield the defaults.
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn persist(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent_dir) = path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| ConfigError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered =
            toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })?;
        fs::write(path, rendered).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `NLSQL_WEBSOCKET_URL` through `lookup` so callers can pass
    /// `std::env::var` or a fixed map.
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|value| !value.trim().is_empty()) {
            self.endpoint = endpoint.trim().to_string();
        }
        self
    }

    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.reconnect_delay_ms),
            self.max_reconnect_attempts,
        )
    }

    #[must_use]
    pub fn chart_options(&self) -> ChartOptions {
        ChartOptions {
            display_precision: self.display_precision,
        }
    }
}
