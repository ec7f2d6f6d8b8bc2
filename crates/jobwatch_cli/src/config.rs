use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use jobwatch_client::{ClientSettings, JobEndpoints};
use jobwatch_core::JobKind;
use jobwatch_logging::watch_info;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogDestination;

pub const DEFAULT_CONFIG_FILE: &str = "jobwatch.ron";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
    #[error("unknown log level `{0}`")]
    InvalidLevel(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub destination: LogDestination,
    pub level: Option<String>,
}

/// Contents of `jobwatch.ron`. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub log: LogConfig,
    /// Replaces the built-in endpoints for the listed kinds only.
    pub endpoints: BTreeMap<JobKind, JobEndpoints>,
}

impl FileConfig {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config = Self::parse(&content, path)?;
        watch_info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        ron::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn log_level(&self) -> Result<LevelFilter, ConfigError> {
        match self.log.level.as_deref() {
            None => Ok(LevelFilter::Info),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidLevel(raw.to_string())),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        let mut settings = ClientSettings::default();
        if let Some(base_url) = &self.base_url {
            settings.base_url = base_url.clone();
        }
        let millis = Duration::from_millis;
        if let Some(ms) = self.connect_timeout_ms {
            settings.connect_timeout = millis(ms);
        }
        if let Some(ms) = self.request_timeout_ms {
            settings.request_timeout = millis(ms);
        }
        if let Some(ms) = self.poll_interval_ms {
            settings.poll_interval = millis(ms);
        }
        if let Some(ms) = self.heartbeat_interval_ms {
            settings.heartbeat_interval = millis(ms);
        }
        settings.endpoints.extend(
            self.endpoints
                .iter()
                .map(|(kind, endpoints)| (*kind, endpoints.clone())),
        );
        settings
    }
}
