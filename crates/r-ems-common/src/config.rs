//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the notification layer."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_rate() -> Duration {
    Duration::from_millis(1000)
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// What the receive loop does with batch messages it did not process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeftoverPolicy {
    /// Leave them in flight; the transport's visibility timeout decides when
    /// they reappear.
    #[default]
    LeaveInFlight,
    /// Ask the transport to make them visible again right away.
    Release,
}

impl std::str::FromStr for LeftoverPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "leave_in_flight" => Ok(LeftoverPolicy::LeaveInFlight),
            "release" => Ok(LeftoverPolicy::Release),
            other => Err(format!("unknown leftover policy: {}", other)),
        }
    }
}

/// Configuration for a notifications endpoint bound to one queue.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Queue identifier handed to the gateway on every call.
    pub queue: String,
    /// Poll interval of the receive loop, in milliseconds on disk.
    #[serde(default = "default_rate")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub rate: Duration,
    #[serde(default)]
    pub leftover: LeftoverPolicy,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`NotifyConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedNotifyConfig {
    pub config: NotifyConfig,
    pub source: PathBuf,
}

impl NotifyConfig {
    pub const ENV_CONFIG_PATH: &str = "R_EMS_NOTIFY_CONFIG";

    /// Build a configuration for `queue` with every other field defaulted.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            rate: default_rate(),
            leftover: LeftoverPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from disk, respecting the `R_EMS_NOTIFY_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedNotifyConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedNotifyConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedNotifyConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Read and validate a single TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(config_path = %path.display(), "loading notify configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<NotifyConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.queue.trim().is_empty() {
            return Err(anyhow!("queue identifier cannot be empty"));
        }
        if self.rate.is_zero() {
            return Err(anyhow!("poll rate must be greater than zero"));
        }
        Ok(())
    }
}

impl std::str::FromStr for NotifyConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: NotifyConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Directory for a rolling daily log file; stdout only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            directory: None,
            file_prefix: None,
        }
    }
}
