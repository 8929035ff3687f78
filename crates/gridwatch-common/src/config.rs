//! ---
//! gw_section: "01-core-functionality"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Shared primitives for the acquisition service."
//! gw_version: "v0.1.0"
//! gw_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_ingestion_lag() -> Duration {
    Duration::from_secs(5)
}

fn default_window_width() -> Duration {
    Duration::from_millis(500)
}

fn default_topology_path() -> PathBuf {
    PathBuf::from("configs/topology.toml")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the GridWatch daemon.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "GRIDWATCH_CONFIG";

    /// Load configuration from disk, respecting the `GRIDWATCH_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
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

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.acquisition.validate()
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Tunables for the polling cycle and historian batching.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Path to the PMU topology document.
    #[serde(default = "default_topology_path")]
    pub topology_path: PathBuf,
    /// Fixed polling cadence.
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
    /// Maximum historian point ids per request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Per-batch wall-clock deadline.
    #[serde(default = "default_batch_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub batch_timeout: Duration,
    /// How far behind "now" the query window is anchored, absorbing
    /// ingestion latency at the historian.
    #[serde(default = "default_ingestion_lag")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub ingestion_lag: Duration,
    /// Width of the point-in-time query window.
    #[serde(default = "default_window_width")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub window_width: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            topology_path: default_topology_path(),
            poll_interval: default_poll_interval(),
            batch_size: default_batch_size(),
            batch_timeout: default_batch_timeout(),
            ingestion_lag: default_ingestion_lag(),
            window_width: default_window_width(),
        }
    }
}

impl AcquisitionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(anyhow!("acquisition poll_interval must be non-zero"));
        }
        if self.batch_size == 0 {
            return Err(anyhow!("acquisition batch_size must be at least 1"));
        }
        if self.batch_timeout.is_zero() {
            return Err(anyhow!("acquisition batch_timeout must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
