//! Pipeline configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/hsi.toml` by default)
//! 2. environment variables prefixed with `HSI_`, with `__` between nesting
//!    levels, e.g. `HSI_WORKER__HARD_LIMIT=20`
//!
//! Every section and field has a default, so an empty or missing file yields
//! a usable configuration.
//!
//! # Example
//! ```no_run
//! use hsi_capture::config::PipelineConfig;
//!
//! let config = PipelineConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), hsi_core::HsiError>(())
//! ```

use crate::acquisition::AcquisitionConfig;
use crate::worker::WorkerConfig;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use hsi_core::{HsiError, HsiResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/hsi.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "HSI_";

pub(crate) const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_name() -> String {
    "hsi-capture".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl PipelineConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> HsiResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file, with environment overrides on top.
    pub fn load_from<P: AsRef<Path>>(path: P) -> HsiResult<Self> {
        Self::figment(path.as_ref())
            .extract()
            .map_err(|e| HsiError::Configuration(format!("Failed to load configuration: {}", e)))
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check cross-field constraints after loading.
    pub fn validate(&self) -> HsiResult<()> {
        if !LOG_LEVELS.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(HsiError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        self.worker.validate()?;
        self.acquisition.validate()
    }

    /// Render as TOML, e.g. to write out a starting configuration file.
    pub fn to_toml(&self) -> HsiResult<String> {
        toml::to_string_pretty(self).map_err(|e| HsiError::Serialization(e.to_string()))
    }
}
