//! Configuration for the inferscale controller core
//!
//! TOML-backed configuration split by concern: `[model]` tunes the queueing
//! model and SLO handling, `[scrape]` configures the pod metrics source,
//! `[controller]` drives the binary's refresh loop.

mod model;
mod scrape;

pub use model::{ModelConfig, ModelType, SaturationPolicy};
pub use scrape::ScrapeConfig;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable carrying the node label selector consumed by the
/// cluster capacity discoverer; when set it replaces the default GPU-vendor
/// selection.
pub const NODE_SELECTOR_ENV: &str = "WVA_NODE_SELECTOR";

/// Top-level controller configuration.
///
/// ```toml
/// [model]
/// model_type = "MD1K"
///
/// [scrape]
/// service_name = "pool-epp"
/// service_namespace = "inference"
/// metrics_port = 9090
///
/// [controller]
/// refresh_interval_secs = 30
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Queueing-model and SLO knobs
    #[serde(default)]
    pub model: ModelConfig,

    /// Pod metrics scraping
    #[serde(default)]
    pub scrape: ScrapeConfig,

    /// Refresh loop behavior
    #[serde(default)]
    pub controller: LoopConfig,
}

/// Refresh loop settings for the controller binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Seconds between metric refreshes (default: 30)
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

fn default_refresh_interval_secs() -> u64 {
    30
}

impl ControllerConfig {
    /// Load configuration from a TOML file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.scrape.validate()?;
        if self.controller.refresh_interval_secs == 0 {
            return Err(Error::Config(
                "refresh_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Read the optional node label selector from the environment.
pub fn node_selector_from_env() -> Option<String> {
    std::env::var(NODE_SELECTOR_ENV)
        .ok()
        .filter(|v| !v.is_empty())
}
