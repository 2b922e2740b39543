//! Pod-scraping source configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a [`PodScrapingSource`](crate::collector::PodScrapingSource).
///
/// `service_name` and `service_namespace` are required; everything else has a
/// working default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Service whose selector identifies the pods to scrape (required)
    #[serde(default)]
    pub service_name: String,

    /// Namespace of the service; pod matching is restricted to it (required)
    #[serde(default)]
    pub service_namespace: String,

    /// Port serving the metrics endpoint on each pod (required)
    #[serde(default)]
    pub metrics_port: u16,

    /// Path of the metrics endpoint (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// URL scheme for scrapes: http or https (default: http)
    #[serde(default = "default_metrics_scheme")]
    pub metrics_scheme: String,

    /// Explicit bearer token; takes precedence over the reader secret
    #[serde(default)]
    pub bearer_token: String,

    /// Secret holding the metrics-reader token; auth is skipped when unset or
    /// the secret is missing
    #[serde(default)]
    pub metrics_reader_secret_name: String,

    /// Key within the reader secret (default: token)
    #[serde(default = "default_secret_key")]
    pub metrics_reader_secret_key: String,

    /// Per-pod scrape timeout in seconds (default: 5)
    #[serde(default = "default_scrape_timeout_secs")]
    pub scrape_timeout_secs: u64,

    /// Maximum concurrent pod scrapes per refresh (default: 10)
    #[serde(default = "default_max_concurrent_scrapes")]
    pub max_concurrent_scrapes: usize,

    /// TTL for cached metric results in seconds (default: 30)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            service_namespace: String::new(),
            metrics_port: 0,
            metrics_path: default_metrics_path(),
            metrics_scheme: default_metrics_scheme(),
            bearer_token: String::new(),
            metrics_reader_secret_name: String::new(),
            metrics_reader_secret_key: default_secret_key(),
            scrape_timeout_secs: default_scrape_timeout_secs(),
            max_concurrent_scrapes: default_max_concurrent_scrapes(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_metrics_scheme() -> String {
    "http".to_string()
}

fn default_secret_key() -> String {
    "token".to_string()
}

fn default_scrape_timeout_secs() -> u64 {
    5
}

fn default_max_concurrent_scrapes() -> usize {
    10
}

fn default_ttl_secs() -> u64 {
    30
}

impl ScrapeConfig {
    /// Validate the scrape configuration.
    pub fn validate(&self) -> Result<()> {
        if self.service_name.is_empty() {
            return Err(Error::Config("service_name is required".into()));
        }
        if self.service_namespace.is_empty() {
            return Err(Error::Config("service_namespace is required".into()));
        }
        if self.metrics_port == 0 {
            return Err(Error::Config("metrics_port must be positive".into()));
        }
        if self.metrics_scheme != "http" && self.metrics_scheme != "https" {
            return Err(Error::Config(format!(
                "metrics_scheme ('{}') must be http or https",
                self.metrics_scheme
            )));
        }
        if self.max_concurrent_scrapes == 0 {
            return Err(Error::Config(
                "max_concurrent_scrapes must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Per-pod scrape timeout.
    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }

    /// TTL applied to cached metric results.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}
