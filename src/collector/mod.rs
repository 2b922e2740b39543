//! Metrics collection — pod discovery, scraping, caching, registries
//!
//! The collector observes serving replicas: [`PodScrapingSource`] discovers
//! the Ready pods behind a named service, scrapes their Prometheus metrics
//! endpoints concurrently, and aggregates per-pod samples into one
//! [`MetricResult`] per metric, cached with a TTL. [`SourceRegistry`] and
//! [`QueryRegistry`] wire sources and their expected metrics together at
//! controller startup.

pub mod cache;
pub mod cluster;
pub mod pod_source;
pub mod prometheus;
pub mod registration;
pub mod registry;
pub mod types;

pub use cache::{CacheEntry, MetricCache};
pub use cluster::{ClusterClient, ClusterError, ClusterPod, ClusterSecret, ClusterService, FakeClusterClient};
pub use pod_source::PodScrapingSource;
pub use registry::{MetricSource, QueryRegistry, SourceRegistry};
pub use types::{
    build_cache_key, parse_cache_key, MetricResult, MetricValue, QueryTemplate, QueryType,
    RefreshSpec, NAME_LABEL, POD_LABEL,
};

#[cfg(feature = "kube")]
pub use cluster::KubeClusterClient;
