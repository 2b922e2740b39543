//! Pod scraping source
//!
//! Discovers the Ready pods behind a named service, scrapes their
//! `/metrics` endpoints concurrently, parses the Prometheus text exposition,
//! aggregates per-pod samples into one result per metric, and caches the
//! results with a TTL.
//!
//! Failure model: infrastructure steps (service fetch, pod listing,
//! non-not-found secret reads) fail the whole refresh with a discovery
//! error; per-pod HTTP and parse failures are logged and the pod simply
//! contributes no values.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::cache::{CacheEntry, MetricCache};
use super::cluster::{ClusterClient, ClusterError, ClusterPod};
use super::prometheus;
use super::registry::{MetricSource, QueryRegistry};
use super::types::{
    build_cache_key, MetricResult, MetricValue, RefreshSpec, NAME_LABEL, POD_LABEL,
};
use crate::config::ScrapeConfig;
use crate::error::{Error, Result};

/// Per-pod scrape failure; absorbed by the refresh, surfaced only in logs.
#[derive(Debug, thiserror::Error)]
enum ScrapeError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("parse failed: {0}")]
    Parse(#[from] prometheus::ParseError),
}

/// Metrics source that scrapes the pods behind one service.
pub struct PodScrapingSource {
    config: ScrapeConfig,
    cluster: Arc<dyn ClusterClient>,
    http: reqwest::Client,
    cache: MetricCache,
    queries: Arc<QueryRegistry>,
}

impl std::fmt::Debug for PodScrapingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodScrapingSource")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl PodScrapingSource {
    /// Create a source. Fails with a configuration error when the service
    /// coordinates are missing or malformed.
    pub fn new(cluster: Arc<dyn ClusterClient>, config: ScrapeConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.scrape_timeout())
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            config,
            cluster,
            http,
            cache: MetricCache::new(),
            queries: Arc::new(QueryRegistry::new()),
        })
    }

    /// The source configuration.
    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Direct cache access, for the host reconciler's bookkeeping.
    pub fn cache(&self) -> &MetricCache {
        &self.cache
    }

    /// Fetch the service and list its Ready pods.
    ///
    /// A nil/empty selector (headless or selector-less service) yields an
    /// empty pod list and is not an error. Matching is restricted to the
    /// service's own namespace.
    async fn discover_pods(&self) -> Result<Vec<ClusterPod>> {
        let ns = &self.config.service_namespace;
        let name = &self.config.service_name;

        let service = self.cluster.get_service(ns, name).await.map_err(|e| {
            Error::Discovery(match e {
                ClusterError::NotFound => format!("failed to get service {ns}/{name}: not found"),
                ClusterError::Api(msg) => format!("failed to get service {ns}/{name}: {msg}"),
            })
        })?;

        if service.selector.is_empty() {
            tracing::debug!(
                service = %name,
                namespace = %ns,
                "service has no selector, nothing to scrape"
            );
            return Ok(Vec::new());
        }

        let pods = self
            .cluster
            .list_pods(ns, &service.selector)
            .await
            .map_err(|e| Error::Discovery(format!("failed to list pods for {ns}/{name}: {e}")))?;

        Ok(pods
            .into_iter()
            .filter(|p| p.ready && !p.ip.is_empty())
            .collect())
    }

    /// Resolve the bearer token: explicit token first, then the reader
    /// secret. A missing secret or key means scraping proceeds without auth;
    /// other secret-read failures propagate.
    async fn auth_token(&self) -> Result<Option<String>> {
        if !self.config.bearer_token.is_empty() {
            return Ok(Some(self.config.bearer_token.clone()));
        }
        if self.config.metrics_reader_secret_name.is_empty() {
            return Ok(None);
        }

        let ns = &self.config.service_namespace;
        let secret_name = &self.config.metrics_reader_secret_name;
        match self.cluster.get_secret(ns, secret_name).await {
            Ok(secret) => match secret.data.get(&self.config.metrics_reader_secret_key) {
                Some(bytes) => Ok(Some(String::from_utf8_lossy(bytes).into_owned())),
                None => {
                    tracing::debug!(
                        secret = %secret_name,
                        key = %self.config.metrics_reader_secret_key,
                        "token key missing from reader secret, scraping without auth"
                    );
                    Ok(None)
                }
            },
            Err(ClusterError::NotFound) => {
                tracing::debug!(
                    secret = %secret_name,
                    "metrics reader secret not found, scraping without auth"
                );
                Ok(None)
            }
            Err(ClusterError::Api(msg)) => Err(Error::Discovery(format!(
                "failed to read secret {ns}/{secret_name}: {msg}"
            ))),
        }
    }

    fn pod_url(&self, pod_ip: &str) -> String {
        format!(
            "{}://{}:{}{}",
            self.config.metrics_scheme, pod_ip, self.config.metrics_port, self.config.metrics_path
        )
    }

    /// Which metric names survive filtering: the registered names, optionally
    /// narrowed by an explicit refresh spec. An empty registry keeps
    /// everything.
    fn allowed_names(&self, spec: &RefreshSpec) -> Option<HashSet<String>> {
        if !spec.queries.is_empty() {
            return Some(spec.queries.iter().cloned().collect());
        }
        if self.queries.is_empty() {
            return None;
        }
        Some(self.queries.names().into_iter().collect())
    }
}

/// GET one pod's metrics endpoint and parse the body into labelled samples.
async fn scrape_pod(
    http: reqwest::Client,
    url: String,
    pod_name: String,
    token: Option<String>,
) -> (String, std::result::Result<Vec<MetricValue>, ScrapeError>) {
    let result = async {
        let mut request = http.get(&url);
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ScrapeError::Status(response.status().as_u16()));
        }
        let body = response.text().await?;
        let samples = prometheus::parse_text(&body)?;

        let now = SystemTime::now();
        Ok(samples
            .into_iter()
            .map(|sample| {
                let mut labels = sample.labels;
                labels.insert(POD_LABEL.to_string(), pod_name.clone());
                labels.insert(NAME_LABEL.to_string(), sample.name);
                MetricValue {
                    value: sample.value,
                    timestamp: now,
                    labels,
                }
            })
            .collect())
    }
    .await;
    (pod_name, result)
}

#[async_trait]
impl MetricSource for PodScrapingSource {
    async fn refresh(
        &self,
        cancel: &CancellationToken,
        spec: RefreshSpec,
    ) -> Result<HashMap<String, MetricResult>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let pods = self.discover_pods().await?;
        if pods.is_empty() {
            return Ok(HashMap::new());
        }
        let token = self.auth_token().await?;

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_scrapes));
        let mut tasks = JoinSet::new();
        for pod in &pods {
            let semaphore = Arc::clone(&semaphore);
            let http = self.http.clone();
            let url = self.pod_url(&pod.ip);
            let pod_name = pod.name.clone();
            let token = token.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                scrape_pod(http, url, pod_name, token).await
            });
        }

        let mut samples: Vec<MetricValue> = Vec::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(Error::Cancelled);
                }
                next = tasks.join_next() => match next {
                    None => break,
                    Some(Ok((_, Ok(values)))) => samples.extend(values),
                    Some(Ok((pod, Err(e)))) => {
                        tracing::warn!(pod = %pod, error = %e, "pod scrape failed, skipping");
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "scrape task failed, skipping");
                    }
                },
            }
        }

        // Filter against the registered queries and group per metric name.
        let allowed = self.allowed_names(&spec);
        let mut grouped: HashMap<String, Vec<MetricValue>> = HashMap::new();
        for value in samples {
            let Some(name) = value.name().map(str::to_string) else {
                continue;
            };
            if let Some(allowed) = &allowed {
                if !allowed.contains(&name) {
                    continue;
                }
            }
            grouped.entry(name).or_default().push(value);
        }

        let collected_at = SystemTime::now();
        let ttl = self.config.default_ttl();
        let mut results = HashMap::new();
        for (name, values) in grouped {
            let result = MetricResult {
                query_name: name.clone(),
                values,
                collected_at,
            };
            self.cache
                .set(build_cache_key(&name, &[]), result.clone(), ttl);
            results.insert(name, result);
        }

        tracing::debug!(
            service = %self.config.service_name,
            pods = pods.len(),
            metrics = results.len(),
            "refresh complete"
        );
        Ok(results)
    }

    fn get(&self, name: &str, params: &[(String, String)]) -> Option<CacheEntry> {
        self.cache.get(&build_cache_key(name, params))
    }

    fn query_list(&self) -> Arc<QueryRegistry> {
        Arc::clone(&self.queries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::cluster::{ClusterService, FakeClusterClient};
    use crate::collector::registration;
    use crate::collector::registry::SourceRegistry;
    use std::collections::HashMap as StdHashMap;
    use std::time::Duration;

    fn scrape_config(port: u16) -> ScrapeConfig {
        ScrapeConfig {
            service_name: "test-pool-epp".into(),
            service_namespace: "test-ns".into(),
            metrics_port: port,
            ..ScrapeConfig::default()
        }
    }

    fn selector() -> StdHashMap<String, String> {
        let mut m = StdHashMap::new();
        m.insert("inferencepool".to_string(), "test-pool-epp".to_string());
        m
    }

    fn ready_pod(name: &str, ip: &str) -> ClusterPod {
        ClusterPod {
            name: name.into(),
            namespace: "test-ns".into(),
            labels: selector(),
            ip: ip.into(),
            ready: true,
        }
    }

    fn fake_with_service() -> Arc<FakeClusterClient> {
        let fake = Arc::new(FakeClusterClient::new());
        fake.add_service(ClusterService {
            name: "test-pool-epp".into(),
            namespace: "test-ns".into(),
            selector: selector(),
        });
        fake
    }

    // --- Construction ---

    #[test]
    fn test_new_applies_config_validation() {
        let fake = Arc::new(FakeClusterClient::new());
        let missing_name = ScrapeConfig {
            service_name: String::new(),
            ..scrape_config(9090)
        };
        let err = PodScrapingSource::new(fake, missing_name).unwrap_err();
        assert!(err.to_string().contains("service_name is required"));
    }

    #[test]
    fn test_new_with_valid_config() {
        let fake = Arc::new(FakeClusterClient::new());
        let source = PodScrapingSource::new(fake, scrape_config(9090)).unwrap();
        assert_eq!(source.config().service_name, "test-pool-epp");
        assert!(source.query_list().is_empty());
    }

    // --- Discovery ---

    #[tokio::test]
    async fn test_discover_keeps_only_ready_pods() {
        let fake = fake_with_service();
        fake.add_pod(ready_pod("epp-pod-1", "10.0.0.1"));
        fake.add_pod(ready_pod("epp-pod-2", "10.0.0.2"));
        fake.add_pod(ClusterPod {
            ready: false,
            ..ready_pod("epp-pod-3", "10.0.0.3")
        });

        let source = PodScrapingSource::new(fake, scrape_config(9090)).unwrap();
        let pods = source.discover_pods().await.unwrap();
        assert_eq!(pods.len(), 2);
        let names: Vec<&str> = pods.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"epp-pod-1"));
        assert!(names.contains(&"epp-pod-2"));
    }

    #[tokio::test]
    async fn test_discover_skips_pods_without_ip() {
        let fake = fake_with_service();
        fake.add_pod(ClusterPod {
            ip: String::new(),
            ..ready_pod("pending-pod", "")
        });

        let source = PodScrapingSource::new(fake, scrape_config(9090)).unwrap();
        assert!(source.discover_pods().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discover_service_not_found_is_discovery_error() {
        let fake = Arc::new(FakeClusterClient::new());
        let source = PodScrapingSource::new(fake, scrape_config(9090)).unwrap();

        let err = source.discover_pods().await.unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
        assert!(err.to_string().contains("failed to get service"));
    }

    #[tokio::test]
    async fn test_discover_headless_service_is_empty_not_error() {
        let fake = Arc::new(FakeClusterClient::new());
        fake.add_service(ClusterService {
            name: "test-pool-epp".into(),
            namespace: "test-ns".into(),
            selector: StdHashMap::new(),
        });
        fake.add_pod(ready_pod("stray-pod", "10.0.0.9"));

        let source = PodScrapingSource::new(fake, scrape_config(9090)).unwrap();
        assert!(source.discover_pods().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discover_api_failure_propagates() {
        let fake = fake_with_service();
        fake.fail_with("etcd timeout");
        let source = PodScrapingSource::new(fake, scrape_config(9090)).unwrap();
        let err = source.discover_pods().await.unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
    }

    // --- Auth token ---

    #[tokio::test]
    async fn test_auth_explicit_bearer_token() {
        let fake = Arc::new(FakeClusterClient::new());
        let config = ScrapeConfig {
            bearer_token: "explicit-token".into(),
            ..scrape_config(9090)
        };
        let source = PodScrapingSource::new(fake, config).unwrap();
        assert_eq!(
            source.auth_token().await.unwrap().as_deref(),
            Some("explicit-token")
        );
    }

    #[tokio::test]
    async fn test_auth_from_secret() {
        let fake = Arc::new(FakeClusterClient::new());
        let mut data = StdHashMap::new();
        data.insert("token".to_string(), b"secret-bearer".to_vec());
        fake.add_secret(crate::collector::cluster::ClusterSecret {
            name: "metrics-reader".into(),
            namespace: "test-ns".into(),
            data,
        });
        let config = ScrapeConfig {
            metrics_reader_secret_name: "metrics-reader".into(),
            ..scrape_config(9090)
        };
        let source = PodScrapingSource::new(fake, config).unwrap();
        assert_eq!(
            source.auth_token().await.unwrap().as_deref(),
            Some("secret-bearer")
        );
    }

    #[tokio::test]
    async fn test_auth_secret_missing_is_optional() {
        let fake = Arc::new(FakeClusterClient::new());
        let config = ScrapeConfig {
            metrics_reader_secret_name: "absent".into(),
            ..scrape_config(9090)
        };
        let source = PodScrapingSource::new(fake, config).unwrap();
        assert!(source.auth_token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_auth_secret_key_missing_is_optional() {
        let fake = Arc::new(FakeClusterClient::new());
        fake.add_secret(crate::collector::cluster::ClusterSecret {
            name: "metrics-reader".into(),
            namespace: "test-ns".into(),
            data: StdHashMap::new(),
        });
        let config = ScrapeConfig {
            metrics_reader_secret_name: "metrics-reader".into(),
            ..scrape_config(9090)
        };
        let source = PodScrapingSource::new(fake, config).unwrap();
        assert!(source.auth_token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_auth_disabled_without_config() {
        let fake = Arc::new(FakeClusterClient::new());
        let source = PodScrapingSource::new(fake, scrape_config(9090)).unwrap();
        assert!(source.auth_token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_auth_secret_api_failure_propagates() {
        let fake = Arc::new(FakeClusterClient::new());
        fake.fail_with("forbidden");
        let config = ScrapeConfig {
            metrics_reader_secret_name: "metrics-reader".into(),
            ..scrape_config(9090)
        };
        let source = PodScrapingSource::new(fake, config).unwrap();
        assert!(matches!(
            source.auth_token().await.unwrap_err(),
            Error::Discovery(_)
        ));
    }

    // --- Cache / Get ---

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let fake = Arc::new(FakeClusterClient::new());
        let source = PodScrapingSource::new(fake, scrape_config(9090)).unwrap();
        assert!(source
            .get(registration::VLLM_KV_CACHE_USAGE_PERC, &[])
            .is_none());
    }

    #[tokio::test]
    async fn test_get_returns_fresh_entry() {
        let fake = Arc::new(FakeClusterClient::new());
        let source = PodScrapingSource::new(fake, scrape_config(9090)).unwrap();

        let name = registration::VLLM_KV_CACHE_USAGE_PERC;
        let result = MetricResult {
            query_name: name.to_string(),
            values: Vec::new(),
            collected_at: SystemTime::now(),
        };
        source
            .cache()
            .set(build_cache_key(name, &[]), result, Duration::from_secs(3600));

        let cached = source.get(name, &[]).unwrap();
        assert_eq!(cached.result.query_name, name);
    }

    #[tokio::test]
    async fn test_get_expired_returns_none() {
        let fake = Arc::new(FakeClusterClient::new());
        let source = PodScrapingSource::new(fake, scrape_config(9090)).unwrap();

        let name = registration::VLLM_NUM_REQUESTS_WAITING;
        let result = MetricResult {
            query_name: name.to_string(),
            values: Vec::new(),
            collected_at: SystemTime::now(),
        };
        source
            .cache()
            .set(build_cache_key(name, &[]), result, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(source.get(name, &[]).is_none());
    }

    // --- Refresh against unreachable pods ---

    #[tokio::test]
    async fn test_refresh_headless_service_returns_empty() {
        let fake = Arc::new(FakeClusterClient::new());
        fake.add_service(ClusterService {
            name: "test-pool-epp".into(),
            namespace: "test-ns".into(),
            selector: StdHashMap::new(),
        });
        let source = PodScrapingSource::new(fake, scrape_config(9090)).unwrap();
        let cancel = CancellationToken::new();
        let results = source.refresh(&cancel, RefreshSpec::default()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_unreachable_pod_is_empty_not_error() {
        let fake = fake_with_service();
        // TEST-NET-1 address: guaranteed unroutable.
        fake.add_pod(ready_pod("epp-pod-unreachable", "192.0.2.1"));

        let config = ScrapeConfig {
            scrape_timeout_secs: 1,
            ..scrape_config(9090)
        };
        let source = Arc::new(PodScrapingSource::new(fake, config).unwrap());
        let registry = SourceRegistry::new();
        registry.must_register("pods", source.clone() as Arc<dyn MetricSource>);
        registration::register_pod_scraping_queries("pods", &registry);

        let started = std::time::Instant::now();
        let cancel = CancellationToken::new();
        let results = source.refresh(&cancel, RefreshSpec::default()).await.unwrap();
        assert!(results.is_empty());
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "refresh must be bounded by the scrape timeout"
        );
    }

    // --- Query registration ---

    #[tokio::test]
    async fn test_query_registration_via_source_registry() {
        let fake = Arc::new(FakeClusterClient::new());
        let source = Arc::new(PodScrapingSource::new(fake, scrape_config(9090)).unwrap());
        assert!(source.query_list().is_empty());

        let registry = SourceRegistry::new();
        registry.must_register("pods", source.clone() as Arc<dyn MetricSource>);
        registration::register_pod_scraping_queries("pods", &registry);

        let queries = source.query_list();
        assert_eq!(queries.list().len(), 4);
        let q = queries.get(registration::VLLM_KV_CACHE_USAGE_PERC).unwrap();
        assert_eq!(q.template, registration::VLLM_KV_CACHE_USAGE_PERC);
    }
}
