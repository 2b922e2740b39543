//! Cluster client — the capability set the collector needs from Kubernetes
//!
//! The collector consumes exactly three reads: fetch a service, list pods by
//! label selector, fetch a secret. They are modelled as the [`ClusterClient`]
//! trait over lightweight local resource types, so all discovery and
//! scraping logic is testable without a cluster. The real implementation
//! backed by `kube` is feature-gated; [`FakeClusterClient`] is always
//! compiled for tests and host-reconciler test suites.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

// -----------------------------------------------------------------------
// Local resource models — mirror the K8s objects the collector reads.
// -----------------------------------------------------------------------

/// A service: its selector identifies the pods to scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterService {
    pub name: String,
    pub namespace: String,
    /// Empty for headless/selector-less services.
    pub selector: HashMap<String, String>,
}

/// A pod, reduced to what scraping needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterPod {
    pub name: String,
    pub namespace: String,
    pub labels: HashMap<String, String>,
    /// Pod IP; empty until assigned.
    pub ip: String,
    /// Whether the `Ready` condition is `True`.
    pub ready: bool,
}

/// A secret's decoded data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSecret {
    pub name: String,
    pub namespace: String,
    pub data: HashMap<String, Vec<u8>>,
}

/// Cluster API failure, distinguishing not-found from everything else.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    #[error("not found")]
    NotFound,
    #[error("cluster API error: {0}")]
    Api(String),
}

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Read capabilities the collector needs from the cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_service(&self, namespace: &str, name: &str) -> ClusterResult<ClusterService>;

    /// List pods in `namespace` whose labels match every selector entry.
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &HashMap<String, String>,
    ) -> ClusterResult<Vec<ClusterPod>>;

    async fn get_secret(&self, namespace: &str, name: &str) -> ClusterResult<ClusterSecret>;
}

// ---------------------------------------------------------------------------
// FakeClusterClient — in-memory implementation for tests
// ---------------------------------------------------------------------------

/// In-memory cluster for tests: seed objects, optionally inject an API
/// failure affecting every call.
#[derive(Default)]
pub struct FakeClusterClient {
    services: RwLock<HashMap<(String, String), ClusterService>>,
    pods: RwLock<Vec<ClusterPod>>,
    secrets: RwLock<HashMap<(String, String), ClusterSecret>>,
    api_failure: RwLock<Option<String>>,
}

impl FakeClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(&self, service: ClusterService) {
        self.services
            .write()
            .unwrap()
            .insert((service.namespace.clone(), service.name.clone()), service);
    }

    pub fn add_pod(&self, pod: ClusterPod) {
        self.pods.write().unwrap().push(pod);
    }

    pub fn add_secret(&self, secret: ClusterSecret) {
        self.secrets
            .write()
            .unwrap()
            .insert((secret.namespace.clone(), secret.name.clone()), secret);
    }

    /// Make every subsequent call fail with `ClusterError::Api(message)`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.api_failure.write().unwrap() = Some(message.into());
    }

    fn check_failure(&self) -> ClusterResult<()> {
        match self.api_failure.read().unwrap().as_ref() {
            Some(msg) => Err(ClusterError::Api(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn get_service(&self, namespace: &str, name: &str) -> ClusterResult<ClusterService> {
        self.check_failure()?;
        self.services
            .read()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or(ClusterError::NotFound)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &HashMap<String, String>,
    ) -> ClusterResult<Vec<ClusterPod>> {
        self.check_failure()?;
        Ok(self
            .pods
            .read()
            .unwrap()
            .iter()
            .filter(|p| p.namespace == namespace)
            .filter(|p| {
                selector
                    .iter()
                    .all(|(k, v)| p.labels.get(k).map(String::as_str) == Some(v.as_str()))
            })
            .cloned()
            .collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> ClusterResult<ClusterSecret> {
        self.check_failure()?;
        self.secrets
            .read()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or(ClusterError::NotFound)
    }
}

// ---------------------------------------------------------------------------
// KubeClusterClient — real implementation, feature-gated
// ---------------------------------------------------------------------------

#[cfg(feature = "kube")]
pub use kube_impl::KubeClusterClient;

#[cfg(feature = "kube")]
mod kube_impl {
    use super::*;
    use k8s_openapi::api::core::v1::{Pod, Secret, Service};
    use kube::api::{Api, ListParams};

    /// Cluster client backed by the in-cluster (or kubeconfig) API server.
    pub struct KubeClusterClient {
        client: kube::Client,
    }

    impl KubeClusterClient {
        /// Connect using the default client configuration.
        pub async fn try_default() -> ClusterResult<Self> {
            let client = kube::Client::try_default()
                .await
                .map_err(|e| ClusterError::Api(format!("failed to create client: {e}")))?;
            Ok(Self { client })
        }

        pub fn new(client: kube::Client) -> Self {
            Self { client }
        }
    }

    fn map_kube_err(err: kube::Error) -> ClusterError {
        match err {
            kube::Error::Api(ref ae) if ae.code == 404 => ClusterError::NotFound,
            other => ClusterError::Api(other.to_string()),
        }
    }

    /// Render a label map as an API selector string, sorted for stability.
    fn selector_string(selector: &HashMap<String, String>) -> String {
        let mut pairs: Vec<String> = selector.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        pairs.join(",")
    }

    fn pod_is_ready(pod: &Pod) -> bool {
        pod.status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .map(|conds| {
                conds
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
            .unwrap_or(false)
    }

    #[async_trait]
    impl ClusterClient for KubeClusterClient {
        async fn get_service(&self, namespace: &str, name: &str) -> ClusterResult<ClusterService> {
            let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
            let svc = api.get(name).await.map_err(map_kube_err)?;
            Ok(ClusterService {
                name: name.to_string(),
                namespace: namespace.to_string(),
                selector: svc
                    .spec
                    .and_then(|s| s.selector)
                    .map(|sel| sel.into_iter().collect())
                    .unwrap_or_default(),
            })
        }

        async fn list_pods(
            &self,
            namespace: &str,
            selector: &HashMap<String, String>,
        ) -> ClusterResult<Vec<ClusterPod>> {
            let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            let lp = ListParams::default().labels(&selector_string(selector));
            let pods = api.list(&lp).await.map_err(map_kube_err)?;

            Ok(pods
                .items
                .into_iter()
                .map(|pod| {
                    let ready = pod_is_ready(&pod);
                    ClusterPod {
                        name: pod.metadata.name.unwrap_or_default(),
                        namespace: namespace.to_string(),
                        labels: pod
                            .metadata
                            .labels
                            .map(|l| l.into_iter().collect())
                            .unwrap_or_default(),
                        ip: pod
                            .status
                            .and_then(|s| s.pod_ip)
                            .unwrap_or_default(),
                        ready,
                    }
                })
                .collect())
        }

        async fn get_secret(&self, namespace: &str, name: &str) -> ClusterResult<ClusterSecret> {
            let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
            let secret = api.get(name).await.map_err(map_kube_err)?;
            Ok(ClusterSecret {
                name: name.to_string(),
                namespace: namespace.to_string(),
                data: secret
                    .data
                    .map(|d| d.into_iter().map(|(k, v)| (k, v.0)).collect())
                    .unwrap_or_default(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn pod(name: &str, ns: &str, labels_in: HashMap<String, String>, ready: bool) -> ClusterPod {
        ClusterPod {
            name: name.to_string(),
            namespace: ns.to_string(),
            labels: labels_in,
            ip: "10.0.0.1".to_string(),
            ready,
        }
    }

    #[tokio::test]
    async fn test_get_service_not_found() {
        let fake = FakeClusterClient::new();
        let err = fake.get_service("ns", "absent").await.unwrap_err();
        assert_eq!(err, ClusterError::NotFound);
    }

    #[tokio::test]
    async fn test_get_service_found() {
        let fake = FakeClusterClient::new();
        fake.add_service(ClusterService {
            name: "pool".into(),
            namespace: "ns".into(),
            selector: labels(&[("app", "epp")]),
        });
        let svc = fake.get_service("ns", "pool").await.unwrap();
        assert_eq!(svc.selector.get("app").unwrap(), "epp");
    }

    #[tokio::test]
    async fn test_list_pods_matches_selector_and_namespace() {
        let fake = FakeClusterClient::new();
        fake.add_pod(pod("a", "ns", labels(&[("app", "epp")]), true));
        fake.add_pod(pod("b", "ns", labels(&[("app", "other")]), true));
        fake.add_pod(pod("c", "other-ns", labels(&[("app", "epp")]), true));

        let matched = fake.list_pods("ns", &labels(&[("app", "epp")])).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "a");
    }

    #[tokio::test]
    async fn test_list_pods_empty_selector_matches_all_in_namespace() {
        let fake = FakeClusterClient::new();
        fake.add_pod(pod("a", "ns", labels(&[("app", "x")]), true));
        fake.add_pod(pod("b", "ns", labels(&[("app", "y")]), false));

        let matched = fake.list_pods("ns", &HashMap::new()).await.unwrap();
        assert_eq!(matched.len(), 2);
    }

    #[tokio::test]
    async fn test_get_secret() {
        let fake = FakeClusterClient::new();
        let mut data = HashMap::new();
        data.insert("token".to_string(), b"secret-token".to_vec());
        fake.add_secret(ClusterSecret {
            name: "reader".into(),
            namespace: "ns".into(),
            data,
        });

        let secret = fake.get_secret("ns", "reader").await.unwrap();
        assert_eq!(secret.data.get("token").unwrap(), b"secret-token");
        assert_eq!(
            fake.get_secret("ns", "missing").await.unwrap_err(),
            ClusterError::NotFound
        );
    }

    #[tokio::test]
    async fn test_injected_api_failure() {
        let fake = FakeClusterClient::new();
        fake.add_service(ClusterService {
            name: "pool".into(),
            namespace: "ns".into(),
            selector: HashMap::new(),
        });
        fake.fail_with("connection refused");

        let err = fake.get_service("ns", "pool").await.unwrap_err();
        assert!(matches!(err, ClusterError::Api(ref m) if m == "connection refused"));
        // Not-found is distinguishable from API failure.
        assert_ne!(err, ClusterError::NotFound);
    }
}
