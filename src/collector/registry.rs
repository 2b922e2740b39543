//! Query and source registries

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::cache::CacheEntry;
use super::types::{MetricResult, QueryTemplate, RefreshSpec};
use crate::error::Result;

/// A collector that can refresh observations and serve them from its cache.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Collect fresh observations. Returns one aggregated result per metric
    /// that produced data; on cancellation nothing is committed to the cache
    /// and `Error::Cancelled` is returned.
    async fn refresh(
        &self,
        cancel: &CancellationToken,
        spec: RefreshSpec,
    ) -> Result<HashMap<String, MetricResult>>;

    /// Serve a cached result by query name and parameters; `None` when
    /// absent or expired.
    fn get(&self, name: &str, params: &[(String, String)]) -> Option<CacheEntry>;

    /// The source's query registry.
    fn query_list(&self) -> Arc<QueryRegistry>;
}

/// Registry of query templates owned by one source.
#[derive(Debug, Default)]
pub struct QueryRegistry {
    queries: RwLock<HashMap<String, QueryTemplate>>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template.
    ///
    /// # Panics
    /// Panics on a duplicate name: queries are wired once at startup and a
    /// collision is a programming error.
    pub fn must_register(&self, template: QueryTemplate) {
        let mut queries = self.queries.write().unwrap();
        if queries.contains_key(&template.name) {
            panic!("query '{}' is already registered", template.name);
        }
        queries.insert(template.name.clone(), template);
    }

    /// Look up a template by name.
    pub fn get(&self, name: &str) -> Option<QueryTemplate> {
        self.queries.read().unwrap().get(name).cloned()
    }

    /// All registered templates.
    pub fn list(&self) -> Vec<QueryTemplate> {
        self.queries.read().unwrap().values().cloned().collect()
    }

    /// Registered query names.
    pub fn names(&self) -> Vec<String> {
        self.queries.read().unwrap().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.read().unwrap().is_empty()
    }
}

/// Process-scoped registry mapping source names to sources.
///
/// Constructed at controller startup and injected into collaborators; the
/// registry shares sources by name without owning their lifecycle.
#[derive(Default)]
pub struct SourceRegistry {
    sources: RwLock<HashMap<String, Arc<dyn MetricSource>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under `name`.
    ///
    /// # Panics
    /// Panics on a duplicate name.
    pub fn must_register(&self, name: impl Into<String>, source: Arc<dyn MetricSource>) {
        let name = name.into();
        let mut sources = self.sources.write().unwrap();
        if sources.contains_key(&name) {
            panic!("source '{name}' is already registered");
        }
        sources.insert(name, source);
    }

    /// Look up a source by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn MetricSource>> {
        self.sources.read().unwrap().get(name).cloned()
    }

    /// Registered source names.
    pub fn names(&self) -> Vec<String> {
        self.sources.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::QueryType;

    fn template(name: &str) -> QueryTemplate {
        QueryTemplate::metric_name(name, "test query")
    }

    // --- QueryRegistry ---

    #[test]
    fn test_register_and_get() {
        let registry = QueryRegistry::new();
        registry.must_register(template("m1"));

        let q = registry.get("m1").unwrap();
        assert_eq!(q.name, "m1");
        assert_eq!(q.query_type, QueryType::MetricName);
        assert!(registry.get("m2").is_none());
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_registration_panics() {
        let registry = QueryRegistry::new();
        registry.must_register(template("m1"));
        registry.must_register(template("m1"));
    }

    #[test]
    fn test_list_and_names() {
        let registry = QueryRegistry::new();
        assert!(registry.is_empty());
        registry.must_register(template("a"));
        registry.must_register(template("b"));

        assert_eq!(registry.list().len(), 2);
        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        assert!(!registry.is_empty());
    }

    // --- SourceRegistry ---

    struct NullSource {
        queries: Arc<QueryRegistry>,
    }

    #[async_trait]
    impl MetricSource for NullSource {
        async fn refresh(
            &self,
            _cancel: &CancellationToken,
            _spec: RefreshSpec,
        ) -> Result<HashMap<String, MetricResult>> {
            Ok(HashMap::new())
        }

        fn get(&self, _name: &str, _params: &[(String, String)]) -> Option<CacheEntry> {
            None
        }

        fn query_list(&self) -> Arc<QueryRegistry> {
            Arc::clone(&self.queries)
        }
    }

    fn null_source() -> Arc<dyn MetricSource> {
        Arc::new(NullSource {
            queries: Arc::new(QueryRegistry::new()),
        })
    }

    #[test]
    fn test_source_register_and_get() {
        let registry = SourceRegistry::new();
        registry.must_register("pods", null_source());

        assert!(registry.get("pods").is_some());
        assert!(registry.get("other").is_none());
        assert_eq!(registry.names(), vec!["pods"]);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_source_duplicate_panics() {
        let registry = SourceRegistry::new();
        registry.must_register("pods", null_source());
        registry.must_register("pods", null_source());
    }

    #[tokio::test]
    async fn test_source_trait_object_usable() {
        let registry = SourceRegistry::new();
        registry.must_register("pods", null_source());
        let source = registry.get("pods").unwrap();
        let cancel = CancellationToken::new();
        let results = source.refresh(&cancel, RefreshSpec::default()).await.unwrap();
        assert!(results.is_empty());
    }
}
