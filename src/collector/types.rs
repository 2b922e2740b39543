//! Metric data model and cache-key serialization

use std::collections::HashMap;
use std::time::SystemTime;

/// Label carrying the metric name on every scraped sample.
pub const NAME_LABEL: &str = "__name__";

/// Label carrying the originating pod name on every scraped sample.
pub const POD_LABEL: &str = "pod";

/// One scraped sample: a value, when it was observed, and its label set.
///
/// After scraping, the label set always contains [`POD_LABEL`] and
/// [`NAME_LABEL`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    pub value: f64,
    pub timestamp: SystemTime,
    pub labels: HashMap<String, String>,
}

impl MetricValue {
    /// The originating pod, when present.
    pub fn pod(&self) -> Option<&str> {
        self.labels.get(POD_LABEL).map(String::as_str)
    }

    /// The metric name, when present.
    pub fn name(&self) -> Option<&str> {
        self.labels.get(NAME_LABEL).map(String::as_str)
    }
}

/// Aggregated values for one query across all pods in a refresh.
///
/// Ordering within `values` carries no meaning; consumers treat it as a set
/// keyed by the `pod` label.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricResult {
    pub query_name: String,
    pub values: Vec<MetricValue>,
    pub collected_at: SystemTime,
}

/// How a query template is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// The template is a bare metric name matched against scraped samples
    MetricName,
    /// The template is a PromQL expression evaluated by an external backend
    PromQl,
}

/// A registered query: name, kind, template text, and its parameter names.
///
/// For `MetricName` queries the template equals the name and there are no
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    pub name: String,
    pub query_type: QueryType,
    pub template: String,
    pub params: Vec<String>,
    pub description: String,
}

impl QueryTemplate {
    /// A metric-name query: template == name, no parameters.
    pub fn metric_name(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            template: name.clone(),
            name,
            query_type: QueryType::MetricName,
            params: Vec::new(),
            description: description.into(),
        }
    }
}

/// Which queries a refresh should evaluate; empty means every registered
/// query.
#[derive(Debug, Clone, Default)]
pub struct RefreshSpec {
    pub queries: Vec<String>,
}

/// Build the canonical cache key for `(name, params)`.
///
/// Parameters are sorted by key so equal parameter sets always serialize
/// identically: `name` or `name?k=v&k=v`.
pub fn build_cache_key(name: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let encoded: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{}?{}", name, encoded.join("&"))
}

/// Parse a cache key back into `(name, params)`.
pub fn parse_cache_key(key: &str) -> (String, Vec<(String, String)>) {
    match key.split_once('?') {
        None => (key.to_string(), Vec::new()),
        Some((name, rest)) => {
            let params = rest
                .split('&')
                .filter_map(|pair| {
                    pair.split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                })
                .collect();
            (name.to_string(), params)
        }
    }
}
