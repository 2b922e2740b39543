//! Well-known serving metrics and their query registration
//!
//! Metric names are consumed verbatim from the serving stack: the per-replica
//! vLLM gauges and the pool-level aggregates exposed by the endpoint picker.

use super::registry::SourceRegistry;
use super::types::QueryTemplate;

/// KV-cache utilization in [0.0, 1.0], per serving replica.
pub const VLLM_KV_CACHE_USAGE_PERC: &str = "vllm:kv_cache_usage_perc";

/// Queue depth at the serving replica.
pub const VLLM_NUM_REQUESTS_WAITING: &str = "vllm:num_requests_waiting";

/// Pool-level KV-cache utilization from the endpoint picker.
pub const EPP_POOL_AVG_KV_CACHE_UTILIZATION: &str = "inference_pool_average_kv_cache_utilization";

/// Pool-level queue size from the endpoint picker.
pub const EPP_POOL_AVG_QUEUE_SIZE: &str = "inference_pool_average_queue_size";

/// Register the expected pod metrics against the named source: the vLLM
/// replica gauges and the endpoint-picker pool aggregates. A missing source
/// is a no-op.
pub fn register_pod_scraping_queries(source_name: &str, sources: &SourceRegistry) {
    let Some(source) = sources.get(source_name) else {
        return;
    };
    let registry = source.query_list();

    registry.must_register(QueryTemplate::metric_name(
        VLLM_KV_CACHE_USAGE_PERC,
        "vLLM KV cache utilization (0.0-1.0) scraped from the pod metrics endpoint",
    ));
    registry.must_register(QueryTemplate::metric_name(
        VLLM_NUM_REQUESTS_WAITING,
        "Number of requests waiting in the vLLM queue, scraped from the pod metrics endpoint",
    ));
    registry.must_register(QueryTemplate::metric_name(
        EPP_POOL_AVG_KV_CACHE_UTILIZATION,
        "Average KV cache utilization reported by the endpoint picker",
    ));
    registry.must_register(QueryTemplate::metric_name(
        EPP_POOL_AVG_QUEUE_SIZE,
        "Average queue size reported by the endpoint picker",
    ));
}
