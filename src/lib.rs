//! # inferscale
//!
//! Autoscaling controller core for LLM inference workloads: an analytic
//! performance model plus the metrics collection that feeds it.
//!
//! ## Architecture
//!
//! ```text
//! PodScrapingSource → MetricCache → (reconciler) → QueueAnalyzer → rate curves
//! ```
//!
//! ## Core pieces
//!
//! - **Solvers** ([`solver`]): finite-capacity queueing models — M/M/1/K,
//!   M/D/1/K, and their state-dependent (batching) variants
//! - **Sizing** ([`sizing`]): [`QueueAnalyzer`](sizing::QueueAnalyzer)
//!   predicts TTFT/ITL/throughput from an arrival rate and inverts the model
//!   to the maximum sustainable rates under SLO targets
//! - **Collector** ([`collector`]): discovers Ready pods behind a service,
//!   scrapes their Prometheus metrics concurrently, and serves them from a
//!   TTL cache
//!
//! ## Quick start
//!
//! ```rust
//! use inferscale::config::ModelType;
//! use inferscale::sizing::{
//!     AnalyzerConfig, DecodeParms, PrefillParms, QueueAnalyzer, RequestSize, ServiceParms,
//!     TargetPerf,
//! };
//!
//! let config = AnalyzerConfig {
//!     max_batch_size: 8,
//!     max_queue_size: 80,
//!     service_parms: ServiceParms {
//!         prefill: PrefillParms { gamma: 10.0, delta: 0.01 },
//!         decode: DecodeParms { alpha: 5.0, beta: 1.0 },
//!     },
//!     model_type: ModelType::Md1k,
//! };
//! let size = RequestSize { avg_input_tokens: 100, avg_output_tokens: 50 };
//! let mut analyzer = QueueAnalyzer::new(config, size).unwrap();
//!
//! let targets = TargetPerf { target_ttft: 100.0, target_itl: 10.0, target_tps: 0.0 };
//! let result = analyzer.size(&targets).unwrap();
//! assert!(result.max_rates.rate_ttft > 0.0);
//! ```

pub mod collector;
pub mod config;
pub mod error;
pub mod sizing;
pub mod solver;

pub use error::{Error, Result};
