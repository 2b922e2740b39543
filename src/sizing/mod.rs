//! Queueing analyzer — latency prediction and capacity sizing
//!
//! [`QueueAnalyzer`] composes a state-dependent queueing solver with the
//! LLM service-time formulas:
//!
//! - prefill time at batch `b`: `gamma + delta * input_tokens * b` (ms)
//! - decode time at batch `b`: `(alpha + beta * b) * output_tokens` (ms)
//!
//! `analyze` predicts latency and throughput for an offered arrival rate;
//! `size` inverts the model to the largest sustainable rates under TTFT, ITL,
//! and TPS targets using monotone bisection, and samples the rate/latency
//! curve handed to the accelerator optimizer.
//!
//! Rates at this API are requests/second and latencies are milliseconds; the
//! solvers run in requests/ms so service parameters keep their natural units.

use crate::config::ModelType;
use crate::error::{Error, Result};
use crate::solver::{Md1StateDependent, Mm1StateDependent, QueueModel};

const MS_PER_SEC: f64 = 1000.0;

/// Keeps the analyzer's rate range strictly inside the stable region
/// `lambda < mu[B]`.
const RATE_STABILITY_MARGIN: f64 = 0.99;

/// Relative tolerance on the bisected metric.
const BISECTION_TOLERANCE: f64 = 1e-3;

/// Bracket width cutoff as a fraction of the maximum rate.
const BRACKET_FRACTION: f64 = 1e-4;

const MAX_BISECTION_ITERATIONS: usize = 100;

/// Number of points sampled for the rate/latency curve.
const CURVE_SAMPLES: usize = 20;

/// Prefill service-time coefficients (milliseconds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrefillParms {
    /// Baseline prefill time
    pub gamma: f64,
    /// Per input token, per batch element
    pub delta: f64,
}

/// Decode service-time coefficients (milliseconds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeParms {
    /// Baseline per-token decode time
    pub alpha: f64,
    /// Per batch element, per token
    pub beta: f64,
}

/// LLM service-time model for one model/accelerator pairing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceParms {
    pub prefill: PrefillParms,
    pub decode: DecodeParms,
}

/// Average request shape observed for a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestSize {
    pub avg_input_tokens: u32,
    pub avg_output_tokens: u32,
}

/// Service-level objectives for sizing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetPerf {
    /// Time-to-first-token target (ms)
    pub target_ttft: f64,
    /// Inter-token-latency target (ms)
    pub target_itl: f64,
    /// Throughput floor (requests/s); 0 disables the constraint
    pub target_tps: f64,
}

/// Analyzer configuration.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Maximum batch size `B` (>= 1)
    pub max_batch_size: u32,
    /// System capacity `K` (>= B, in-service + queued)
    pub max_queue_size: u32,
    pub service_parms: ServiceParms,
    pub model_type: ModelType,
}

impl AnalyzerConfig {
    /// Build a configuration with `K = ratio * B`.
    pub fn with_queue_ratio(
        max_batch_size: u32,
        ratio: u32,
        service_parms: ServiceParms,
        model_type: ModelType,
    ) -> Self {
        Self {
            max_batch_size,
            max_queue_size: ratio * max_batch_size,
            service_parms,
            model_type,
        }
    }
}

/// Predicted steady-state metrics at one arrival rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerfMetrics {
    /// Effective departure rate (requests/s)
    pub throughput: f64,
    /// Average queueing wait (ms)
    pub avg_wait_time: f64,
    /// Average service time (ms)
    pub avg_serv_time: f64,
    /// Average response time (ms)
    pub avg_resp_time: f64,
    /// Server utilization
    pub rho: f64,
    /// Average number of requests in the system
    pub avg_num_in_system: f64,
    /// Average queue length
    pub avg_queue_length: f64,
    /// Average number of requests in service (effective batch size)
    pub avg_batch_size: f64,
}

/// Stable arrival-rate interval (requests/s).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateRange {
    pub min: f64,
    pub max: f64,
}

/// Maximum sustainable arrival rates per target (requests/s).
///
/// `rate_tps` is the *smallest* rate delivering the throughput floor (0 when
/// the constraint is disabled); the latency rates are the largest rates still
/// meeting their targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaxRates {
    pub rate_ttft: f64,
    pub rate_itl: f64,
    pub rate_tps: f64,
}

/// One sample of the rate/latency curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    /// Arrival rate (requests/s)
    pub rate: f64,
    /// Predicted TTFT (ms)
    pub ttft: f64,
    /// Predicted ITL (ms)
    pub itl: f64,
    /// Predicted throughput (requests/s)
    pub throughput: f64,
}

/// Result of a sizing run.
#[derive(Debug, Clone)]
pub struct SizingResult {
    pub max_rates: MaxRates,
    /// Metrics at the binding latency rate, `min(rate_ttft, rate_itl)`
    pub metrics: PerfMetrics,
    pub curve: Vec<CurvePoint>,
}

#[derive(Debug)]
enum ModelVariant {
    Mm1(Mm1StateDependent),
    Md1(Md1StateDependent),
}

impl ModelVariant {
    fn solve(&mut self, lambda: f64, mu: f64) {
        match self {
            Self::Mm1(m) => m.solve(lambda, mu),
            Self::Md1(m) => m.solve(lambda, mu),
        }
    }

    fn as_model(&self) -> &dyn QueueModel {
        match self {
            Self::Mm1(m) => m,
            Self::Md1(m) => m,
        }
    }

    fn avg_num_in_servers(&self) -> f64 {
        match self {
            Self::Mm1(m) => m.avg_num_in_servers(),
            Self::Md1(m) => m.avg_num_in_servers(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LatencyMetric {
    Ttft,
    Itl,
}

impl LatencyMetric {
    fn name(self) -> &'static str {
        match self {
            Self::Ttft => "TTFT",
            Self::Itl => "ITL",
        }
    }
}

/// Latency prediction and capacity sizing for one workload variant.
///
/// Owns its model instance; calls that solve the model take `&mut self` so
/// concurrent use is serialized by the borrow checker.
#[derive(Debug)]
pub struct QueueAnalyzer {
    config: AnalyzerConfig,
    request_size: RequestSize,
    /// Service rates indexed by batch size - 1, requests/ms
    serv_rate: Vec<f64>,
    rate_range: RateRange,
    model: ModelVariant,
}

impl QueueAnalyzer {
    /// Build an analyzer, precomputing the service-rate vector and stable
    /// rate range.
    pub fn new(config: AnalyzerConfig, request_size: RequestSize) -> Result<Self> {
        if config.max_batch_size < 1 {
            return Err(Error::Config("max_batch_size must be >= 1".into()));
        }
        if config.max_queue_size < config.max_batch_size {
            return Err(Error::Config(format!(
                "max_queue_size ({}) must be >= max_batch_size ({})",
                config.max_queue_size, config.max_batch_size
            )));
        }
        if request_size.avg_input_tokens == 0 || request_size.avg_output_tokens == 0 {
            return Err(Error::Config(
                "request size token counts must be positive".into(),
            ));
        }
        let p = &config.service_parms;
        if p.prefill.gamma < 0.0 || p.prefill.delta < 0.0 || p.decode.alpha < 0.0 || p.decode.beta < 0.0 {
            return Err(Error::Config(
                "service parameters must be non-negative".into(),
            ));
        }

        let b_max = config.max_batch_size as usize;
        let mut serv_rate = Vec::with_capacity(b_max);
        for b in 1..=b_max {
            let total = service_time_ms(p, &request_size, b as f64);
            if total <= 0.0 {
                return Err(Error::Config(
                    "service parameters yield a zero service time".into(),
                ));
            }
            serv_rate.push(1.0 / total);
        }

        let rate_range = RateRange {
            min: 0.0,
            max: serv_rate[b_max - 1] * RATE_STABILITY_MARGIN * MS_PER_SEC,
        };

        let k = config.max_queue_size as usize;
        let model = match config.model_type {
            ModelType::Mm1k => ModelVariant::Mm1(Mm1StateDependent::new(k, serv_rate.clone())),
            ModelType::Md1k => ModelVariant::Md1(Md1StateDependent::new(k, serv_rate.clone())),
        };

        Ok(Self {
            config,
            request_size,
            serv_rate,
            rate_range,
            model,
        })
    }

    /// The stable arrival-rate interval (requests/s).
    pub fn rate_range(&self) -> RateRange {
        self.rate_range
    }

    /// The configured model type.
    pub fn model_type(&self) -> ModelType {
        self.config.model_type
    }

    /// Predict steady-state metrics at arrival rate `rate` (requests/s).
    pub fn analyze(&mut self, rate: f64) -> Result<PerfMetrics> {
        if rate < 0.0 {
            return Err(Error::ModelInvalid(format!(
                "arrival rate ({rate}) must be non-negative"
            )));
        }
        if rate > self.rate_range.max {
            return Err(Error::ModelInvalid(format!(
                "arrival rate ({:.3} req/s) exceeds the stable range ({:.3} req/s)",
                rate, self.rate_range.max
            )));
        }
        self.solve_at(rate)?;

        let m = self.model.as_model();
        Ok(PerfMetrics {
            throughput: m.throughput() * MS_PER_SEC,
            avg_wait_time: m.avg_wait_time(),
            avg_serv_time: m.avg_serv_time(),
            avg_resp_time: m.avg_resp_time(),
            rho: m.rho(),
            avg_num_in_system: m.avg_num_in_system(),
            avg_queue_length: m.avg_queue_length(),
            avg_batch_size: self.model.avg_num_in_servers(),
        })
    }

    /// Invert the model: the largest rates meeting the TTFT and ITL targets,
    /// the smallest rate meeting the TPS floor, metrics at the binding
    /// latency rate, and the sampled rate curve.
    pub fn size(&mut self, targets: &TargetPerf) -> Result<SizingResult> {
        if targets.target_ttft <= 0.0 || targets.target_itl <= 0.0 {
            return Err(Error::ModelInvalid(
                "latency targets must be positive".into(),
            ));
        }
        if targets.target_tps < 0.0 {
            return Err(Error::ModelInvalid(
                "TPS target must be non-negative".into(),
            ));
        }

        let rate_ttft = self.max_rate_for(LatencyMetric::Ttft, targets.target_ttft)?;
        let rate_itl = self.max_rate_for(LatencyMetric::Itl, targets.target_itl)?;
        let rate_tps = if targets.target_tps > 0.0 {
            self.min_rate_for_tps(targets.target_tps)?
        } else {
            0.0
        };

        let binding = rate_ttft.min(rate_itl);
        let metrics = self.analyze(binding)?;
        let curve = self.sample_curve();

        tracing::debug!(
            rate_ttft,
            rate_itl,
            rate_tps,
            model = %self.config.model_type,
            "sizing complete"
        );

        Ok(SizingResult {
            max_rates: MaxRates {
                rate_ttft,
                rate_itl,
                rate_tps,
            },
            metrics,
            curve,
        })
    }

    fn solve_at(&mut self, rate: f64) -> Result<()> {
        let lambda = rate / MS_PER_SEC;
        self.model.solve(lambda, self.serv_rate[0]);
        if !self.model.as_model().is_valid() {
            return Err(Error::ModelInvalid(format!(
                "model rejected arrival rate {rate:.3} req/s"
            )));
        }
        Ok(())
    }

    /// TTFT at the solved point: queueing wait plus prefill compute at the
    /// effective batch size.
    fn ttft_at(&self) -> f64 {
        let b = self.model.avg_num_in_servers();
        let p = &self.config.service_parms.prefill;
        self.model.as_model().avg_wait_time()
            + p.gamma
            + p.delta * self.request_size.avg_input_tokens as f64 * b
    }

    /// Per-output-token decode time at the effective batch size.
    fn itl_at(&self) -> f64 {
        let d = &self.config.service_parms.decode;
        d.alpha + d.beta * self.model.avg_num_in_servers()
    }

    fn eval_latency(&mut self, rate: f64, which: LatencyMetric) -> Result<f64> {
        self.solve_at(rate)?;
        Ok(match which {
            LatencyMetric::Ttft => self.ttft_at(),
            LatencyMetric::Itl => self.itl_at(),
        })
    }

    fn eval_throughput(&mut self, rate: f64) -> Result<f64> {
        self.solve_at(rate)?;
        Ok(self.model.as_model().throughput() * MS_PER_SEC)
    }

    /// Largest rate whose latency metric stays at or below `target`.
    /// Latency metrics are non-decreasing in the arrival rate on the stable
    /// interval, so plain bisection applies.
    fn max_rate_for(&mut self, which: LatencyMetric, target: f64) -> Result<f64> {
        let max = self.rate_range.max;
        let mut lo = max * 1e-6;

        if self.eval_latency(lo, which)? > target {
            return Err(Error::Infeasible(format!(
                "{} target {:.3} ms cannot be met even at minimal load",
                which.name(),
                target
            )));
        }
        let mut hi = max;
        if self.eval_latency(hi, which)? <= target {
            return Ok(hi);
        }

        for _ in 0..MAX_BISECTION_ITERATIONS {
            let mid = 0.5 * (lo + hi);
            let value = self.eval_latency(mid, which)?;
            if value <= target {
                lo = mid;
                if (target - value) / target <= BISECTION_TOLERANCE {
                    return Ok(mid);
                }
            } else {
                hi = mid;
            }
            if hi - lo <= BRACKET_FRACTION * max {
                break;
            }
        }
        Ok(lo)
    }

    /// Smallest rate delivering at least `target` requests/s of throughput.
    fn min_rate_for_tps(&mut self, target: f64) -> Result<f64> {
        let max = self.rate_range.max;
        let mut hi = max;

        if self.eval_throughput(hi)? < target {
            return Err(Error::Infeasible(format!(
                "TPS target {:.3} req/s exceeds the achievable throughput",
                target
            )));
        }
        let mut lo = max * 1e-6;
        if self.eval_throughput(lo)? >= target {
            return Ok(lo);
        }

        for _ in 0..MAX_BISECTION_ITERATIONS {
            let mid = 0.5 * (lo + hi);
            let value = self.eval_throughput(mid)?;
            if value >= target {
                hi = mid;
                if (value - target) / target <= BISECTION_TOLERANCE {
                    return Ok(mid);
                }
            } else {
                lo = mid;
            }
            if hi - lo <= BRACKET_FRACTION * max {
                break;
            }
        }
        Ok(hi)
    }

    /// Sample the rate/latency curve across the stable interval. Points the
    /// model rejects are skipped rather than emitted as zeros.
    fn sample_curve(&mut self) -> Vec<CurvePoint> {
        let mut curve = Vec::with_capacity(CURVE_SAMPLES);
        for i in 1..=CURVE_SAMPLES {
            let rate = self.rate_range.max * i as f64 / CURVE_SAMPLES as f64;
            if self.solve_at(rate).is_err() {
                continue;
            }
            curve.push(CurvePoint {
                rate,
                ttft: self.ttft_at(),
                itl: self.itl_at(),
                throughput: self.model.as_model().throughput() * MS_PER_SEC,
            });
        }
        curve
    }
}

/// Total per-request service time at batch size `b`, in ms.
fn service_time_ms(parms: &ServiceParms, size: &RequestSize, b: f64) -> f64 {
    let prefill = parms.prefill.gamma + parms.prefill.delta * size.avg_input_tokens as f64 * b;
    let decode = (parms.decode.alpha + parms.decode.beta * b) * size.avg_output_tokens as f64;
    prefill + decode
}
