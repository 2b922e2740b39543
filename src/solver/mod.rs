//! Finite-capacity queueing solvers
//!
//! Models a serving replica as a single-server queue with system capacity `K`
//! (in-service plus queued). Four solvers share one solve contract:
//!
//! - [`Mm1k`] — Poisson arrivals, exponential service, constant rate
//! - [`Md1k`] — Poisson arrivals, deterministic service, constant rate
//! - [`Mm1StateDependent`] / [`Md1StateDependent`] — service rate varies with
//!   the number of requests in the system, modelling batching
//!
//! The [`QueueModel`] trait carries the capability set
//! `{compute_rho, rho_max, compute_statistics}`; the provided `solve` method
//! orchestrates input capture, the validity check, and statistics evaluation.

mod md1k;
mod mm1k;
mod state_dependent;

pub use md1k::Md1k;
pub use mm1k::Mm1k;
pub use state_dependent::{Md1StateDependent, Mm1StateDependent};

/// Inputs and derived statistics shared by all solvers.
///
/// All rates are requests per unit time; all times are in the reciprocal
/// unit. Derived fields are zero until a valid `solve` completes.
#[derive(Debug, Clone, Default)]
pub struct ModelState {
    lambda: f64,
    mu: f64,
    rho: f64,
    is_valid: bool,
    avg_num_in_system: f64,
    avg_resp_time: f64,
    avg_serv_time: f64,
    avg_wait_time: f64,
    avg_queue_length: f64,
    throughput: f64,
}

impl ModelState {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Solve contract shared by the queueing solvers.
///
/// Subtypes supply the utilization policy (`compute_rho`, `rho_max`) and the
/// statistics evaluation; the provided `solve` sequences them. After a valid
/// solve, `avg_resp_time == avg_wait_time + avg_serv_time` and
/// `avg_num_in_system == throughput * avg_resp_time` (Little's Law) hold.
pub trait QueueModel {
    /// Shared solver state (inputs, validity, derived statistics).
    fn state(&self) -> &ModelState;

    /// Mutable access for the solve template and subclass statistics.
    fn state_mut(&mut self) -> &mut ModelState;

    /// System capacity `K` (in-service + queued).
    fn capacity(&self) -> usize;

    /// Steady-state probability vector `p[0..=K]`.
    fn probabilities(&self) -> &[f64];

    /// Utilization ceiling for the validity check.
    fn rho_max(&self) -> f64;

    /// Utilization from the current inputs (or probabilities, for
    /// state-dependent solvers).
    fn compute_rho(&self) -> f64;

    /// Evaluate derived statistics. Only called on a valid model.
    fn compute_statistics(&mut self);

    /// Solve the model for arrival rate `lambda` and service rate `mu`.
    ///
    /// Resets derived statistics, records the inputs, computes a provisional
    /// utilization, and evaluates statistics when
    /// `lambda >= 0 && mu > 0 && rho < rho_max()`. On an invalid model all
    /// derived statistics stay zero.
    fn solve(&mut self, lambda: f64, mu: f64) {
        {
            let st = self.state_mut();
            st.reset();
            st.lambda = lambda;
            st.mu = mu;
        }
        let rho = self.compute_rho();
        let valid = lambda >= 0.0 && mu > 0.0 && rho < self.rho_max();
        {
            let st = self.state_mut();
            st.rho = rho;
            st.is_valid = valid;
        }
        if valid {
            self.compute_statistics();
        }
    }

    /// Whether the last solve produced a valid model.
    fn is_valid(&self) -> bool {
        self.state().is_valid
    }

    /// Arrival rate from the last solve.
    fn lambda(&self) -> f64 {
        self.state().lambda
    }

    /// Service rate from the last solve.
    fn mu(&self) -> f64 {
        self.state().mu
    }

    /// Server utilization.
    fn rho(&self) -> f64 {
        self.state().rho
    }

    /// Effective departure rate `X = lambda * (1 - p[K])`.
    fn throughput(&self) -> f64 {
        self.state().throughput
    }

    /// Average number of requests in the system `N`.
    fn avg_num_in_system(&self) -> f64 {
        self.state().avg_num_in_system
    }

    /// Average response time `R = W + S`.
    fn avg_resp_time(&self) -> f64 {
        self.state().avg_resp_time
    }

    /// Average service time `S`.
    fn avg_serv_time(&self) -> f64 {
        self.state().avg_serv_time
    }

    /// Average waiting time `W` (never negative).
    fn avg_wait_time(&self) -> f64 {
        self.state().avg_wait_time
    }

    /// Average queue length `L_q = X * W`.
    fn avg_queue_length(&self) -> f64 {
        self.state().avg_queue_length
    }

    /// One-line summary used by the solver `Display` impls.
    fn summary(&self) -> String {
        let st = self.state();
        format!(
            "lambda={:.6}; mu={:.6}; rho={:.4}; valid={}; K={}",
            st.lambda,
            st.mu,
            st.rho,
            st.is_valid,
            self.capacity()
        )
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::QueueModel;

    /// Assert the Little's Law identities hold within 1% after a valid solve.
    pub fn assert_littles_law<M: QueueModel>(model: &M) {
        assert!(model.is_valid(), "model must be valid");
        let r = model.avg_resp_time();
        let w = model.avg_wait_time();
        let s = model.avg_serv_time();
        let n = model.avg_num_in_system();
        let x = model.throughput();
        assert!(
            (r - (w + s)).abs() <= 0.01 * r.max(1e-12),
            "R = W + S violated: R={r}, W={w}, S={s}"
        );
        assert!(
            (n - x * r).abs() <= 0.01 * n.max(1e-12),
            "N = X * R violated: N={n}, X={x}, R={r}"
        );
    }

    /// Assert the probability vector is normalized.
    pub fn assert_normalized<M: QueueModel>(model: &M) {
        let sum: f64 = model.probabilities().iter().sum();
        assert!(
            (sum - 1.0).abs() < 1e-6,
            "probabilities must sum to 1, got {sum}"
        );
    }
}
