//! State-dependent service-rate variants
//!
//! Service rate is a vector `mu[0..num-1]`; at queue state `n` the effective
//! rate is `mu[min(n, num) - 1]`, modelling batched inference where the
//! aggregate completion rate changes with the number of requests in flight
//! up to the saturation batch size.
//!
//! Both variants share the same birth-death balance equations for the state
//! probabilities: for Poisson arrivals these depend only on the arrival/
//! service rate balance, not the service-time distribution. The distribution
//! shape enters through the waiting time: the deterministic variant applies
//! the Pollaczek-Khintchine correction (`C_s^2 = 0` vs `C_s^2 = 1`
//! exponential), halving the exponential-service wait, then restores
//! `R = W + S` and Little's Law.
//!
//! Utilization for these variants is server utilization `1 - p[0]`.

use std::fmt;

use super::{ModelState, QueueModel};

/// Rescale threshold for the incremental balance-equation products; keeps
/// `prod(lambda / mu[k])` finite for large `K` without changing ratios.
const RESCALE_THRESHOLD: f64 = 1e150;

/// Solve the balance equations `lambda * p[n] = mu[n] * p[n+1]` and
/// normalize. Products are rescaled incrementally against overflow.
fn balance_probabilities(k: usize, lambda: f64, serv_rate: &[f64], p: &mut [f64]) {
    let num = serv_rate.len();
    p[0] = 1.0;
    for i in 1..=k {
        let idx = (i - 1).min(num - 1);
        p[i] = p[i - 1] * lambda / serv_rate[idx];
        if p[i] > RESCALE_THRESHOLD {
            let scale = p[i];
            for q in p[..=i].iter_mut() {
                *q /= scale;
            }
        }
    }
    let sum: f64 = p.iter().sum();
    for q in p.iter_mut() {
        *q /= sum;
    }
}

/// Average number in service `E[min(N, num)]` and in system `E[N]`.
fn occupancy(k: usize, num: usize, p: &[f64]) -> (f64, f64) {
    let mut in_system = 0.0;
    let mut in_servers = 0.0;
    let mut cumulative = p[0];
    for i in 1..=k {
        in_system += i as f64 * p[i];
        cumulative += p[i];
        if i == num {
            in_servers = in_system + (1.0 - cumulative) * num as f64;
        }
    }
    if num > k {
        in_servers = in_system;
    }
    (in_servers, in_system)
}

// ---------------------------------------------------------------------------
// Mm1StateDependent
// ---------------------------------------------------------------------------

/// M/M/1/K with a state-dependent service-rate vector.
#[derive(Debug, Clone)]
pub struct Mm1StateDependent {
    k: usize,
    serv_rate: Vec<f64>,
    p: Vec<f64>,
    avg_num_in_servers: f64,
    state: ModelState,
}

impl Mm1StateDependent {
    /// Create a solver with capacity `k` and per-state service rates.
    ///
    /// `serv_rate[b-1]` is the aggregate completion rate with `b` requests in
    /// the system; states beyond the vector reuse the last entry.
    pub fn new(k: usize, serv_rate: Vec<f64>) -> Self {
        debug_assert!(!serv_rate.is_empty(), "service-rate vector must be non-empty");
        // A fresh solver models an empty system: p[0] = 1 keeps the
        // provisional utilization check meaningful on the first solve.
        let mut p = vec![0.0; k + 1];
        p[0] = 1.0;
        Self {
            k,
            serv_rate,
            p,
            avg_num_in_servers: 0.0,
            state: ModelState::default(),
        }
    }

    /// Average number of requests in service, `E[min(N, num)]` — the
    /// effective batch size seen by a request.
    pub fn avg_num_in_servers(&self) -> f64 {
        self.avg_num_in_servers
    }
}

impl QueueModel for Mm1StateDependent {
    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }

    fn capacity(&self) -> usize {
        self.k
    }

    fn probabilities(&self) -> &[f64] {
        &self.p
    }

    fn rho_max(&self) -> f64 {
        self.k as f64
    }

    fn compute_rho(&self) -> f64 {
        1.0 - self.p[0]
    }

    fn compute_statistics(&mut self) {
        balance_probabilities(self.k, self.state.lambda, &self.serv_rate, &mut self.p);
        self.state.rho = 1.0 - self.p[0];

        let (in_servers, in_system) = occupancy(self.k, self.serv_rate.len(), &self.p);
        self.avg_num_in_servers = in_servers;

        let throughput = self.state.lambda * (1.0 - self.p[self.k]);
        let st = &mut self.state;
        st.avg_num_in_system = in_system;
        st.throughput = throughput;
        if throughput > 0.0 {
            st.avg_resp_time = in_system / throughput;
            st.avg_serv_time = in_servers / throughput;
            st.avg_wait_time = (st.avg_resp_time - st.avg_serv_time).max(0.0);
            st.avg_queue_length = throughput * st.avg_wait_time;
        }
    }
}

impl fmt::Display for Mm1StateDependent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Mm1StateDependent: {}; num={}",
            self.summary(),
            self.serv_rate.len()
        )
    }
}

// ---------------------------------------------------------------------------
// Md1StateDependent
// ---------------------------------------------------------------------------

/// M/D/1/K with a state-dependent service-rate vector.
///
/// State probabilities follow the same balance equations as the exponential
/// variant; the deterministic service distribution halves the waiting time
/// via the Pollaczek-Khintchine correction. This is an approximation, not an
/// exact state-dependent M/D/1/K; treat its rate estimates as conservative.
#[derive(Debug, Clone)]
pub struct Md1StateDependent {
    k: usize,
    serv_rate: Vec<f64>,
    p: Vec<f64>,
    avg_num_in_servers: f64,
    state: ModelState,
}

impl Md1StateDependent {
    /// Create a solver with capacity `k` and per-state service rates.
    pub fn new(k: usize, serv_rate: Vec<f64>) -> Self {
        debug_assert!(!serv_rate.is_empty(), "service-rate vector must be non-empty");
        let mut p = vec![0.0; k + 1];
        p[0] = 1.0;
        Self {
            k,
            serv_rate,
            p,
            avg_num_in_servers: 0.0,
            state: ModelState::default(),
        }
    }

    /// Average number of requests in service, `E[min(N, num)]`.
    pub fn avg_num_in_servers(&self) -> f64 {
        self.avg_num_in_servers
    }
}

impl QueueModel for Md1StateDependent {
    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }

    fn capacity(&self) -> usize {
        self.k
    }

    fn probabilities(&self) -> &[f64] {
        &self.p
    }

    fn rho_max(&self) -> f64 {
        self.k as f64
    }

    fn compute_rho(&self) -> f64 {
        1.0 - self.p[0]
    }

    fn compute_statistics(&mut self) {
        tracing::debug!(
            lambda = self.state.lambda,
            mu = self.state.mu,
            "solving state-dependent deterministic model"
        );

        balance_probabilities(self.k, self.state.lambda, &self.serv_rate, &mut self.p);
        self.state.rho = 1.0 - self.p[0];

        let (in_servers, in_system) = occupancy(self.k, self.serv_rate.len(), &self.p);
        self.avg_num_in_servers = in_servers;

        let throughput = self.state.lambda * (1.0 - self.p[self.k]);
        let st = &mut self.state;
        st.throughput = throughput;
        if throughput <= 0.0 {
            return;
        }

        // Wait as if service were exponential, then the deterministic-service
        // correction: M/D/1 waits half as long as M/M/1 (C_s^2 = 0 vs 1).
        let resp_as_if_mm1k = in_system / throughput;
        let serv_time = in_servers / throughput;
        let wait_as_if_mm1k = resp_as_if_mm1k - serv_time;
        st.avg_wait_time = (0.5 * wait_as_if_mm1k).max(0.0);
        st.avg_serv_time = serv_time;

        // Restore R = W + S and N = X * R after the correction.
        st.avg_resp_time = st.avg_wait_time + st.avg_serv_time;
        st.avg_num_in_system = throughput * st.avg_resp_time;
        st.avg_queue_length = throughput * st.avg_wait_time;
    }
}

impl fmt::Display for Md1StateDependent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Md1StateDependent: {}; num={}",
            self.summary(),
            self.serv_rate.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::test_support::{assert_littles_law, assert_normalized};

    fn constant_rates(mu: f64, num: usize) -> Vec<f64> {
        vec![mu; num]
    }

    // --- Balance equations ---

    #[test]
    fn test_balance_matches_geometric_for_constant_rate() {
        // Constant mu reduces to the classic M/M/1/K geometric shape.
        let mut p = vec![0.0; 11];
        balance_probabilities(10, 0.5, &[1.0], &mut p);
        for n in 0..10 {
            assert!((p[n + 1] / p[n] - 0.5).abs() < 1e-12);
        }
        let sum: f64 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_balance_large_k_stays_finite() {
        // lambda > mu would overflow the raw product at K=500 without the
        // incremental rescale.
        let mut p = vec![0.0; 501];
        balance_probabilities(500, 2.0, &[1.0], &mut p);
        assert!(p.iter().all(|v| v.is_finite()));
        let sum: f64 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        // Mass concentrates at the cap when overloaded.
        assert!(p[500] > p[0]);
    }

    #[test]
    fn test_occupancy_saturates_at_num() {
        let mut p = vec![0.0; 6];
        // All mass at state 5 with num = 2: everyone sees a full batch.
        p[5] = 1.0;
        let (in_servers, in_system) = occupancy(5, 2, &p);
        assert_eq!(in_system, 5.0);
        assert_eq!(in_servers, 2.0);
    }

    #[test]
    fn test_occupancy_num_beyond_capacity() {
        let mut p = vec![0.0; 4];
        p[3] = 1.0;
        let (in_servers, in_system) = occupancy(3, 8, &p);
        assert_eq!(in_system, 3.0);
        assert_eq!(in_servers, 3.0);
    }

    // --- Mm1StateDependent ---

    #[test]
    fn test_mm1_state_dependent_valid_solve() {
        let mut m = Mm1StateDependent::new(10, constant_rates(1.0, 5));
        m.solve(0.5, 1.0);

        assert!(m.is_valid());
        assert!(m.rho() > 0.0 && m.rho() < 1.0);
        assert!(m.throughput() > 0.0 && m.throughput() <= 0.5);
        assert!(m.avg_wait_time() >= 0.0);
        assert!(m.avg_serv_time() > 0.0);
        assert_normalized(&m);
        assert_littles_law(&m);
    }

    #[test]
    fn test_mm1_state_dependent_rho_is_server_utilization() {
        let mut m = Mm1StateDependent::new(10, constant_rates(1.0, 5));
        m.solve(0.5, 1.0);
        assert!((m.rho() - (1.0 - m.probabilities()[0])).abs() < 1e-12);
    }

    #[test]
    fn test_mm1_state_dependent_batch_size_grows_with_load() {
        let mut m = Mm1StateDependent::new(40, constant_rates(1.0, 8));
        m.solve(0.2, 1.0);
        let low = m.avg_num_in_servers();
        m.solve(0.9, 1.0);
        let high = m.avg_num_in_servers();
        assert!(high > low);
        assert!(high <= 8.0);
    }

    // --- Md1StateDependent ---

    #[test]
    fn test_md1_state_dependent_valid_solve() {
        let mut m = Md1StateDependent::new(10, constant_rates(1.0, 5));
        m.solve(0.5, 1.0);

        assert!(m.is_valid());
        assert!(m.throughput() > 0.0);
        assert_normalized(&m);
        assert_littles_law(&m);
    }

    #[test]
    fn test_md1_wait_is_half_of_mm1_wait() {
        // Identical balance-equation probabilities mean the deterministic
        // variant's wait is exactly half before flooring.
        let lambda = 0.7;
        let rates = constant_rates(1.0, 8);

        let mut mm1 = Mm1StateDependent::new(20, rates.clone());
        let mut md1 = Md1StateDependent::new(20, rates);
        mm1.solve(lambda, 1.0);
        md1.solve(lambda, 1.0);

        assert!(mm1.is_valid() && md1.is_valid());
        let ratio = md1.avg_wait_time() / mm1.avg_wait_time();
        assert!(
            (0.4..=0.6).contains(&ratio),
            "wait ratio should be near 0.5, got {ratio}"
        );
        assert!(md1.avg_wait_time() <= mm1.avg_wait_time());
    }

    #[test]
    fn test_md1_state_dependent_littles_law_after_correction() {
        let mut m = Md1StateDependent::new(30, constant_rates(0.8, 6));
        m.solve(0.6, 0.8);
        assert_littles_law(&m);
    }

    #[test]
    fn test_identical_probabilities_across_variants() {
        let rates = constant_rates(1.0, 4);
        let mut mm1 = Mm1StateDependent::new(12, rates.clone());
        let mut md1 = Md1StateDependent::new(12, rates);
        mm1.solve(0.4, 1.0);
        md1.solve(0.4, 1.0);
        for (a, b) in mm1.probabilities().iter().zip(md1.probabilities()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_increasing_rates_model_batching() {
        // Completion rate grows with batch size up to saturation.
        let rates = vec![1.0, 1.8, 2.4, 2.8, 3.0];
        let mut m = Md1StateDependent::new(50, rates);
        m.solve(2.5, 1.0);
        assert!(m.is_valid());
        assert!(m.throughput() > 1.0, "batching must lift throughput past mu[0]");
        assert_normalized(&m);
    }

    #[test]
    fn test_zero_lambda_state_dependent() {
        let mut m = Md1StateDependent::new(10, constant_rates(1.0, 4));
        m.solve(0.0, 1.0);
        assert!(m.is_valid());
        assert!((m.probabilities()[0] - 1.0).abs() < 1e-12);
        assert_eq!(m.throughput(), 0.0);
        assert_eq!(m.rho(), 0.0);
    }

    #[test]
    fn test_wait_monotone_in_lambda() {
        let rates = constant_rates(1.0, 8);
        let mut m = Md1StateDependent::new(40, rates);
        let mut last = -1.0;
        for lambda in [0.1, 0.3, 0.5, 0.7, 0.9] {
            m.solve(lambda, 1.0);
            assert!(m.is_valid());
            let w = m.avg_wait_time();
            assert!(w >= last, "wait must be non-decreasing in lambda");
            last = w;
        }
    }

    // --- Display ---

    #[test]
    fn test_display_includes_vector_length() {
        let m = Mm1StateDependent::new(10, constant_rates(1.0, 5));
        assert!(m.to_string().contains("num=5"));
        let d = Md1StateDependent::new(10, constant_rates(1.0, 3));
        assert!(d.to_string().starts_with("Md1StateDependent:"));
    }
}
