//! M/M/1/K — finite-capacity queue with Markovian arrivals and service
//!
//! Closed-form state probabilities: for `rho != 1`,
//! `p[n] = rho^n * (1 - rho) / (1 - rho^(K+1))`; at the `rho == 1` limit the
//! distribution is uniform, `p[n] = 1 / (K + 1)`.

use std::fmt;

use super::{ModelState, QueueModel};

/// Threshold below which `1 - rho` is treated as zero and the uniform limit
/// form is used, protecting the geometric series near saturation.
const RHO_ONE_EPSILON: f64 = 1e-9;

/// Finite-capacity single-server queue with exponential service times.
#[derive(Debug, Clone)]
pub struct Mm1k {
    k: usize,
    p: Vec<f64>,
    state: ModelState,
}

impl Mm1k {
    /// Create a solver with system capacity `k` (in-service + queued).
    pub fn new(k: usize) -> Self {
        Self {
            k,
            p: vec![0.0; k + 1],
            state: ModelState::default(),
        }
    }

    fn compute_probabilities(&mut self) {
        let rho = self.state.rho;
        let k = self.k;
        if (1.0 - rho).abs() < RHO_ONE_EPSILON {
            let uniform = 1.0 / (k as f64 + 1.0);
            for p in self.p.iter_mut() {
                *p = uniform;
            }
            return;
        }
        let norm = (1.0 - rho) / (1.0 - rho.powi(k as i32 + 1));
        let mut rho_n = 1.0;
        for n in 0..=k {
            self.p[n] = rho_n * norm;
            rho_n *= rho;
        }
    }
}

impl QueueModel for Mm1k {
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
        1.0
    }

    fn compute_rho(&self) -> f64 {
        if self.state.lambda == self.state.mu {
            1.0
        } else {
            self.state.lambda / self.state.mu
        }
    }

    fn compute_statistics(&mut self) {
        self.compute_probabilities();

        let mut avg_num = 0.0;
        for (n, p) in self.p.iter().enumerate() {
            avg_num += n as f64 * p;
        }
        let throughput = self.state.lambda * (1.0 - self.p[self.k]);
        let serv_time = 1.0 / self.state.mu;

        let st = &mut self.state;
        st.avg_num_in_system = avg_num;
        st.throughput = throughput;
        st.avg_serv_time = serv_time;
        if throughput > 0.0 {
            st.avg_resp_time = avg_num / throughput;
            st.avg_wait_time = (st.avg_resp_time - serv_time).max(0.0);
            st.avg_queue_length = throughput * st.avg_wait_time;
        }
    }
}

impl fmt::Display for Mm1k {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mm1k: {}", self.summary())
    }
}
