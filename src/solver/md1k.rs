//! M/D/1/K — finite-capacity queue with deterministic service times
//!
//! State probabilities come from the embedded Markov chain observed at
//! service-completion epochs: during one deterministic service interval
//! `S = 1/mu`, the number of Poisson arrivals has mean `a = lambda * S`.
//! From state `n >= 1` the chain moves to `min(K, n - 1 + j)` with
//! probability `Poisson(j; a)`; an empty system waits for the arrival that
//! restarts the busy period, so the completion that follows leaves behind the
//! `j` arrivals accumulated during that first service.

use std::fmt;

use super::{ModelState, QueueModel};

const MAX_ITERATIONS: usize = 10_000;
const CONVERGENCE_TOLERANCE: f64 = 1e-8;

/// Mean above which Poisson terms are evaluated in log-space; the direct
/// `exp(-a) * a^j / j!` form underflows long before the ratio does.
const LOG_SPACE_THRESHOLD: f64 = 50.0;

/// Finite-capacity single-server queue with deterministic service times.
#[derive(Debug, Clone)]
pub struct Md1k {
    k: usize,
    p: Vec<f64>,
    state: ModelState,
}

impl Md1k {
    /// Create a solver with system capacity `k` (in-service + queued).
    pub fn new(k: usize) -> Self {
        Self {
            k,
            p: vec![0.0; k + 1],
            state: ModelState::default(),
        }
    }

    /// Iterate the embedded chain from a uniform start until the max
    /// element-wise change drops below tolerance, then renormalize (the
    /// truncation at `K` sheds a little mass each step).
    fn compute_probabilities(&mut self) {
        let k = self.k;
        let uniform = 1.0 / (k as f64 + 1.0);
        for p in self.p.iter_mut() {
            *p = uniform;
        }

        let service_time = 1.0 / self.state.mu;
        let a = self.state.lambda * service_time;

        // Arrival-count pmf is the same for every state; compute it once.
        let poisson: Vec<f64> = (0..=k).map(|j| poisson_pmf(j, a)).collect();

        let mut p_new = vec![0.0; k + 1];
        for _ in 0..MAX_ITERATIONS {
            p_new.iter_mut().for_each(|v| *v = 0.0);

            for n in 0..=k {
                // From the empty state the next completion leaves behind the
                // arrivals seen during the busy-period-restarting service, so
                // row 0 shares row 1's arrival distribution.
                let base = n.saturating_sub(1);
                for (j, prob) in poisson.iter().enumerate() {
                    let next = (base + j).min(k);
                    p_new[next] += self.p[n] * prob;
                }
            }

            let mut max_diff: f64 = 0.0;
            for i in 0..=k {
                max_diff = max_diff.max((p_new[i] - self.p[i]).abs());
            }
            self.p.copy_from_slice(&p_new);

            if max_diff < CONVERGENCE_TOLERANCE {
                break;
            }
        }

        let sum: f64 = self.p.iter().sum();
        if sum > 0.0 {
            for p in self.p.iter_mut() {
                *p /= sum;
            }
        }
    }
}

impl QueueModel for Md1k {
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

impl fmt::Display for Md1k {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Md1k: {}", self.summary())
    }
}

/// Poisson pmf `P(X = j)` for mean `a`.
pub(crate) fn poisson_pmf(j: usize, a: f64) -> f64 {
    if a <= 0.0 {
        return if j == 0 { 1.0 } else { 0.0 };
    }
    if a > LOG_SPACE_THRESHOLD {
        let ln_p = -a + (j as f64) * a.ln() - ln_factorial(j);
        ln_p.exp()
    } else {
        (-a).exp() * a.powi(j as i32) / factorial(j)
    }
}

/// Factorials up to 20! fit exactly in an f64 mantissa.
const FACTORIAL_TABLE: [f64; 21] = [
    1.0,
    1.0,
    2.0,
    6.0,
    24.0,
    120.0,
    720.0,
    5040.0,
    40320.0,
    362880.0,
    3628800.0,
    39916800.0,
    479001600.0,
    6227020800.0,
    87178291200.0,
    1307674368000.0,
    20922789888000.0,
    355687428096000.0,
    6402373705728000.0,
    121645100408832000.0,
    2432902008176640000.0,
];

/// Factorial via table for `n <= 20`, iteratively above, falling back to
/// Stirling's approximation `sqrt(2*pi*n) * (n/e)^n` if the product
/// overflows.
pub(crate) fn factorial(n: usize) -> f64 {
    if n <= 20 {
        return FACTORIAL_TABLE[n];
    }
    let mut result = FACTORIAL_TABLE[20];
    for i in 21..=n {
        result *= i as f64;
        if result.is_infinite() {
            return stirling(n);
        }
    }
    result
}

fn stirling(n: usize) -> f64 {
    let n = n as f64;
    (2.0 * std::f64::consts::PI * n).sqrt() * (n / std::f64::consts::E).powf(n)
}

/// `ln(n!)`, exact from the table for small `n`, Stirling form above.
pub(crate) fn ln_factorial(n: usize) -> f64 {
    if n <= 20 {
        return FACTORIAL_TABLE[n].ln();
    }
    let n = n as f64;
    0.5 * (2.0 * std::f64::consts::PI * n).ln() + n * (n.ln() - 1.0)
}
