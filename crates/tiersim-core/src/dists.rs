//! Random-variate samplers and the shared simulation PRNG.
//!
//! A [`Cdf`] is an inverse-CDF sampler: a pure mapping from a uniform
//! variate `p in [0,1]` to a value in the distribution's domain. The engine
//! draws `p` from the single seeded [`SimRng`] and evaluates the configured
//! distribution, which keeps every variate in a run reproducible from one
//! seed. Out-of-range `p` clamps to the distribution's domain.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::Exp;
use serde::{Deserialize, Serialize};

/// Inverse-CDF sampler for the latency, size and resource-cost
/// distributions used throughout a topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dist", rename_all = "snake_case")]
pub enum Cdf {
    /// Uniform over `[low, high]`, linear interpolation.
    Uniform { low: f64, high: f64 },
    /// Normal with the given mean and standard deviation, truncated at zero.
    Normal { mean: f64, std_dev: f64 },
    /// Log-normal: `exp(mu + sigma * z)`.
    LogNormal { mu: f64, sigma: f64 },
    /// Pareto with scale `x_m` and shape `alpha`.
    Pareto { scale: f64, shape: f64 },
}

impl Cdf {
    pub fn uniform(low: f64, high: f64) -> Self {
        assert!(low <= high, "Uniform low must not exceed high");
        Cdf::Uniform { low, high }
    }

    pub fn normal(mean: f64, std_dev: f64) -> Self {
        assert!(std_dev >= 0.0, "Normal std_dev must be non-negative");
        Cdf::Normal { mean, std_dev }
    }

    pub fn log_normal(mu: f64, sigma: f64) -> Self {
        assert!(sigma >= 0.0, "LogNormal sigma must be non-negative");
        Cdf::LogNormal { mu, sigma }
    }

    pub fn pareto(scale: f64, shape: f64) -> Self {
        assert!(scale > 0.0, "Pareto scale must be positive");
        assert!(shape > 0.0, "Pareto shape must be positive");
        Cdf::Pareto { scale, shape }
    }

    /// Evaluate the inverse CDF at `p`, clamping `p` into `[0, 1]`.
    pub fn sample(&self, p: f64) -> f64 {
        let p = p.clamp(0.0, 1.0);
        match *self {
            Cdf::Uniform { low, high } => low + p * (high - low),
            Cdf::Normal { mean, std_dev } => {
                (mean + std_dev * inverse_normal_cdf(interior(p))).max(0.0)
            }
            Cdf::LogNormal { mu, sigma } => (mu + sigma * inverse_normal_cdf(interior(p))).exp(),
            Cdf::Pareto { scale, shape } => {
                let p = p.min(1.0 - 1e-12);
                scale / (1.0 - p).powf(1.0 / shape)
            }
        }
    }
}

/// Pull `p` off the endpoints, where the normal quantile diverges.
fn interior(p: f64) -> f64 {
    p.clamp(1e-12, 1.0 - 1e-12)
}

/// Inverse of the standard normal CDF (Acklam's rational approximation,
/// relative error below 1.15e-9 over the open unit interval).
fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

/// The simulation's single PRNG, seeded at loop construction so that runs
/// are hermetic and reproducible.
#[derive(Debug, Clone)]
pub struct SimRng {
    rng: ChaCha8Rng,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Next uniform variate in `[0, 1)`.
    pub fn p(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Sample an exponentially distributed duration (Poisson inter-arrival).
    pub fn sample_exp(&mut self, exp: Exp<f64>) -> f64 {
        self.rng.sample(exp)
    }
}
