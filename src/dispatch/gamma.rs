//! Gamma evidence model: log-likelihood, gradients and maximum likelihood.
//!
//! All functions work on aggregated sufficient statistics
//! `(S, L, N) = (Σd, Σ ln d, Σ 1)`, possibly posterior-weighted, so a single
//! call covers a whole batch of examples.
//!
//! With shape `k` and scale `θ`:
//! - `ℓ(k, θ) = (k − 1) L − S/θ − N k ln θ − N ln Γ(k)`
//! - `∂ℓ/∂ln k = k (L − N ln θ − N ψ(k))`
//! - `∂ℓ/∂ln θ = S/θ − N k`
use statrs::function::gamma::{digamma, ln_gamma};

use crate::{engine::GammaCounts, optimization::numerical_stability::trigamma};

/// Upper cap on fitted shapes; reached when all observations coincide.
pub const MAX_SHAPE: f64 = 1e6;
const NEWTON_MAX_ITER: usize = 100;
const NEWTON_REL_TOL: f64 = 1e-12;

/// Express statistics of `d` in units of `d / scale`.
pub fn rebase(counts: GammaCounts, scale: f64) -> GammaCounts {
    GammaCounts {
        sum: counts.sum / scale,
        sum_log: counts.sum_log - counts.count * scale.ln(),
        count: counts.count,
    }
}

pub fn log_likelihood(counts: &GammaCounts, shape: f64, scale: f64) -> f64 {
    if counts.count == 0.0 {
        return 0.0;
    }
    (shape - 1.0) * counts.sum_log
        - counts.sum / scale
        - counts.count * shape * scale.ln()
        - counts.count * ln_gamma(shape)
}

/// Gradient of the log-likelihood with respect to `(ln k, ln θ)`.
pub fn log_param_gradient(counts: &GammaCounts, shape: f64, scale: f64) -> (f64, f64) {
    if counts.count == 0.0 {
        return (0.0, 0.0);
    }
    let d_log_shape =
        shape * (counts.sum_log - counts.count * scale.ln() - counts.count * digamma(shape));
    let d_log_scale = counts.sum / scale - counts.count * shape;
    (d_log_shape, d_log_scale)
}

/// Maximum-likelihood `(k, θ)` for the given statistics.
///
/// Solves `ln k − ψ(k) = ln(S/N) − L/N` by Newton's method from the
/// Minka starting point, then sets `θ = S / (N k)`. Returns `None` when the
/// statistics carry no information (`N ≤ 0` or `S ≤ 0`).
pub fn fit_gamma_mle(counts: &GammaCounts) -> Option<(f64, f64)> {
    if !(counts.count > 0.0 && counts.sum > 0.0) {
        return None;
    }
    let s = (counts.sum / counts.count).ln() - counts.sum_log / counts.count;
    let shape = if s <= 0.0 {
        MAX_SHAPE
    } else {
        let mut k = ((3.0 - s + ((s - 3.0).powi(2) + 24.0 * s).sqrt()) / (12.0 * s)).min(MAX_SHAPE);
        for _ in 0..NEWTON_MAX_ITER {
            let f = k.ln() - digamma(k) - s;
            let df = 1.0 / k - trigamma(k);
            let mut next = k - f / df;
            if !(next > 0.0) {
                next = k / 2.0;
            }
            let done = (next - k).abs() <= NEWTON_REL_TOL * k;
            k = next.min(MAX_SHAPE);
            if done || k >= MAX_SHAPE {
                break;
            }
        }
        k
    };
    Some((shape, counts.sum / (counts.count * shape)))
}
