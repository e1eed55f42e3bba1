//! Numerical stability utilities.
//!
//! Log-domain accumulation and special functions used by the inference
//! engine, the evidence (Gamma) statistics and the hyperparameter search.
//!
//! # Provided items
//! - [`log_add_exp`]: stable `ln(eᵃ + eᵇ)`, never smaller than either input.
//! - [`safe_exp`]: `exp(x)` with the exponent clamped to [`MAX_LOG_MAGNITUDE`].
//! - [`trigamma`]: ψ′(x) for x > 0 (not provided by `statrs`).
//! - [`clamp_roundoff`]: maps tiny negative round-off to zero.

/// Largest magnitude allowed in the exponent of [`safe_exp`].
///
/// `exp(700)` is still finite in `f64`; beyond that it overflows.
pub const MAX_LOG_MAGNITUDE: f64 = 700.0;

/// Default tolerance under which a negative value is treated as round-off.
pub const ROUNDOFF_TOL: f64 = 1e-6;

/// Numerically stable `ln(exp(a) + exp(b))`.
///
/// Uses `max + ln1p(exp(min − max))`. Since the correction term is never
/// negative the result is ≥ `max(a, b)`, which keeps accumulated log scores
/// monotone in their inputs. `−∞` acts as the additive identity.
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// `exp(x)` with `x` clamped to `[−MAX_LOG_MAGNITUDE, MAX_LOG_MAGNITUDE]`.
pub fn safe_exp(x: f64) -> f64 {
    x.clamp(-MAX_LOG_MAGNITUDE, MAX_LOG_MAGNITUDE).exp()
}

/// Trigamma function ψ′(x) for `x > 0`.
///
/// Shifts `x` upward with the recurrence ψ′(x) = ψ′(x + 1) + 1/x² until
/// `x ≥ 10`, then applies the asymptotic series
/// `1/x + 1/(2x²) + 1/(6x³) − 1/(30x⁵) + 1/(42x⁷) − 1/(30x⁹)`.
/// Returns `NaN` for non-positive or non-finite input.
pub fn trigamma(x: f64) -> f64 {
    if !(x.is_finite() && x > 0.0) {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 10.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    let series =
        inv + 0.5 * inv2 + inv * inv2 * (1.0 / 6.0 - inv2 * (1.0 / 30.0 - inv2 * (1.0 / 42.0 - inv2 / 30.0)));
    acc + series
}

/// Map values in `[−tol, 0)` to `0.0`; everything else is returned unchanged.
pub fn clamp_roundoff(value: f64, tol: f64) -> f64 {
    if value < 0.0 && value >= -tol { 0.0 } else { value }
}
