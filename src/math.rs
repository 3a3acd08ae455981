//! Scalar shaping functions shared by the estimator and the controller.
//!
//! Every normalised quantity in the pipeline goes through [`clamp`] before
//! it leaves a calculation, so the helpers here are deliberately total:
//! NaN inputs collapse to the lower bound and a zero-width Gaussian returns
//! zero instead of dividing by zero.

/// Clamp `v` into `[lo, hi]`.  NaN maps to `lo`.
pub fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    if v.is_nan() {
        return lo;
    }
    v.max(lo).min(hi)
}

/// Logistic curve centred on `center` with slope `steepness`.
pub fn sigmoid(x: f64, center: f64, steepness: f64) -> f64 {
    1.0 / (1.0 + (-steepness * (x - center)).exp())
}

/// `exp(-rate * x)`.
pub fn exponential_decay(x: f64, rate: f64) -> f64 {
    (-rate * x).exp()
}

/// Unnormalised Gaussian match of `x` against `center` with width `sigma`.
///
/// Returns 1.0 at the centre, falling towards 0.0.  A non-positive `sigma`
/// yields 0.0.
pub fn gaussian(x: f64, center: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 || sigma.is_nan() {
        return 0.0;
    }
    let z = (x - center) / sigma;
    (-0.5 * z * z).exp()
}
