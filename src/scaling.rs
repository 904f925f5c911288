use crate::error::{Result, TransformError};
use ndarray::{ArrayD, ArrayViewD};
use rand::Rng;
use rand_distr::StandardNormal;

/// `(x - mean) / (stddev + eps)`
pub fn normalize(x: ArrayViewD<f32>, mean: f32, stddev: f32, eps: f32) -> ArrayD<f32> {
    let denom = stddev + eps;
    x.mapv(|v| (v - mean) / denom)
}

/// mean of all elements, NaN for an empty tensor
pub fn mean(x: &ArrayViewD<f32>) -> f32 {
    x.mean().unwrap_or(f32::NAN)
}

/// unbiased standard deviation of all elements, NaN for fewer than two elements
pub fn std_dev(x: &ArrayViewD<f32>) -> f32 {
    if x.len() < 2 {
        return f32::NAN;
    }
    x.std(1.)
}

/// Normalizes `x` with its own mean and standard deviation. Returns the normalized tensor with
/// the statistics needed to undo it.
pub fn normalize_instance(x: ArrayViewD<f32>, eps: f32) -> (ArrayD<f32>, f32, f32) {
    let m = mean(&x);
    let s = std_dev(&x);
    (normalize(x, m, s, eps), m, s)
}

fn check_scale(scale: f32) -> Result<()> {
    if !(scale > 0.) {
        return Err(TransformError::config(format!("scale must be a positive value, got {scale}")));
    }
    Ok(())
}

/// `scale * sign(x) * ln(1 + |x|)`. Compresses the dynamic range of k-space while keeping the
/// sign, and maps zero to zero.
pub fn log_weighting(x: ArrayViewD<f32>, scale: f32) -> Result<ArrayD<f32>> {
    check_scale(scale)?;
    Ok(x.mapv(|v| scale * v.signum() * v.abs().ln_1p()))
}

/// `sign(x) * (exp(|x| / scale) - 1)`, the inverse of [log_weighting]
pub fn exp_weighting(x: ArrayViewD<f32>, scale: f32) -> Result<ArrayD<f32>> {
    check_scale(scale)?;
    let inv = 1. / scale;
    Ok(x.mapv(|v| v.signum() * (v.abs() * inv).exp_m1()))
}

/// Scales `x` to unit standard deviation by multiplying with the reciprocal of its standard
/// deviation. Returns the scaled tensor and the standard deviation.
pub fn std_scale(x: ArrayViewD<f32>) -> (ArrayD<f32>, f32) {
    let s = std_dev(&x);
    let inv = 1. / s;
    (x.mapv(|v| v * inv), s)
}

/// multiplies by a positive amplification factor
pub fn amplify(x: ArrayViewD<f32>, factor: f32) -> Result<ArrayD<f32>> {
    check_scale(factor)?;
    Ok(x.mapv(|v| v * factor))
}

/// min-max normalization to [0, 1] for saving or displaying images
pub fn normalize_im(x: ArrayViewD<f32>) -> ArrayD<f32> {
    let large = x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let small = x.iter().cloned().fold(f32::INFINITY, f32::min);
    let inv = 1. / (large - small);
    x.mapv(|v| (v.clamp(small, large) - small) * inv)
}

/// adds the tensor mean plus gaussian noise with `std_ratio` times the tensor standard deviation
pub fn add_gaussian_noise<R: Rng + ?Sized>(x: ArrayViewD<f32>, std_ratio: f32, rng: &mut R) -> ArrayD<f32> {
    let m = mean(&x);
    let sigma = std_dev(&x) * std_ratio;
    x.mapv(|v| {
        let n: f32 = rng.sample(StandardNormal);
        v + m + sigma * n
    })
}
