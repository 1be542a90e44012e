//! Cosine similarity over embedding vectors, accumulated in `f64`.

use crate::{Error, Result};

pub fn norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt()
}

pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(&x, &y)| f64::from(x) * f64::from(y)).sum()
}

/// Cosine of the angle between `a` and `b`, in `[-1, 1]`.
///
/// A zero-norm operand is an error rather than a similarity of zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch { left: a.len(), right: b.len() });
    }
    let (na, nb) = (norm(a), norm(b));
    if na == 0.0 || nb == 0.0 {
        return Err(Error::ZeroNorm);
    }
    Ok(dot(a, b) / (na * nb))
}
