use ndarray::{ArrayView1, Zip};

use crate::embedding::Embedding;
use crate::error::{EngineError, Result};

/// Match threshold used by the reference deployment.
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// Euclidean distance between two embeddings.
pub fn distance(a: &Embedding, b: &Embedding) -> Result<f64> {
    l2(a.view(), b.view())
}

/// Inclusive: a distance exactly equal to `threshold` matches.
pub fn is_match(a: &Embedding, b: &Embedding, threshold: f64) -> Result<bool> {
    Ok(distance(a, b)? <= threshold)
}

/// Euclidean distance over raw views; shared by the matchers and the index.
pub fn l2(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> Result<f64> {
    if a.len() != b.len() {
        return Err(EngineError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }
    Ok(squared_l2(a, b).sqrt())
}

/// Caller guarantees equal lengths.
pub(crate) fn squared_l2(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    Zip::from(a).and(b).fold(0.0, |acc, &x, &y| {
        let diff = x - y;
        acc + diff * diff
    })
}
