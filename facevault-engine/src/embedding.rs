use std::fmt;

use ndarray::ArrayView1;

use crate::error::{EmbeddingRule, EngineError, Result};

/// Hard upper bound on embedding dimensionality.
pub const MAX_EMBEDDING_DIM: usize = 4096;

/// Exclusive magnitude bound for every component.
pub const VALUE_LIMIT: f64 = 1e6;

/// A validated face descriptor: a point in R^d.
///
/// Immutable once built. `Debug` prints the dimension only so that
/// descriptors never end up in logs.
#[derive(Clone, PartialEq)]
pub struct Embedding {
    values: Vec<f64>,
}

impl Embedding {
    /// Validates against the global dimension limit.
    pub fn new(values: Vec<f64>) -> Result<Self> {
        Self::with_max_dim(values, MAX_EMBEDDING_DIM)
    }

    /// Validates against a deployment-specific limit (never above
    /// [`MAX_EMBEDDING_DIM`]).
    pub fn with_max_dim(values: Vec<f64>, max_dim: usize) -> Result<Self> {
        validate(&values, max_dim.min(MAX_EMBEDDING_DIM))?;
        Ok(Self { values })
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn view(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(self.values.as_slice())
    }

}

impl fmt::Debug for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedding").field("dim", &self.dim()).finish()
    }
}

impl TryFrom<Vec<f64>> for Embedding {
    type Error = EngineError;

    fn try_from(values: Vec<f64>) -> Result<Self> {
        Self::new(values)
    }
}

/// Checks shape first, then each component.
pub fn validate(values: &[f64], max_dim: usize) -> Result<(), EmbeddingRule> {
    if values.is_empty() {
        return Err(EmbeddingRule::Empty);
    }
    if values.len() > max_dim {
        return Err(EmbeddingRule::Oversized {
            max: max_dim,
            got: values.len(),
        });
    }
    for &v in values {
        if !v.is_finite() {
            return Err(EmbeddingRule::NonNumeric);
        }
        if !(-VALUE_LIMIT < v && v < VALUE_LIMIT) {
            return Err(EmbeddingRule::OutOfRange);
        }
    }
    Ok(())
}
