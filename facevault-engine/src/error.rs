use std::fmt;

use thiserror::Error;

/// Which embedding validation rule was violated.
///
/// Carries shape information only; never the offending values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingRule {
    Empty,
    Oversized { max: usize, got: usize },
    NonNumeric,
    OutOfRange,
}

impl fmt::Display for EmbeddingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingRule::Empty => write!(f, "embedding cannot be empty"),
            EmbeddingRule::Oversized { max, got } => {
                write!(f, "embedding too large: {got} dimensions, max {max}")
            }
            EmbeddingRule::NonNumeric => write!(f, "embedding must contain only finite numbers"),
            EmbeddingRule::OutOfRange => write!(f, "embedding contains out-of-range values"),
        }
    }
}

/// Errors returned by engine operations.
///
/// Every error is local to the call that produced it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(EmbeddingRule),

    #[error("cannot read stored data: ciphertext is corrupted or was sealed with another key")]
    DecryptionFailure,

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("cluster index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

impl From<EmbeddingRule> for EngineError {
    fn from(rule: EmbeddingRule) -> Self {
        EngineError::InvalidEmbedding(rule)
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
