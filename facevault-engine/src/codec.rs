//! Embedding <-> encrypted blob.
//!
//! The plaintext is the JSON array of components, so blobs written by any
//! deployment sharing the key stay readable.

use log::warn;

use crate::cipher::SecretCipher;
use crate::embedding::{validate, Embedding, MAX_EMBEDDING_DIM};
use crate::error::{EmbeddingRule, EngineError, Result};
use crate::store::StoredIdentity;

#[derive(Debug, Clone)]
pub struct EmbeddingCodec {
    cipher: SecretCipher,
    max_dim: usize,
}

impl EmbeddingCodec {
    pub fn new(cipher: SecretCipher) -> Self {
        Self {
            cipher,
            max_dim: MAX_EMBEDDING_DIM,
        }
    }

    pub fn with_max_dim(mut self, max_dim: usize) -> Self {
        self.max_dim = max_dim.clamp(1, MAX_EMBEDDING_DIM);
        self
    }

    pub fn max_dim(&self) -> usize {
        self.max_dim
    }

    pub fn cipher(&self) -> &SecretCipher {
        &self.cipher
    }

    /// Validates, serialises, and seals.
    pub fn encode(&self, embedding: &Embedding) -> Result<String> {
        validate(embedding.as_slice(), self.max_dim)?;
        let json = serde_json::to_vec(embedding.as_slice())
            .map_err(|_| EngineError::InvalidEmbedding(EmbeddingRule::NonNumeric))?;
        self.cipher.encrypt(&json)
    }

    /// Opens and re-validates. Authentication failures and shape failures
    /// stay distinct: the former is [`EngineError::DecryptionFailure`].
    pub fn decode(&self, blob: &str) -> Result<Embedding> {
        let plain = self.cipher.decrypt(blob).inspect_err(|_| {
            warn!("failed to decrypt embedding: invalid token or corrupted data");
        })?;
        let values: Vec<f64> = serde_json::from_slice(&plain).map_err(|_| {
            warn!("decrypted embedding is not a list of numbers");
            EngineError::InvalidEmbedding(EmbeddingRule::NonNumeric)
        })?;
        Embedding::with_max_dim(values, self.max_dim)
    }

    /// [`EmbeddingCodec::decode`] for a snapshot row, naming the row on failure.
    pub fn decode_identity(&self, row: &StoredIdentity) -> Result<Embedding> {
        self.decode(&row.embedding).inspect_err(|err| {
            warn!("cannot read stored identity {}: {}", row.id, err);
        })
    }
}
