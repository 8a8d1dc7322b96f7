//! Face-embedding identity matching with encryption at rest.
//!
//! Given a query embedding, decide whether it matches an enrolled identity:
//! by exhaustive scan ([`linear`]), ranked early stop ([`greedy`]), or a
//! cluster-pruned index ([`cluster`]) whose lifecycle is owned by
//! [`IndexManager`]. Stored embeddings are sealed by [`SecretCipher`]
//! through [`EmbeddingCodec`].

pub mod cipher;
pub mod cluster;
pub mod codec;
pub mod distance;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod greedy;
pub mod kmeans;
pub mod lifecycle;
pub mod linear;
pub mod settings;
pub mod store;

#[cfg(test)]
mod test_support;

pub use cipher::{CipherKey, SecretCipher};
pub use cluster::{ClusterIndex, ClusterParams, ClusterStats};
pub use codec::EmbeddingCodec;
pub use distance::{distance, is_match, DEFAULT_THRESHOLD};
pub use embedding::{Embedding, MAX_EMBEDDING_DIM};
pub use engine::{Enrollment, MatchEngine, SearchStats};
pub use error::{EmbeddingRule, EngineError};
pub use kmeans::{ClusterError, Clusterer, Clustering, KMeans};
pub use lifecycle::{IndexManager, IndexStats, IndexStatus};
pub use settings::{IndexSettings, MatchSettings, Strategy};
pub use store::{IdentityId, IdentityStore, MemoryStore, StoredIdentity};
