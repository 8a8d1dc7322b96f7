pub mod app;
pub mod config;
pub mod storage;
pub mod vault;

// Re-export engine types for convenience
pub use facevault_engine::{
    CipherKey, Embedding, Enrollment, IdentityId, IndexStats, MatchEngine, SearchStats, Strategy,
};
pub use app::FaceVault;
