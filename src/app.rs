use anyhow::{bail, Context, Result};
use facevault_engine::{
    EmbeddingCodec, Embedding, Enrollment, IdentityId, IndexManager, MatchEngine, SecretCipher,
};
use log::info;
use std::path::Path;
use std::sync::Arc;

use crate::config::{self, Config};
use crate::storage::FileStore;
use crate::vault::Vault;

/// Everything a command needs: the matching engine over the file store,
/// and the vault sealed with the same key.
pub struct FaceVault {
    pub engine: MatchEngine,
    pub identities: Arc<FileStore>,
    pub vault: Vault,
}

impl FaceVault {
    pub fn open(cfg: &Config) -> Result<Self> {
        let key = config::resolve_key(cfg)?;
        Self::open_with_key(cfg, &key)
    }

    pub fn open_with_key(cfg: &Config, key: &facevault_engine::CipherKey) -> Result<Self> {
        cfg.validate()?;
        let data_dir = &cfg.storage.data_dir;
        let identities = Arc::new(FileStore::open(data_dir)?);
        let index = IndexManager::with_kmeans(cfg.index.kmeans(), cfg.index.cluster_params());
        let engine = MatchEngine::new(
            identities.clone(),
            EmbeddingCodec::new(SecretCipher::new(key)),
            index,
            cfg.matching.clone(),
        )?;
        let vault = Vault::open(data_dir, SecretCipher::new(key))?;
        Ok(Self {
            engine,
            identities,
            vault,
        })
    }

    pub fn enroll(&self, user: &str, embedding: &Embedding) -> Result<IdentityId> {
        if self.identities.find_by_label(user)?.is_some() {
            bail!("{user} is already enrolled; purge first to re-enroll");
        }
        match self.engine.enroll(user, embedding)? {
            Enrollment::Enrolled(id) => Ok(id),
            Enrollment::Duplicate => bail!("this face is already enrolled under another user"),
        }
    }

    /// Resolves a face to its identity and label.
    pub fn authenticate(&self, embedding: &Embedding) -> Result<(IdentityId, String)> {
        let Some(id) = self.engine.login_match(embedding)? else {
            bail!("no enrolled identity matches this face");
        };
        let label = self
            .identities
            .label_of(id)?
            .with_context(|| format!("identity {id} vanished during login"))?;
        Ok((id, label))
    }

    /// Removes the identity enrolled as `user` together with its vault.
    pub fn purge(&self, user: &str) -> Result<usize> {
        let Some(record) = self.identities.find_by_label(user)? else {
            bail!("{user} is not enrolled");
        };
        let id = IdentityId(record.id);
        // Ids are never reused, so entries left behind by a failed vault
        // purge are unreachable.
        self.engine.remove(id)?;
        let removed = self.vault.purge_owner(id)?;
        info!("purged identity {id} ({user}) and {removed} vault entries");
        Ok(removed)
    }
}

/// Reads an embedding from a JSON array of numbers.
pub fn load_embedding(path: &Path, max_dim: usize) -> Result<Embedding> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading embedding {}", path.display()))?;
    let values: Vec<f64> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of numbers", path.display()))?;
    Embedding::with_max_dim(values, max_dim)
        .with_context(|| format!("invalid embedding in {}", path.display()))
}
