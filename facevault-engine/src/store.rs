use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Opaque handle of an enrolled identity, assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityId(pub u64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of a snapshot: the handle and its encrypted embedding blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredIdentity {
    pub id: IdentityId,
    pub embedding: String,
}

/// The record set the engine matches against. Owned by the caller's
/// persistence layer; the engine only reads snapshots and forwards writes.
///
/// Implementations must be safe for concurrent use and are the system of
/// record for uniqueness at commit time.
pub trait IdentityStore: Send + Sync {
    /// Full snapshot, ascending by id.
    fn fetch_all_identities(&self) -> Result<Vec<StoredIdentity>>;

    /// Persists a new identity. `label` is the owner's name.
    fn insert_identity(&self, label: &str, embedding: String) -> Result<IdentityId>;

    /// Returns whether anything was removed.
    fn remove_identity(&self, id: IdentityId) -> Result<bool>;
}

/// In-memory [`IdentityStore`]. Data is lost on restart.
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

struct MemoryStoreInner {
    rows: BTreeMap<IdentityId, (String, String)>,
    seq: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryStoreInner {
                rows: BTreeMap::new(),
                seq: 0,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryStoreInner>> {
        self.inner
            .lock()
            .map_err(|_| EngineError::Store("memory store lock poisoned".into()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityStore for MemoryStore {
    fn fetch_all_identities(&self) -> Result<Vec<StoredIdentity>> {
        let inner = self.lock()?;
        Ok(inner
            .rows
            .iter()
            .map(|(id, (_, embedding))| StoredIdentity {
                id: *id,
                embedding: embedding.clone(),
            })
            .collect())
    }

    fn insert_identity(&self, label: &str, embedding: String) -> Result<IdentityId> {
        let mut inner = self.lock()?;
        if inner.rows.values().any(|(l, _)| l == label) {
            return Err(EngineError::Store(format!("{label} is already enrolled")));
        }
        inner.seq += 1;
        let id = IdentityId(inner.seq);
        inner.rows.insert(id, (label.to_string(), embedding));
        Ok(id)
    }

    fn remove_identity(&self, id: IdentityId) -> Result<bool> {
        let mut inner = self.lock()?;
        Ok(inner.rows.remove(&id).is_some())
    }
}
