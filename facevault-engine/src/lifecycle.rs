//! Ownership of the process-wide cluster index.
//!
//! Readers clone an `Arc` to the current index under a short read lock.
//! Rebuilds are serialised by a separate mutex, run without holding the
//! read/write lock, and are installed with a single pointer swap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{info, warn};
use serde::Serialize;

use crate::cluster::{ClusterIndex, ClusterParams, ClusterStats};
use crate::codec::EmbeddingCodec;
use crate::error::Result;
use crate::kmeans::{Clusterer, KMeans};
use crate::store::IdentityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    /// Built from an empty snapshot.
    Empty,
    Building,
    Built,
    /// Never built, or invalidated since the last build.
    Stale,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub status: IndexStatus,
    #[serde(flatten)]
    pub clusters: Option<ClusterStats>,
}

struct Current {
    index: Option<Arc<ClusterIndex>>,
    stale: bool,
    /// Bumped by every invalidation.
    generation: u64,
}

pub struct IndexManager {
    current: RwLock<Current>,
    build_lock: Mutex<()>,
    building: AtomicBool,
    clusterer: Box<dyn Clusterer>,
    params: ClusterParams,
}

impl IndexManager {
    pub fn new(clusterer: Box<dyn Clusterer>, params: ClusterParams) -> Self {
        Self {
            current: RwLock::new(Current {
                index: None,
                stale: true,
                generation: 0,
            }),
            build_lock: Mutex::new(()),
            building: AtomicBool::new(false),
            clusterer,
            params,
        }
    }

    pub fn with_kmeans(kmeans: KMeans, params: ClusterParams) -> Self {
        Self::new(Box::new(kmeans), params)
    }

    /// Returns the current index, rebuilding first if it is stale or
    /// `force_rebuild` is set. `Ok(None)` means the snapshot was empty.
    ///
    /// Callers block while a rebuild runs. On failure the previous index
    /// and its stale flag are left untouched, so the next call retries.
    pub fn get_or_build(
        &self,
        store: &dyn IdentityStore,
        codec: &EmbeddingCodec,
        force_rebuild: bool,
    ) -> Result<Option<Arc<ClusterIndex>>> {
        if !force_rebuild {
            if let Some(fresh) = self.fresh() {
                return Ok(fresh);
            }
        }

        let _guard = self.build_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have finished a rebuild while we waited.
        if !force_rebuild {
            if let Some(fresh) = self.fresh() {
                return Ok(fresh);
            }
        }

        let generation = self.read().generation;
        self.building.store(true, Ordering::SeqCst);
        let built = store.fetch_all_identities().and_then(|snapshot| {
            ClusterIndex::build(&snapshot, codec, self.clusterer.as_ref(), self.params)
        });
        self.building.store(false, Ordering::SeqCst);

        match built {
            Ok(index) => {
                let index = index.map(Arc::new);
                let mut current = self.write();
                current.index = index.clone();
                // An invalidation that raced the build keeps it stale.
                current.stale = current.generation != generation;
                match &index {
                    Some(idx) => info!(
                        "cluster index rebuilt: {} identities in {} clusters",
                        idx.population(),
                        idx.cluster_count()
                    ),
                    None => info!("cluster index rebuilt: no enrolled identities"),
                }
                Ok(index)
            }
            Err(err) => {
                warn!("cluster index rebuild failed: {err}");
                Err(err)
            }
        }
    }

    /// Forces the next [`IndexManager::get_or_build`] to rebuild. Must be
    /// called after any insertion or deletion of enrolled identities.
    pub fn invalidate(&self) {
        let mut current = self.write();
        current.generation += 1;
        current.stale = true;
    }

    pub fn status(&self) -> IndexStatus {
        if self.building.load(Ordering::SeqCst) {
            return IndexStatus::Building;
        }
        let current = self.read();
        match (&current.index, current.stale) {
            (_, true) => IndexStatus::Stale,
            (None, false) => IndexStatus::Empty,
            (Some(_), false) => IndexStatus::Built,
        }
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            status: self.status(),
            clusters: self.read().index.as_ref().map(|idx| idx.stats()),
        }
    }

    fn fresh(&self) -> Option<Option<Arc<ClusterIndex>>> {
        let current = self.read();
        (!current.stale).then(|| current.index.clone())
    }

    // The guarded state is replaced wholesale, so a poisoned lock still
    // holds a consistent value.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Current> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Current> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::with_kmeans(KMeans::default(), ClusterParams::default())
    }
}
