//! Cluster-pruned index over a snapshot of enrolled identities.
//!
//! A built index is immutable. Rebuilding produces a new value which the
//! lifecycle manager swaps in whole, so readers never see a partial index.

use std::collections::HashMap;

use log::debug;
use ndarray::Array2;
use serde::Serialize;

use crate::codec::EmbeddingCodec;
use crate::distance::{l2, squared_l2};
use crate::embedding::Embedding;
use crate::error::{EngineError, Result};
use crate::kmeans::Clusterer;
use crate::store::{IdentityId, StoredIdentity};

pub const DEFAULT_CLUSTERS_TO_CHECK: usize = 3;
pub const DEFAULT_TARGET_CLUSTER_SIZE: usize = 5;

/// Sizing knobs for a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterParams {
    pub target_cluster_size: usize,
    /// `None` scales the ceiling with the population: `clamp(n / 500, 20, 200)`.
    pub max_clusters: Option<usize>,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            target_cluster_size: DEFAULT_TARGET_CLUSTER_SIZE,
            max_clusters: None,
        }
    }
}

impl ClusterParams {
    /// `min(max_clusters, max(1, population / target_cluster_size))`.
    pub fn cluster_count(&self, population: usize) -> usize {
        let ceiling = self
            .max_clusters
            .unwrap_or_else(|| (population / 500).clamp(20, 200))
            .max(1);
        (population / self.target_cluster_size.max(1))
            .max(1)
            .min(ceiling)
    }
}

/// Informational summary; never consulted when matching.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterStats {
    pub clusters: usize,
    pub population: usize,
    pub min_cluster_size: usize,
    pub avg_cluster_size: f64,
    pub max_cluster_size: usize,
}

#[derive(Debug)]
pub struct ClusterIndex {
    centroids: Array2<f64>,
    members: Vec<Vec<IdentityId>>,
    embeddings: HashMap<IdentityId, Embedding>,
}

impl ClusterIndex {
    /// Builds from a full snapshot. An empty snapshot yields `Ok(None)`.
    ///
    /// Decode failures propagate as-is. Anything that prevents clustering
    /// (mixed dimensions, degenerate input, a clusterer that drops or
    /// misassigns points) is [`EngineError::IndexUnavailable`].
    pub fn build(
        snapshot: &[StoredIdentity],
        codec: &EmbeddingCodec,
        clusterer: &dyn Clusterer,
        params: ClusterParams,
    ) -> Result<Option<Self>> {
        if snapshot.is_empty() {
            return Ok(None);
        }

        let mut rows: Vec<&StoredIdentity> = snapshot.iter().collect();
        rows.sort_by_key(|row| row.id);
        if rows.windows(2).any(|w| w[0].id == w[1].id) {
            return Err(EngineError::IndexUnavailable(
                "snapshot contains duplicate identity ids".into(),
            ));
        }

        let decoded = rows
            .iter()
            .map(|row| codec.decode_identity(row))
            .collect::<Result<Vec<_>>>()?;

        let dim = decoded[0].dim();
        if decoded.iter().any(|e| e.dim() != dim) {
            return Err(EngineError::IndexUnavailable(
                "snapshot mixes embedding dimensions".into(),
            ));
        }

        let n = decoded.len();
        let mut points = Array2::<f64>::zeros((n, dim));
        for (mut row, e) in points.rows_mut().into_iter().zip(&decoded) {
            row.assign(&e.view());
        }

        let k = params.cluster_count(n);
        let clustering = clusterer
            .cluster(points.view(), k)
            .map_err(|e| EngineError::IndexUnavailable(e.to_string()))?;

        let centroids = clustering.centroids;
        if centroids.nrows() == 0 || centroids.ncols() != dim {
            return Err(EngineError::IndexUnavailable(format!(
                "clusterer returned {}x{} centroids for {dim}-dimensional points",
                centroids.nrows(),
                centroids.ncols()
            )));
        }
        if clustering.assignments.len() != n {
            return Err(EngineError::IndexUnavailable(format!(
                "clusterer assigned {} of {n} points",
                clustering.assignments.len()
            )));
        }

        let mut members = vec![Vec::new(); centroids.nrows()];
        for (row, &label) in rows.iter().zip(&clustering.assignments) {
            let bucket = members.get_mut(label).ok_or_else(|| {
                EngineError::IndexUnavailable(format!("assignment to unknown cluster {label}"))
            })?;
            bucket.push(row.id);
        }

        let embeddings = rows.iter().map(|row| row.id).zip(decoded).collect();

        debug!("cluster index: {n} identities in {} clusters", members.len());
        Ok(Some(Self {
            centroids,
            members,
            embeddings,
        }))
    }

    /// Checks the members of the `clusters_to_check` nearest clusters,
    /// nearest cluster first, and returns the first identity within
    /// `threshold`. Matches living in farther clusters are missed.
    pub fn search(
        &self,
        query: &Embedding,
        threshold: f64,
        clusters_to_check: usize,
    ) -> Result<Option<IdentityId>> {
        if query.dim() != self.dim() {
            return Err(EngineError::DimensionMismatch {
                expected: self.dim(),
                got: query.dim(),
            });
        }

        let mut order: Vec<(usize, f64)> = self
            .centroids
            .rows()
            .into_iter()
            .enumerate()
            .map(|(j, c)| (j, squared_l2(query.view(), c)))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        for &(cluster, _) in order.iter().take(clusters_to_check) {
            for id in &self.members[cluster] {
                // Every member has a cached embedding by construction.
                let Some(stored) = self.embeddings.get(id) else {
                    continue;
                };
                if l2(query.view(), stored.view())? <= threshold {
                    return Ok(Some(*id));
                }
            }
        }
        Ok(None)
    }

    pub fn dim(&self) -> usize {
        self.centroids.ncols()
    }

    pub fn cluster_count(&self) -> usize {
        self.members.len()
    }

    pub fn population(&self) -> usize {
        self.embeddings.len()
    }

    pub fn members(&self, cluster: usize) -> &[IdentityId] {
        self.members.get(cluster).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn stats(&self) -> ClusterStats {
        let sizes: Vec<usize> = self.members.iter().map(Vec::len).collect();
        let total: usize = sizes.iter().sum();
        ClusterStats {
            clusters: sizes.len(),
            population: self.population(),
            min_cluster_size: sizes.iter().copied().min().unwrap_or(0),
            avg_cluster_size: if sizes.is_empty() {
                0.0
            } else {
                total as f64 / sizes.len() as f64
            },
            max_cluster_size: sizes.iter().copied().max().unwrap_or(0),
        }
    }
}
