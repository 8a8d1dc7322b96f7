use serde::{Deserialize, Serialize};

use crate::cluster::{ClusterParams, DEFAULT_CLUSTERS_TO_CHECK, DEFAULT_TARGET_CLUSTER_SIZE};
use crate::distance::DEFAULT_THRESHOLD;
use crate::embedding::MAX_EMBEDDING_DIM;
use crate::error::{EngineError, Result};
use crate::greedy::DEFAULT_TOP_K;
use crate::kmeans::KMeans;

/// Which matcher answers a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Linear,
    Greedy,
    #[default]
    Clustered,
}

/// Operator knobs for matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    /// Inclusive L2 distance bound.
    pub threshold: f64,
    pub login_strategy: Strategy,
    /// Approximate strategies can let near-duplicates through here;
    /// `linear` makes the pre-filter exact.
    pub registration_strategy: Strategy,
    pub top_k: usize,
    pub clusters_to_check: usize,
    pub max_dimension: usize,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            login_strategy: Strategy::Clustered,
            registration_strategy: Strategy::Greedy,
            top_k: DEFAULT_TOP_K,
            clusters_to_check: DEFAULT_CLUSTERS_TO_CHECK,
            max_dimension: MAX_EMBEDDING_DIM,
        }
    }
}

impl MatchSettings {
    pub fn validate(&self) -> Result<()> {
        check_threshold(self.threshold)?;
        if self.top_k == 0 {
            return Err(EngineError::InvalidSettings("top_k must be at least 1".into()));
        }
        if self.clusters_to_check == 0 {
            return Err(EngineError::InvalidSettings(
                "clusters_to_check must be at least 1".into(),
            ));
        }
        if !(1..=MAX_EMBEDDING_DIM).contains(&self.max_dimension) {
            return Err(EngineError::InvalidSettings(format!(
                "max_dimension must be in 1..={MAX_EMBEDDING_DIM}"
            )));
        }
        Ok(())
    }
}

pub(crate) fn check_threshold(threshold: f64) -> Result<()> {
    if threshold.is_finite() && threshold >= 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidSettings(
            "threshold must be a finite, non-negative distance".into(),
        ))
    }
}

/// Knobs for building the cluster index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub target_cluster_size: usize,
    /// Unset: scale with the population.
    pub max_clusters: Option<usize>,
    pub max_iterations: usize,
    pub batch_size: usize,
    pub seed: u64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        let km = KMeans::default();
        Self {
            target_cluster_size: DEFAULT_TARGET_CLUSTER_SIZE,
            max_clusters: None,
            max_iterations: km.max_iterations,
            batch_size: km.batch_size,
            seed: km.seed,
        }
    }
}

impl IndexSettings {
    pub fn validate(&self) -> Result<()> {
        if self.target_cluster_size == 0 {
            return Err(EngineError::InvalidSettings(
                "target_cluster_size must be at least 1".into(),
            ));
        }
        if self.max_clusters == Some(0) {
            return Err(EngineError::InvalidSettings(
                "max_clusters must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(EngineError::InvalidSettings("batch_size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn cluster_params(&self) -> ClusterParams {
        ClusterParams {
            target_cluster_size: self.target_cluster_size,
            max_clusters: self.max_clusters,
        }
    }

    pub fn kmeans(&self) -> KMeans {
        KMeans {
            max_iterations: self.max_iterations,
            batch_size: self.batch_size,
            seed: self.seed,
            ..KMeans::default()
        }
    }
}
