use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;

use crate::codec::EmbeddingCodec;
use crate::distance::distance;
use crate::embedding::{validate, Embedding};
use crate::error::{EngineError, Result};
use crate::greedy;
use crate::lifecycle::{IndexManager, IndexStats};
use crate::linear;
use crate::settings::{check_threshold, MatchSettings, Strategy};
use crate::store::{IdentityId, IdentityStore};

/// Result of [`MatchEngine::enroll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enrollment {
    Enrolled(IdentityId),
    /// An enrolled identity is already within threshold.
    Duplicate,
}

/// Diagnostic view of a query against the full snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchStats {
    pub total_identities: usize,
    pub candidates_checked: usize,
    pub candidates_within_threshold: usize,
    pub best_distance: Option<f64>,
    /// Population over the number of within-threshold candidates (at least 1).
    pub speedup_estimate: f64,
}

/// The matching engine: the three call shapes the web layer uses, plus
/// enrollment and index maintenance.
///
/// Shared across worker threads; every method takes `&self`.
pub struct MatchEngine {
    store: Arc<dyn IdentityStore>,
    codec: EmbeddingCodec,
    index: IndexManager,
    settings: MatchSettings,
}

impl MatchEngine {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        codec: EmbeddingCodec,
        index: IndexManager,
        settings: MatchSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let codec = codec.with_max_dim(settings.max_dimension);
        info!(
            "match engine ready: login={:?} registration={:?} threshold={} key={}",
            settings.login_strategy,
            settings.registration_strategy,
            settings.threshold,
            codec.cipher().key_fingerprint()
        );
        Ok(Self {
            store,
            codec,
            index,
            settings,
        })
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    pub fn codec(&self) -> &EmbeddingCodec {
        &self.codec
    }

    pub fn store(&self) -> &dyn IdentityStore {
        self.store.as_ref()
    }

    /// Whether `query` duplicates an enrolled identity.
    ///
    /// A best-effort pre-filter: the store enforces uniqueness at commit.
    pub fn register_check(&self, query: &Embedding) -> Result<bool> {
        self.register_check_at(query, self.settings.threshold)
    }

    pub fn register_check_at(&self, query: &Embedding, threshold: f64) -> Result<bool> {
        let hit = self.find(query, self.settings.registration_strategy, threshold)?;
        Ok(hit.is_some())
    }

    pub fn login_match(&self, query: &Embedding) -> Result<Option<IdentityId>> {
        self.login_match_at(query, self.settings.threshold)
    }

    pub fn login_match_at(&self, query: &Embedding, threshold: f64) -> Result<Option<IdentityId>> {
        self.find(query, self.settings.login_strategy, threshold)
    }

    /// Direct comparison of two embeddings; never touches the index.
    pub fn verify_pair(&self, a: &Embedding, b: &Embedding) -> Result<bool> {
        self.verify_pair_at(a, b, self.settings.threshold)
    }

    pub fn verify_pair_at(&self, a: &Embedding, b: &Embedding, threshold: f64) -> Result<bool> {
        check_threshold(threshold)?;
        self.check_query(a)?;
        self.check_query(b)?;
        Ok(distance(a, b)? <= threshold)
    }

    /// Runs one matcher over the current record set.
    pub fn find(
        &self,
        query: &Embedding,
        strategy: Strategy,
        threshold: f64,
    ) -> Result<Option<IdentityId>> {
        check_threshold(threshold)?;
        self.check_query(query)?;

        let hit = match strategy {
            Strategy::Linear => {
                let snapshot = self.store.fetch_all_identities()?;
                linear::find_match(query, &snapshot, &self.codec, threshold)?
            }
            Strategy::Greedy => {
                let snapshot = self.store.fetch_all_identities()?;
                greedy::find_match(query, &snapshot, &self.codec, threshold, self.settings.top_k)?
            }
            Strategy::Clustered => self.clustered(query, threshold)?,
        };
        debug!("{strategy:?} lookup: {hit:?}");
        Ok(hit)
    }

    fn clustered(&self, query: &Embedding, threshold: f64) -> Result<Option<IdentityId>> {
        match self.index.get_or_build(self.store.as_ref(), &self.codec, false) {
            Ok(Some(index)) => index.search(query, threshold, self.settings.clusters_to_check),
            Ok(None) => Ok(None),
            Err(EngineError::IndexUnavailable(reason)) => {
                warn!("falling back to linear scan: {reason}");
                let snapshot = self.store.fetch_all_identities()?;
                linear::find_match(query, &snapshot, &self.codec, threshold)
            }
            Err(err) => Err(err),
        }
    }

    /// Duplicate check, then encrypt, persist, and invalidate the index.
    pub fn enroll(&self, label: &str, query: &Embedding) -> Result<Enrollment> {
        if self.register_check(query)? {
            info!("enrollment for {label} rejected: face already registered");
            return Ok(Enrollment::Duplicate);
        }
        let blob = self.codec.encode(query)?;
        let id = self.store.insert_identity(label, blob)?;
        self.index.invalidate();
        info!("enrolled {label} as identity {id}");
        Ok(Enrollment::Enrolled(id))
    }

    pub fn remove(&self, id: IdentityId) -> Result<bool> {
        let removed = self.store.remove_identity(id)?;
        if removed {
            self.index.invalidate();
            info!("removed identity {id}");
        }
        Ok(removed)
    }

    /// For callers that mutate the store directly.
    pub fn invalidate(&self) {
        self.index.invalidate();
    }

    pub fn search_stats(&self, query: &Embedding, threshold: f64) -> Result<SearchStats> {
        check_threshold(threshold)?;
        self.check_query(query)?;
        let snapshot = self.store.fetch_all_identities()?;
        let ranked = greedy::rank(query, &snapshot, &self.codec)?;
        let within = ranked.iter().filter(|(_, d)| *d <= threshold).count();
        Ok(SearchStats {
            total_identities: ranked.len(),
            candidates_checked: self.settings.top_k.min(ranked.len()),
            candidates_within_threshold: within,
            best_distance: ranked.first().map(|(_, d)| *d),
            speedup_estimate: ranked.len() as f64 / within.max(1) as f64,
        })
    }

    pub fn index_stats(&self) -> IndexStats {
        self.index.stats()
    }

    pub fn rebuild_index(&self) -> Result<IndexStats> {
        self.index.get_or_build(self.store.as_ref(), &self.codec, true)?;
        Ok(self.index.stats())
    }

    fn check_query(&self, query: &Embedding) -> Result<()> {
        validate(query.as_slice(), self.codec.max_dim())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterParams;
    use crate::lifecycle::IndexStatus;
    use crate::store::MemoryStore;
    use crate::test_support::{codec, emb};

    fn engine(settings: MatchSettings) -> MatchEngine {
        MatchEngine::new(
            Arc::new(MemoryStore::new()),
            codec(),
            IndexManager::default(),
            settings,
        )
        .unwrap()
    }

    fn all_strategies() -> [Strategy; 3] {
        [Strategy::Linear, Strategy::Greedy, Strategy::Clustered]
    }

    #[test]
    fn scenario_b_empty_store() {
        let engine = engine(MatchSettings::default());
        let q = emb(&[0.1, 0.2]);
        for s in all_strategies() {
            assert_eq!(engine.find(&q, s, 0.7).unwrap(), None);
        }
        assert!(!engine.register_check(&q).unwrap());
        assert_eq!(engine.login_match(&q).unwrap(), None);
        assert_eq!(engine.index_stats().status, IndexStatus::Empty);
    }

    #[test]
    fn scenario_d_reenrolling_same_face_is_duplicate() {
        let engine = engine(MatchSettings::default());
        let x = emb(&[0.3, -0.2, 0.9]);
        assert!(matches!(engine.enroll("x", &x).unwrap(), Enrollment::Enrolled(_)));
        assert!(engine.register_check(&x).unwrap());
        assert_eq!(engine.enroll("x2", &x).unwrap(), Enrollment::Duplicate);
    }

    #[test]
    fn login_sees_enrollments_after_index_was_built() {
        let engine = engine(MatchSettings::default());
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[5.0, 5.0]);
        engine.enroll("a", &a).unwrap();
        assert!(engine.login_match(&a).unwrap().is_some());
        assert_eq!(engine.index_stats().status, IndexStatus::Built);

        let Enrollment::Enrolled(id_b) = engine.enroll("b", &b).unwrap() else {
            panic!("b should enroll");
        };
        assert_eq!(engine.login_match(&b).unwrap(), Some(id_b));

        assert!(engine.remove(id_b).unwrap());
        assert_eq!(engine.login_match(&b).unwrap(), None);
    }

    #[test]
    fn verify_pair_bypasses_store() {
        let engine = engine(MatchSettings::default());
        assert!(engine.verify_pair(&emb(&[0.0, 0.0]), &emb(&[0.3, 0.4])).unwrap());
        assert!(!engine.verify_pair(&emb(&[0.0, 0.0]), &emb(&[3.0, 4.0])).unwrap());
        assert!(engine
            .verify_pair_at(&emb(&[0.0, 0.0]), &emb(&[3.0, 4.0]), 5.0)
            .unwrap());
        assert_eq!(engine.index_stats().status, IndexStatus::Stale);
    }

    #[test]
    fn scenario_c_dimension_mismatch_everywhere() {
        let engine = engine(MatchSettings::default());
        engine.enroll("short", &emb(&vec![0.1; 64])).unwrap();
        let q = emb(&vec![0.1; 128]);
        for s in all_strategies() {
            assert!(
                matches!(engine.find(&q, s, 0.7), Err(EngineError::DimensionMismatch { .. })),
                "{s:?}"
            );
        }
        assert!(matches!(
            engine.verify_pair(&q, &emb(&vec![0.1; 64])),
            Err(EngineError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn degenerate_index_falls_back_to_linear() {
        let settings = MatchSettings {
            registration_strategy: Strategy::Linear,
            ..Default::default()
        };
        let store = Arc::new(MemoryStore::new());
        let codec = codec();
        // Ten identical rows: k = 2 but only one distinct point.
        for i in 0..10 {
            store
                .insert_identity(&format!("u{i}"), codec.encode(&emb(&[1.0, 1.0])).unwrap())
                .unwrap();
        }
        let engine = MatchEngine::new(
            store,
            codec,
            IndexManager::with_kmeans(Default::default(), ClusterParams::default()),
            settings,
        )
        .unwrap();
        assert_eq!(
            engine.login_match(&emb(&[1.0, 1.0])).unwrap(),
            Some(IdentityId(1))
        );
        assert_eq!(engine.login_match(&emb(&[9.0, 9.0])).unwrap(), None);
        assert!(engine.rebuild_index().is_err());
    }

    #[test]
    fn per_call_threshold_override() {
        let engine = engine(MatchSettings::default());
        engine.enroll("a", &emb(&[0.0, 0.0])).unwrap();
        let q = emb(&[1.0, 0.0]);
        assert_eq!(engine.login_match(&q).unwrap(), None);
        assert!(engine.login_match_at(&q, 1.0).unwrap().is_some());
        assert!(!engine.register_check_at(&q, 0.99).unwrap());
        assert!(matches!(
            engine.login_match_at(&q, -1.0),
            Err(EngineError::InvalidSettings(_))
        ));
    }

    #[test]
    fn query_validated_against_deployment_dimension() {
        let engine = engine(MatchSettings {
            max_dimension: 4,
            ..Default::default()
        });
        assert!(matches!(
            engine.login_match(&emb(&[0.0; 5])),
            Err(EngineError::InvalidEmbedding(_))
        ));
    }

    #[test]
    fn search_stats_summarise_distances() {
        let engine = engine(MatchSettings::default());
        engine.enroll("a", &emb(&[0.0, 0.0])).unwrap();
        engine.enroll("b", &emb(&[0.0, 3.0])).unwrap();
        assert_eq!(
            engine.enroll("c", &emb(&[0.0, 0.5])).unwrap(),
            Enrollment::Duplicate
        );
        let stats = engine.search_stats(&emb(&[0.0, 0.1]), 0.7).unwrap();
        assert_eq!(stats.total_identities, 2);
        assert_eq!(stats.candidates_checked, 2);
        assert_eq!(stats.candidates_within_threshold, 1);
        assert!((stats.best_distance.unwrap() - 0.1).abs() < 1e-12);
        assert_eq!(stats.speedup_estimate, 2.0);

        let nowhere = engine.search_stats(&emb(&[50.0, 50.0]), 0.7).unwrap();
        assert_eq!(nowhere.candidates_within_threshold, 0);
        assert_eq!(nowhere.speedup_estimate, 2.0);
    }

    #[test]
    fn rebuild_reports_stats() {
        let engine = engine(MatchSettings::default());
        for i in 0..12 {
            engine.enroll(&format!("u{i}"), &emb(&[i as f64 * 2.0, 0.0])).unwrap();
        }
        let stats = engine.rebuild_index().unwrap();
        assert_eq!(stats.status, IndexStatus::Built);
        let clusters = stats.clusters.unwrap();
        assert_eq!(clusters.population, 12);
        assert_eq!(clusters.clusters, 2);
    }

    #[test]
    fn rejects_invalid_settings() {
        let err = MatchEngine::new(
            Arc::new(MemoryStore::new()),
            codec(),
            IndexManager::default(),
            MatchSettings {
                top_k: 0,
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(EngineError::InvalidSettings(_))));
    }
}
