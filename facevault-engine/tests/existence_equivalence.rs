use std::sync::Arc;

use anyhow::Result;
use facevault_engine::{
    CipherKey, EmbeddingCodec, Embedding, IdentityStore, IndexManager, MatchEngine,
    MatchSettings, MemoryStore, SecretCipher, Strategy,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn codec() -> EmbeddingCodec {
    let key = CipherKey::from_master_secret("integration").expect("key");
    EmbeddingCodec::new(SecretCipher::new(&key))
}

fn random_vec(rng: &mut StdRng, dim: usize) -> Vec<f64> {
    (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// Fills a store directly (no duplicate checks) with `n` random identities.
fn populated(codec: &EmbeddingCodec, rng: &mut StdRng, n: usize, dim: usize) -> Result<(Arc<MemoryStore>, Vec<Vec<f64>>)> {
    let store = Arc::new(MemoryStore::new());
    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        let v = random_vec(rng, dim);
        store.insert_identity(&format!("user{i}"), codec.encode(&Embedding::new(v.clone())?)?)?;
        rows.push(v);
    }
    Ok((store, rows))
}

fn exhaustive(settings: MatchSettings) -> MatchSettings {
    MatchSettings {
        top_k: usize::MAX,
        clusters_to_check: usize::MAX,
        ..settings
    }
}

/// Half the queries are small perturbations of enrolled identities, half
/// are fresh random points.
fn queries(rng: &mut StdRng, rows: &[Vec<f64>], count: usize, dim: usize) -> Vec<Embedding> {
    (0..count)
        .map(|i| {
            let v = if i % 2 == 0 {
                let base = &rows[rng.gen_range(0..rows.len())];
                base.iter().map(|x| x + rng.gen_range(-0.1..0.1)).collect()
            } else {
                random_vec(rng, dim)
            };
            Embedding::new(v).expect("query")
        })
        .collect()
}

#[test]
fn scenario_e_clustered_agrees_with_linear_on_1000_identities() -> Result<()> {
    env_logger::try_init().ok();
    let mut rng = StdRng::seed_from_u64(2024);
    let codec = codec();
    let dim = 8;
    let (store, rows) = populated(&codec, &mut rng, 1000, dim)?;

    let engine = MatchEngine::new(
        store,
        codec,
        IndexManager::default(),
        exhaustive(MatchSettings::default()),
    )?;

    let stats = engine.rebuild_index()?;
    let clusters = stats.clusters.expect("built");
    assert_eq!(clusters.population, 1000);
    println!("index: {clusters:?}");

    let mut matched = 0;
    for q in queries(&mut rng, &rows, 100, dim) {
        let linear = engine.find(&q, Strategy::Linear, 0.7)?;
        let clustered = engine.find(&q, Strategy::Clustered, 0.7)?;
        assert_eq!(linear.is_some(), clustered.is_some());
        matched += linear.is_some() as usize;
    }
    // The perturbed half must match something.
    assert!(matched >= 50, "only {matched} of 100 queries matched");
    Ok(())
}

#[test]
fn all_matchers_agree_on_existence() -> Result<()> {
    env_logger::try_init().ok();
    let mut rng = StdRng::seed_from_u64(99);
    let codec = codec();
    let dim = 4;
    let (store, rows) = populated(&codec, &mut rng, 150, dim)?;
    let engine = MatchEngine::new(
        store,
        codec,
        IndexManager::default(),
        exhaustive(MatchSettings::default()),
    )?;

    for q in queries(&mut rng, &rows, 60, dim) {
        for threshold in [0.0, 0.2, 0.7, 1.5] {
            let linear = engine.find(&q, Strategy::Linear, threshold)?.is_some();
            let greedy = engine.find(&q, Strategy::Greedy, threshold)?.is_some();
            let clustered = engine.find(&q, Strategy::Clustered, threshold)?.is_some();
            assert_eq!(linear, greedy, "greedy disagrees at {threshold}");
            assert_eq!(linear, clustered, "clustered disagrees at {threshold}");
        }
    }
    Ok(())
}

#[test]
fn returned_identity_is_always_within_threshold() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(5);
    let codec = codec();
    let (store, rows) = populated(&codec, &mut rng, 200, 6)?;
    let engine = MatchEngine::new(
        store.clone(),
        codec.clone(),
        IndexManager::default(),
        MatchSettings::default(),
    )?;

    for q in queries(&mut rng, &rows, 40, 6) {
        for strategy in [Strategy::Linear, Strategy::Greedy, Strategy::Clustered] {
            if let Some(id) = engine.find(&q, strategy, 0.7)? {
                let row = store
                    .fetch_all_identities()?
                    .into_iter()
                    .find(|r| r.id == id)
                    .expect("returned id exists");
                let stored = codec.decode(&row.embedding)?;
                assert!(facevault_engine::distance(&q, &stored)? <= 0.7);
            }
        }
    }
    Ok(())
}
