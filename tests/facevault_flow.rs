use anyhow::Result;
use facevault::config::Config;
use facevault::vault::{OpenedSecret, SecretFields};
use facevault::{CipherKey, Embedding, FaceVault, Strategy};
use facevault_engine::{EngineError, IndexStatus};
use serde_json::json;

fn config(dir: &std::path::Path) -> Config {
    let mut cfg = Config::default();
    cfg.storage.data_dir = dir.to_path_buf();
    cfg
}

fn face(seed: f64) -> Embedding {
    Embedding::new((0..16).map(|i| seed + i as f64 * 0.01).collect()).unwrap()
}

fn key() -> CipherKey {
    CipherKey::from_master_secret("integration").unwrap()
}

#[test]
fn enroll_login_vault_purge() -> Result<()> {
    env_logger::builder().is_test(true).try_init().ok();
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    let app = FaceVault::open_with_key(&cfg, &key())?;

    let alice = app.enroll("alice", &face(0.0))?;
    let bob = app.enroll("bob", &face(5.0))?;
    assert_ne!(alice, bob);

    // Same face under another name, and the same name again.
    assert!(app.enroll("mallory", &face(0.01)).is_err());
    assert!(app.enroll("alice", &face(9.0)).is_err());

    let (id, label) = app.authenticate(&face(5.02))?;
    assert_eq!((id, label.as_str()), (bob, "bob"));
    assert!(app.authenticate(&face(-20.0)).is_err());

    let fields = SecretFields::parse("Login", json!({"username": "bob", "password": "pw"}))?;
    let entry = app.vault.put(bob, "mail", &fields)?;
    assert_eq!(app.vault.list(bob)?.len(), 1);
    assert!(app.vault.list(alice)?.is_empty());
    let (_, opened) = app.vault.get(bob, entry.id)?;
    assert_eq!(opened, OpenedSecret::Typed(fields));

    assert_eq!(app.purge("bob")?, 1);
    assert!(app.authenticate(&face(5.0)).is_err());
    assert!(app.vault.list(bob)?.is_empty());
    // The face is free to enroll again.
    app.enroll("bob", &face(5.0))?;
    Ok(())
}

#[test]
fn state_survives_reopen() -> Result<()> {
    env_logger::builder().is_test(true).try_init().ok();
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    let enrolled = {
        let app = FaceVault::open_with_key(&cfg, &key())?;
        (0..12)
            .map(|i| app.enroll(&format!("user{i}"), &face(i as f64 * 3.0)))
            .collect::<Result<Vec<_>>>()?
    };

    let app = FaceVault::open_with_key(&cfg, &key())?;
    assert_eq!(app.engine.index_stats().status, IndexStatus::Stale);
    for (i, id) in enrolled.iter().enumerate() {
        let q = face(i as f64 * 3.0);
        assert_eq!(app.engine.login_match(&q)?, Some(*id));
        assert_eq!(
            app.engine.find(&q, Strategy::Linear, cfg.matching.threshold)?,
            Some(*id)
        );
    }
    let stats = app.engine.index_stats();
    assert_eq!(stats.status, IndexStatus::Built);
    assert_eq!(stats.clusters.map(|c| c.population), Some(12));
    Ok(())
}

#[test]
fn rotated_key_cannot_match() -> Result<()> {
    env_logger::builder().is_test(true).try_init().ok();
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    FaceVault::open_with_key(&cfg, &key())?.enroll("alice", &face(0.0))?;

    let other = CipherKey::from_master_secret("rotated")?;
    let app = FaceVault::open_with_key(&cfg, &other)?;
    let err = app.engine.login_match(&face(0.0)).unwrap_err();
    assert!(matches!(err, EngineError::DecryptionFailure));
    Ok(())
}

#[test]
fn missing_key_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    if std::env::var_os(facevault::config::KEY_ENV).is_none()
        && std::env::var_os(facevault::config::MASTER_SECRET_ENV).is_none()
    {
        assert!(FaceVault::open(&cfg).is_err());
    }
}

#[test]
fn failed_identity_removal_keeps_vault() -> Result<()> {
    env_logger::builder().is_test(true).try_init().ok();
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    let app = FaceVault::open_with_key(&cfg, &key())?;
    let alice = app.enroll("alice", &face(0.0))?;
    let fields = SecretFields::parse("login", json!({"username": "alice", "password": "pw"}))?;
    app.vault.put(alice, "mail", &fields)?;

    // A directory where the store writes its temporary file makes the
    // identity write fail.
    let blocker = dir.path().join("identities.tmp");
    std::fs::create_dir(&blocker)?;
    assert!(app.purge("alice").is_err());
    assert_eq!(app.vault.list(alice)?.len(), 1);
    assert_eq!(app.authenticate(&face(0.0))?.0, alice);

    std::fs::remove_dir(&blocker)?;
    assert_eq!(app.purge("alice")?, 1);
    assert!(app.vault.list(alice)?.is_empty());
    Ok(())
}
