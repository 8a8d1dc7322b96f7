use anyhow::{bail, Context, Result};
use facevault_engine::{CipherKey, IndexSettings, MatchSettings};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEVAULT_CONFIG_PATH").unwrap_or("/usr/local/etc/facevault/config.toml"))
});

pub static DATA_DIR: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEVAULT_DATA_DIR").unwrap_or("/usr/local/var/lib/facevault"))
});

/// Operator-supplied key: URL-safe base64 of 32 bytes.
pub const KEY_ENV: &str = "FACEVAULT_KEY";
/// Master secret the key is derived from when no key is supplied.
pub const MASTER_SECRET_ENV: &str = "FACEVAULT_MASTER_SECRET";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub matching: MatchSettings,
    pub index: IndexSettings,
    pub storage: StorageConfig,
    pub keys: KeyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: DATA_DIR.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_secret: Option<String>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.matching.validate().context("[matching]")?;
        self.index.validate().context("[index]")?;
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

/// Resolves the process-wide cipher key from the environment, then the
/// config file. There is no built-in fallback secret.
pub fn resolve_key(cfg: &Config) -> Result<CipherKey> {
    resolve_key_with(cfg, |name| std::env::var(name).ok())
}

pub fn resolve_key_with(cfg: &Config, env: impl Fn(&str) -> Option<String>) -> Result<CipherKey> {
    if let Some(key) = env(KEY_ENV).filter(|k| !k.trim().is_empty()) {
        return CipherKey::from_base64(&key).with_context(|| format!("parsing {KEY_ENV}"));
    }
    let secret = env(MASTER_SECRET_ENV)
        .filter(|s| !s.is_empty())
        .or_else(|| cfg.keys.master_secret.clone().filter(|s| !s.is_empty()));
    match secret {
        Some(secret) => Ok(CipherKey::from_master_secret(&secret)?),
        None => bail!(
            "no encryption key configured: set {KEY_ENV}, {MASTER_SECRET_ENV}, or keys.master_secret"
        ),
    }
}
