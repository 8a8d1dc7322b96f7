//! Authenticated symmetric encryption for everything persisted at rest.
//!
//! Blobs are URL-safe base64 (no padding) of `version || nonce || ciphertext+tag`.
//! The version byte is bound as associated data, so it cannot be swapped
//! without failing authentication.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};

const BLOB_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// 256-bit key for [`SecretCipher`].
#[derive(Clone)]
pub struct CipherKey([u8; KEY_LEN]);

impl CipherKey {
    /// Derives the key from a master secret. The same secret always yields
    /// the same key, so redeploying with it keeps existing data readable.
    pub fn from_master_secret(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(EngineError::InvalidKey("master secret is empty".into()));
        }
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&digest);
        Ok(Self(key))
    }

    /// Parses an operator-supplied key: URL-safe base64 of exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(encoded.trim().trim_end_matches('='))
            .map_err(|_| EngineError::InvalidKey("key is not url-safe base64".into()))?;
        let key: [u8; KEY_LEN] = raw.try_into().map_err(|raw: Vec<u8>| {
            EngineError::InvalidKey(format!("key must be {KEY_LEN} bytes, got {}", raw.len()))
        })?;
        Ok(Self(key))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh random key, encoded the way [`CipherKey::from_base64`] expects.
    pub fn generate() -> (Self, String) {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&key);
        (Self(bytes), URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Short, non-reversible tag identifying the key in logs.
    pub fn fingerprint(&self) -> String {
        Sha256::digest(self.0)
            .iter()
            .take(4)
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CipherKey").field(&self.fingerprint()).finish()
    }
}

/// AES-256-GCM over opaque byte payloads.
///
/// Encryption is nondeterministic: a fresh nonce is drawn per call.
#[derive(Clone)]
pub struct SecretCipher {
    aead: Aes256Gcm,
    fingerprint: String,
}

impl SecretCipher {
    pub fn new(key: &CipherKey) -> Self {
        Self {
            aead: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0)),
            fingerprint: key.fingerprint(),
        }
    }

    pub fn key_fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .aead
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &[BLOB_VERSION],
                },
            )
            // Only fails on plaintexts beyond the AES-GCM length limit.
            .map_err(|_| EngineError::Store("payload too large to encrypt".into()))?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + sealed.len());
        out.push(BLOB_VERSION);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Any malformed, truncated, tampered, or foreign-key blob is a
    /// [`EngineError::DecryptionFailure`].
    pub fn decrypt(&self, blob: &str) -> Result<Vec<u8>> {
        let raw = URL_SAFE_NO_PAD
            .decode(blob)
            .map_err(|_| EngineError::DecryptionFailure)?;
        if raw.len() < 1 + NONCE_LEN + TAG_LEN || raw[0] != BLOB_VERSION {
            return Err(EngineError::DecryptionFailure);
        }
        let (nonce, sealed) = raw[1..].split_at(NONCE_LEN);
        self.aead
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: &raw[..1],
                },
            )
            .map_err(|_| EngineError::DecryptionFailure)
    }
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCipher")
            .field("key", &self.fingerprint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(secret: &str) -> SecretCipher {
        SecretCipher::new(&CipherKey::from_master_secret(secret).unwrap())
    }

    #[test]
    fn roundtrip() {
        let c = cipher("s3cret");
        let blob = c.encrypt(b"hello vault").unwrap();
        assert_eq!(c.decrypt(&blob).unwrap(), b"hello vault");
    }

    #[test]
    fn nondeterministic() {
        let c = cipher("s3cret");
        let a = c.encrypt(b"same").unwrap();
        let b = c.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn same_master_secret_decrypts_across_instances() {
        let blob = cipher("deploy-1").encrypt(b"persisted").unwrap();
        assert_eq!(cipher("deploy-1").decrypt(&blob).unwrap(), b"persisted");
    }

    #[test]
    fn rotated_master_secret_is_a_hard_failure() {
        let blob = cipher("old").encrypt(b"persisted").unwrap();
        assert!(matches!(
            cipher("new").decrypt(&blob),
            Err(EngineError::DecryptionFailure)
        ));
    }

    #[test]
    fn every_flipped_byte_is_detected() {
        let c = cipher("s3cret");
        let blob = c.encrypt(b"[0.25,0.5]").unwrap();
        let raw = URL_SAFE_NO_PAD.decode(&blob).unwrap();
        for i in 0..raw.len() {
            let mut bad = raw.clone();
            bad[i] ^= 0x01;
            let bad = URL_SAFE_NO_PAD.encode(bad);
            assert!(
                matches!(c.decrypt(&bad), Err(EngineError::DecryptionFailure)),
                "flip at byte {i} not detected"
            );
        }
    }

    #[test]
    fn garbage_and_truncation_rejected() {
        let c = cipher("s3cret");
        assert!(matches!(c.decrypt(""), Err(EngineError::DecryptionFailure)));
        assert!(matches!(c.decrypt("!!!"), Err(EngineError::DecryptionFailure)));
        let blob = c.encrypt(b"x").unwrap();
        assert!(matches!(
            c.decrypt(&blob[..blob.len() / 2]),
            Err(EngineError::DecryptionFailure)
        ));
    }

    #[test]
    fn operator_key_parsing() {
        let (key, encoded) = CipherKey::generate();
        let parsed = CipherKey::from_base64(&encoded).unwrap();
        assert_eq!(key.fingerprint(), parsed.fingerprint());

        let blob = SecretCipher::new(&key).encrypt(b"k").unwrap();
        assert_eq!(SecretCipher::new(&parsed).decrypt(&blob).unwrap(), b"k");

        assert!(matches!(
            CipherKey::from_base64("c2hvcnQ"),
            Err(EngineError::InvalidKey(_))
        ));
        assert!(CipherKey::from_master_secret("").is_err());
    }

    #[test]
    fn debug_does_not_leak_key() {
        let key = CipherKey::from_bytes([7u8; KEY_LEN]);
        let shown = format!("{key:?}");
        assert!(shown.contains(&key.fingerprint()));
        assert!(!shown.contains("7, 7"));
    }
}
