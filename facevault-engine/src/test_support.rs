use crate::cipher::{CipherKey, SecretCipher};
use crate::codec::EmbeddingCodec;
use crate::embedding::Embedding;
use crate::store::{IdentityId, StoredIdentity};

pub(crate) fn codec() -> EmbeddingCodec {
    EmbeddingCodec::new(SecretCipher::new(
        &CipherKey::from_master_secret("engine-tests").unwrap(),
    ))
}

pub(crate) fn emb(values: &[f64]) -> Embedding {
    Embedding::new(values.to_vec()).unwrap()
}

/// Ids are assigned 1.. in the given order.
pub(crate) fn snapshot<R: AsRef<[f64]>>(codec: &EmbeddingCodec, rows: &[R]) -> Vec<StoredIdentity> {
    rows.iter()
        .enumerate()
        .map(|(i, values)| StoredIdentity {
            id: IdentityId(i as u64 + 1),
            embedding: codec.encode(&emb(values.as_ref())).unwrap(),
        })
        .collect()
}
