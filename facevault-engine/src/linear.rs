//! Exhaustive scan. The reference every faster matcher is measured against.

use log::debug;

use crate::codec::EmbeddingCodec;
use crate::distance::distance;
use crate::embedding::Embedding;
use crate::error::Result;
use crate::store::{IdentityId, StoredIdentity};

/// Scans the snapshot in ascending id order, decoding lazily, and returns
/// the first identity within `threshold`.
pub fn find_match(
    query: &Embedding,
    snapshot: &[StoredIdentity],
    codec: &EmbeddingCodec,
    threshold: f64,
) -> Result<Option<IdentityId>> {
    let mut rows: Vec<&StoredIdentity> = snapshot.iter().collect();
    rows.sort_by_key(|row| row.id);

    for (checked, row) in rows.into_iter().enumerate() {
        let stored = codec.decode_identity(row)?;
        if distance(query, &stored)? <= threshold {
            debug!("linear: identity {} matched after {} comparisons", row.id, checked + 1);
            return Ok(Some(row.id));
        }
    }
    debug!("linear: no match among {} identities", snapshot.len());
    Ok(None)
}

pub fn check_duplicate(
    query: &Embedding,
    snapshot: &[StoredIdentity],
    codec: &EmbeddingCodec,
    threshold: f64,
) -> Result<bool> {
    Ok(find_match(query, snapshot, codec, threshold)?.is_some())
}
