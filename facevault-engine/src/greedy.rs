//! Ranked early-stop matcher.
//!
//! Every identity is decoded and measured, the distances are sorted, and
//! only the closest `top_k` are considered for acceptance. A match that
//! ranks beyond `top_k` is missed; `top_k` trades recall for latency.

use log::debug;

use crate::codec::EmbeddingCodec;
use crate::distance::distance;
use crate::embedding::Embedding;
use crate::error::Result;
use crate::store::{IdentityId, StoredIdentity};

pub const DEFAULT_TOP_K: usize = 10;

/// All identities ranked by distance to `query`, closest first.
/// Ties keep ascending id order.
pub fn rank(
    query: &Embedding,
    snapshot: &[StoredIdentity],
    codec: &EmbeddingCodec,
) -> Result<Vec<(IdentityId, f64)>> {
    let mut scored = snapshot
        .iter()
        .map(|row| {
            let stored = codec.decode_identity(row)?;
            Ok((row.id, distance(query, &stored)?))
        })
        .collect::<Result<Vec<_>>>()?;
    scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    Ok(scored)
}

pub fn find_match(
    query: &Embedding,
    snapshot: &[StoredIdentity],
    codec: &EmbeddingCodec,
    threshold: f64,
    top_k: usize,
) -> Result<Option<IdentityId>> {
    let ranked = rank(query, snapshot, codec)?;
    let hit = ranked
        .iter()
        .take(top_k)
        .find(|(_, d)| *d <= threshold)
        .map(|(id, _)| *id);
    debug!(
        "greedy: {} ranked, top {} checked, match: {:?}",
        ranked.len(),
        top_k.min(ranked.len()),
        hit
    );
    Ok(hit)
}

pub fn check_duplicate(
    query: &Embedding,
    snapshot: &[StoredIdentity],
    codec: &EmbeddingCodec,
    threshold: f64,
    top_k: usize,
) -> Result<bool> {
    Ok(find_match(query, snapshot, codec, threshold, top_k)?.is_some())
}
