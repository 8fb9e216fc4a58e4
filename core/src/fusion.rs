//! Reciprocal Rank Fusion (RRF).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::bm25::RankedList;
use crate::error::{ConfigError, FusionError};

/// Standard RRF k from Cormack, Clarke and Buettcher (SIGIR 2009).
///
/// Smaller k puts more weight on the top of each list; larger k flattens the
/// contribution curve.
pub const RRF_K: u32 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedHit {
    pub doc_id: String,
    pub score: f64,
}

pub type FusedResult = Vec<FusedHit>;

/// Validate a configured RRF k, which arrives as a signed integer from
/// flags or environment.
pub fn rrf_k_from_config(value: i64) -> Result<u32, ConfigError> {
    u32::try_from(value)
        .ok()
        .filter(|k| *k > 0)
        .ok_or(ConfigError::InvalidRrfK(value))
}

/// Combine any number of ranked lists.
///
/// RRF_score(d) = sum over lists L containing d of 1 / (k + rank_L(d))
///
/// A document missing from a list gets nothing from it (no penalty rank).
/// Ranks are taken from each hit's `rank` field; if a list names a document
/// twice, its best rank is used. The result is sorted by score descending,
/// then document id ascending, and truncated to `top_k`. Contributions are
/// summed in a canonical order so the output does not depend on the order of
/// `lists`.
pub fn reciprocal_rank_fusion(
    lists: &[RankedList],
    k: u32,
    top_k: usize,
) -> Result<FusedResult, FusionError> {
    if k == 0 {
        return Err(FusionError::NonPositiveK(k));
    }
    let k_param = f64::from(k);

    let mut contributions: HashMap<&str, Vec<f64>> = HashMap::new();
    for (list_idx, list) in lists.iter().enumerate() {
        let mut best: HashMap<&str, usize> = HashMap::with_capacity(list.len());
        for hit in list {
            if hit.rank == 0 {
                return Err(FusionError::InvalidRank { list: list_idx, doc_id: hit.doc_id.clone() });
            }
            best.entry(hit.doc_id.as_str())
                .and_modify(|r| *r = (*r).min(hit.rank))
                .or_insert(hit.rank);
        }
        for (doc_id, rank) in best {
            contributions
                .entry(doc_id)
                .or_default()
                .push(1.0 / (k_param + rank as f64));
        }
    }

    let mut fused: Vec<FusedHit> = contributions
        .into_iter()
        .map(|(doc_id, mut parts)| {
            parts.sort_unstable_by(|a, b| b.total_cmp(a));
            FusedHit { doc_id: doc_id.to_string(), score: parts.iter().sum() }
        })
        .collect();
    fused.sort_unstable_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.doc_id.cmp(&b.doc_id)));
    fused.truncate(top_k);

    Ok(fused)
}
