//! Reciprocal Rank Fusion of two ranked candidate lists.
//!
//! Scores from the input lists are never mixed arithmetically; only ranks
//! matter, which keeps BM25 and cosine scales from fighting each other.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rank-offset constant. 60 is the value from the original RRF paper and
/// keeps single-list outliers from dominating the fused order.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// One fused candidate with provenance: which input ranks produced it.
/// `payload` is taken from the candidate's first occurrence, preferring
/// the primary list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedHit<T> {
    pub id: String,
    pub score: f64,
    pub primary_rank: Option<usize>,
    pub secondary_rank: Option<usize>,
    pub payload: T,
}

struct Accum<T> {
    score: f64,
    primary_rank: Option<usize>,
    secondary_rank: Option<usize>,
    payload: T,
}

/// Fuses `primary` and `secondary` (best first, 1-based ranks) into one
/// list ordered by descending RRF score. Equal scores are broken by the
/// earliest primary rank, then earliest secondary rank, then id; the whole
/// fusion is deterministic for a fixed pair of inputs.
pub fn reciprocal_rank_fusion<T: Clone>(
    primary: &[(String, T)],
    secondary: &[(String, T)],
    rrf_k: f64,
) -> Vec<FusedHit<T>> {
    let mut accum: HashMap<&str, Accum<T>> = HashMap::with_capacity(primary.len() + secondary.len());

    for (rank0, (id, payload)) in primary.iter().enumerate() {
        let rank = rank0 + 1;
        let contribution = 1.0 / (rrf_k + rank as f64);
        accum
            .entry(id.as_str())
            .and_modify(|a| {
                a.score += contribution;
                if a.primary_rank.is_none() {
                    a.primary_rank = Some(rank);
                }
            })
            .or_insert(Accum {
                score: contribution,
                primary_rank: Some(rank),
                secondary_rank: None,
                payload: payload.clone(),
            });
    }

    for (rank0, (id, payload)) in secondary.iter().enumerate() {
        let rank = rank0 + 1;
        let contribution = 1.0 / (rrf_k + rank as f64);
        accum
            .entry(id.as_str())
            .and_modify(|a| {
                a.score += contribution;
                if a.secondary_rank.is_none() {
                    a.secondary_rank = Some(rank);
                }
            })
            .or_insert(Accum {
                score: contribution,
                primary_rank: None,
                secondary_rank: Some(rank),
                payload: payload.clone(),
            });
    }

    let mut fused: Vec<FusedHit<T>> = accum
        .into_iter()
        .map(|(id, a)| FusedHit {
            id: id.to_string(),
            score: a.score,
            primary_rank: a.primary_rank,
            secondary_rank: a.secondary_rank,
            payload: a.payload,
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| cmp_rank(a.primary_rank, b.primary_rank))
            .then_with(|| cmp_rank(a.secondary_rank, b.secondary_rank))
            .then_with(|| a.id.cmp(&b.id))
    });

    debug!(
        primary = primary.len(),
        secondary = secondary.len(),
        fused = fused.len(),
        "rrf fusion"
    );
    fused
}

fn cmp_rank(a: Option<usize>, b: Option<usize>) -> std::cmp::Ordering {
    // Present ranks beat absent ones; lower rank wins.
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}
