//! Vector similarity search: scoring primitives, a linear index, and the
//! access-aware oversampling adapter used by the dispatcher.

mod adapter;
mod linear;

pub use adapter::{oversampled_k, SemanticSearcher, DEFAULT_OVERSAMPLE_FACTOR};
pub use linear::LinearVectorIndex;

use simsimd::SpatialSimilarity;

use crate::error::Result;

pub fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> f32 {
    match f32::cosine(lhs, rhs) {
        Some(distance) => ((1.0 - distance) as f32).clamp(-1.0, 1.0),
        None => cosine_similarity_scalar(lhs, rhs),
    }
}

pub fn cosine_similarity_scalar(lhs: &[f32], rhs: &[f32]) -> f32 {
    let dot: f32 = lhs.iter().zip(rhs).map(|(a, b)| a * b).sum();
    let norm_l: f32 = lhs.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_r: f32 = rhs.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_l == 0.0 || norm_r == 0.0 {
        return 0.0;
    }
    (dot / (norm_l * norm_r)).clamp(-1.0, 1.0)
}

/// A similarity index over row-addressed embeddings. Rows align with the
/// corpus document order, the same addressing the inverted index uses.
pub trait VectorIndex: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top `k` rows by descending similarity to `query`.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>>;

    /// Top `k` among the given rows only. Used for the strict-ACL path where
    /// the allowed set is computed up front instead of post-filtering.
    fn search_subset(&self, query: &[f32], rows: &[u32], k: usize) -> Result<Vec<(u32, f32)>>;
}

pub(crate) fn select_top_k(matches: &mut Vec<(u32, f32)>, k: usize) {
    if matches.len() > k {
        matches.select_nth_unstable_by(k, |a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        matches.truncate(k);
    }
    matches.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
}
