use tracing::debug;

use crate::error::Result;
use crate::filter::{self, AccessDescriptor, DocMeta, RetrievalFilters};

use super::VectorIndex;

/// Multiplier applied to `top_k` when fetching raw candidates, so that the
/// security and metadata filters run on a wide pool before any truncation.
pub const DEFAULT_OVERSAMPLE_FACTOR: usize = 5;

/// Raw candidate count for an oversampled fetch. Always strictly greater
/// than `top_k`, even with a degenerate factor of 0 or 1.
pub fn oversampled_k(top_k: usize, factor: usize) -> usize {
    (top_k * factor).max(top_k + 1)
}

/// Access-aware wrapper over a [`VectorIndex`]. Filters are applied between
/// the oversampled fetch and the `top_k` cut, never after it, so restricted
/// callers are not starved by high-scoring documents they cannot see.
pub struct SemanticSearcher<'a> {
    index: &'a dyn VectorIndex,
    metas: &'a [DocMeta],
}

impl<'a> SemanticSearcher<'a> {
    pub fn new(index: &'a dyn VectorIndex, metas: &'a [DocMeta]) -> Self {
        debug_assert_eq!(index.len(), metas.len());
        Self { index, metas }
    }

    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        oversample_factor: usize,
        access: &AccessDescriptor,
        filters: &RetrievalFilters,
    ) -> Result<Vec<(u32, f32)>> {
        if top_k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }

        // Strict tag sets cut the candidate pool sharply; restricting the
        // index scan up front beats oversampling in that regime.
        if access.permission_tags_all.is_some() {
            let allowed: Vec<u32> = (0..self.metas.len() as u32)
                .filter(|&row| self.admits(row, access, filters))
                .collect();
            debug!(
                allowed = allowed.len(),
                corpus = self.metas.len(),
                "strict acl pre-filter"
            );
            if allowed.is_empty() {
                return Ok(Vec::new());
            }
            return self.index.search_subset(query, &allowed, top_k);
        }

        let raw_k = oversampled_k(top_k, oversample_factor);
        let raw = self.index.search(query, raw_k)?;
        let mut hits: Vec<(u32, f32)> = raw
            .into_iter()
            .filter(|&(row, _)| self.admits(row, access, filters))
            .collect();
        hits.truncate(top_k);
        Ok(hits)
    }

    fn admits(&self, row: u32, access: &AccessDescriptor, filters: &RetrievalFilters) -> bool {
        let meta = &self.metas[row as usize];
        filter::passes(meta, access) && filters.matches(meta)
    }
}
