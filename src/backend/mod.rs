//! Retrieval dispatcher: request/response types, validation, and the
//! backend trait implemented by the partitioned engine.

mod engine;

pub use engine::{CorpusDoc, Partition, RetrievalEngine, DEFAULT_HYBRID_WIDEN_FACTOR};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::error::{EngineError, Result};
use crate::filter::{AccessDescriptor, RetrievalFilters};
use crate::fts::MatchOperator;

/// Produces a query embedding. Implementations live outside this crate;
/// tests use a deterministic stub.
pub trait Embedder: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Semantic,
    Bm25,
    Hybrid,
    /// Placeholder used by callers that resolve the concrete type upstream.
    /// Reaching the dispatcher unresolved is a configuration error.
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankKind {
    /// Exact-cosine rescoring over a widened semantic candidate pool.
    Similarity,
    /// Reserved for a model-based reranker that is not wired in yet.
    Reserved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub search_type: SearchType,
    pub query: String,
    pub top_k: usize,
    /// Scope: selects the physical dataset partition. Never a filter.
    pub repository: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub filters: RetrievalFilters,
    #[serde(default)]
    pub access: AccessDescriptor,
    #[serde(default)]
    pub rrf_k: Option<f64>,
    /// Accepted only for bm25/hybrid and only when `trusted_operator_source`
    /// is set by the calling layer.
    #[serde(default)]
    pub bm25_operator: Option<MatchOperator>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub trusted_operator_source: bool,
    #[serde(default)]
    pub rerank: Option<RerankKind>,
    #[serde(default)]
    pub rerank_widen_factor: Option<usize>,
}

impl SearchRequest {
    /// The branch/snapshot identifier that, with `repository`, names the
    /// partition. Branch wins when both are present.
    pub fn scope_ref(&self) -> Option<&str> {
        self.branch
            .as_deref()
            .or(self.snapshot_id.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Structural validation, run before any I/O or index access.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(EngineError::validation("top_k must be greater than 0"));
        }
        if self.search_type == SearchType::Auto {
            return Err(EngineError::configuration(
                "search_type 'auto' must be resolved to a concrete type before dispatch",
            ));
        }
        if self.repository.is_empty() {
            return Err(EngineError::validation("repository is required"));
        }
        if self.scope_ref().is_none() {
            return Err(EngineError::validation(
                "either branch or snapshot_id is required",
            ));
        }
        if let Some(kind) = self.rerank {
            if self.search_type != SearchType::Semantic {
                return Err(EngineError::validation(
                    "rerank is only supported for semantic search",
                ));
            }
            if kind == RerankKind::Reserved {
                return Err(EngineError::configuration(
                    "rerank kind 'reserved' is not available",
                ));
            }
        }
        if self.bm25_operator.is_some() {
            if !matches!(self.search_type, SearchType::Bm25 | SearchType::Hybrid) {
                return Err(EngineError::validation(
                    "bm25_operator is only valid for bm25 or hybrid search",
                ));
            }
            if !self.trusted_operator_source {
                return Err(EngineError::validation(
                    "bm25_operator requires a trusted operator source",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Canonical id: `<repo>::<branch>::<local_id>`.
    pub id: String,
    pub score: f64,
    /// 1-based, contiguous.
    pub rank: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
}

/// The dispatch surface consumed by pipeline callers.
pub trait RetrievalBackend: Send + Sync {
    fn search(&self, request: &SearchRequest, cancel: &CancellationToken)
        -> Result<SearchResponse>;

    /// Resolves canonical node ids to their stored text, restricted to the
    /// given scope and filters. Unknown ids are omitted from the map.
    fn fetch_texts(
        &self,
        node_ids: &[String],
        repository: &str,
        branch: &str,
        filters: &RetrievalFilters,
    ) -> Result<BTreeMap<String, String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(search_type: SearchType) -> SearchRequest {
        SearchRequest {
            search_type,
            query: "invoice".into(),
            top_k: 5,
            repository: "Shop".into(),
            branch: Some("main".into()),
            snapshot_id: None,
            filters: RetrievalFilters::default(),
            access: AccessDescriptor::unrestricted(),
            rrf_k: None,
            bm25_operator: None,
            trusted_operator_source: false,
            rerank: None,
            rerank_widen_factor: None,
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(request(SearchType::Hybrid).validate().is_ok());
    }

    #[test]
    fn zero_top_k_is_a_validation_error() {
        let mut req = request(SearchType::Bm25);
        req.top_k = 0;
        assert!(matches!(
            req.validate(),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn auto_search_type_is_a_configuration_error() {
        let err = request(SearchType::Auto).validate().unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn missing_scope_is_rejected() {
        let mut req = request(SearchType::Semantic);
        req.repository = String::new();
        assert!(req.validate().is_err());

        let mut req = request(SearchType::Semantic);
        req.branch = None;
        assert!(req.validate().is_err());

        req.snapshot_id = Some("snap-42".into());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn rerank_requires_semantic_search() {
        let mut req = request(SearchType::Bm25);
        req.rerank = Some(RerankKind::Similarity);
        assert!(req.validate().is_err());
    }

    #[test]
    fn reserved_rerank_kind_fails_naming_itself() {
        let mut req = request(SearchType::Semantic);
        req.rerank = Some(RerankKind::Reserved);
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn bm25_operator_needs_a_trusted_source() {
        let mut req = request(SearchType::Bm25);
        req.bm25_operator = Some(MatchOperator::And);
        assert!(req.validate().is_err());

        req.trusted_operator_source = true;
        assert!(req.validate().is_ok());

        req.search_type = SearchType::Semantic;
        assert!(req.validate().is_err());
    }
}
