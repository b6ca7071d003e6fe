//! Hybrid retrieval and context assembly for code/SQL corpora.
//!
//! The crate scores candidates lexically (BM25 over a columnar inverted
//! index) and semantically (nearest-neighbor search), enforces access
//! filtering before any top-k truncation, fuses the two rankings with
//! Reciprocal Rank Fusion, expands a dependency graph from retrieval
//! seeds under node/depth bounds, and materializes a budgeted context
//! window from the result.
//!
//! Entry points: [`backend::RetrievalEngine`] for search,
//! [`graph::GraphProvider`] for expansion and text fetches, and
//! [`context::materialize_context`] for budgeted assembly.

pub mod backend;
pub mod cancel;
pub mod context;
pub mod error;
pub mod filter;
pub mod fts;
pub mod fuse;
pub mod graph;
pub mod ids;
pub mod vector;

pub use backend::{
    Embedder, RetrievalBackend, RetrievalEngine, SearchHit, SearchRequest, SearchResponse,
    SearchType,
};
pub use cancel::CancellationToken;
pub use context::{
    materialize_context, ContextBudget, ContextPolicy, RelatedChunkPolicy, TokenCounter,
};
pub use error::{EngineError, Result};
pub use filter::{AccessDescriptor, DocMeta, RetrievalFilters};
pub use graph::{GraphExpansionResult, GraphProvider, NodeText};
