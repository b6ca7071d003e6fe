//! Dependency graph provider: per-(repository, branch) bundle cache,
//! bounded BFS expansion, and node-text resolution.

mod bundle;
mod provider;

pub use bundle::{CodeChunk, GraphEdge, LoadedBundle, SqlBody};
pub use provider::{ExpansionEdge, GraphExpansionResult, GraphProvider, NodeText};
