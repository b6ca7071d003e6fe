use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::{EngineError, Result};
use crate::ids;

use super::bundle::LoadedBundle;

/// How many offending ids a bundle-inconsistency error carries.
const MISSING_ID_SAMPLE: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionEdge {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    /// Depth of the target node, counted from the seeds at depth 0.
    pub depth: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphExpansionResult {
    pub nodes: Vec<String>,
    pub edges: Vec<ExpansionEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeText {
    pub id: String,
    pub text: String,
}

/// Serves dependency-graph expansion and node-text fetches over lazily
/// loaded per-(repository, branch) bundles. Bundles are read once per
/// process; there is no invalidation.
pub struct GraphProvider {
    root: PathBuf,
    cache: Mutex<HashMap<(String, String), Arc<OnceCell<Arc<LoadedBundle>>>>>,
}

impl GraphProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Read-through cache. The per-key cell means concurrent first access
    /// loads each bundle exactly once; the outer lock is held only for the
    /// map lookup, not for the disk read.
    pub fn bundle(&self, repository: &str, branch: &str) -> Arc<LoadedBundle> {
        let cell = {
            let mut cache = self.cache.lock().expect("bundle cache poisoned");
            cache
                .entry((repository.to_string(), branch.to_string()))
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        cell.get_or_init(|| {
            let dir = self.root.join(repository).join(branch);
            debug!(path = %dir.display(), "loading graph bundle");
            Arc::new(LoadedBundle::load(&dir))
        })
        .clone()
    }

    /// Bounded BFS from the seed set. Seeds are namespace-stripped and
    /// de-duplicated; relations outside a non-empty, non-`"*"` allowlist
    /// are skipped. A seed or edge target absent from the whole bundle is
    /// a bundle inconsistency, never a silently dropped node.
    pub fn expand_dependency_tree(
        &self,
        repository: &str,
        branch: &str,
        seed_nodes: &[String],
        max_depth: usize,
        max_nodes: usize,
        edge_allowlist: &[String],
        cancel: &CancellationToken,
    ) -> Result<GraphExpansionResult> {
        cancel.check()?;
        let bundle = self.bundle(repository, branch);

        let mut seeds: Vec<String> = Vec::new();
        let mut seen_seed = HashSet::new();
        for id in seed_nodes {
            let local = ids::strip_part_suffix(ids::strip_namespace(id, repository, branch));
            if seen_seed.insert(local.to_string()) {
                seeds.push(local.to_string());
            }
        }

        let missing_seeds: Vec<String> = seeds
            .iter()
            .filter(|s| !bundle.knows(s))
            .cloned()
            .collect();
        if !missing_seeds.is_empty() {
            return Err(inconsistency(repository, branch, missing_seeds));
        }

        let allow_all = edge_allowlist.is_empty() || edge_allowlist.iter().any(|r| r == "*");
        let allowed = |relation: &str| allow_all || edge_allowlist.iter().any(|r| r == relation);

        let mut visited: HashSet<String> = HashSet::new();
        let mut nodes: Vec<String> = Vec::new();
        let mut edges: Vec<ExpansionEdge> = Vec::new();
        let mut missing: Vec<String> = Vec::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();

        for seed in seeds {
            if visited.len() >= max_nodes {
                break;
            }
            if visited.insert(seed.clone()) {
                nodes.push(seed.clone());
                queue.push_back((seed, 0));
            }
        }

        while let Some((local, depth)) = queue.pop_front() {
            cancel.check()?;
            if depth >= max_depth {
                continue;
            }
            for edge in bundle.edges_from(&local) {
                if !allowed(&edge.relation) {
                    continue;
                }
                if !bundle.knows(&edge.to) {
                    if !missing.contains(&edge.to) {
                        missing.push(edge.to.clone());
                    }
                    continue;
                }
                if visited.contains(&edge.to) {
                    continue;
                }
                if visited.len() >= max_nodes {
                    break;
                }
                visited.insert(edge.to.clone());
                nodes.push(edge.to.clone());
                edges.push(ExpansionEdge {
                    from: ids::make_canonical(repository, branch, &local),
                    to: ids::make_canonical(repository, branch, &edge.to),
                    edge_type: edge.relation.clone(),
                    depth: depth + 1,
                });
                queue.push_back((edge.to.clone(), depth + 1));
            }
        }

        if !missing.is_empty() {
            return Err(inconsistency(repository, branch, missing));
        }

        let nodes = nodes
            .into_iter()
            .map(|local| ids::make_canonical(repository, branch, &local))
            .collect();
        Ok(GraphExpansionResult { nodes, edges })
    }

    /// Resolves node ids to formatted text blocks, truncating the
    /// concatenated output at `max_chars`. A block that exceeds the
    /// remaining budget is cut to fit and ends the fetch; its emitted
    /// length is still accounted. Unknown ids are a bundle inconsistency.
    pub fn fetch_node_texts(
        &self,
        repository: &str,
        branch: &str,
        node_ids: &[String],
        max_chars: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<NodeText>> {
        cancel.check()?;
        let bundle = self.bundle(repository, branch);

        let mut missing: Vec<String> = Vec::new();
        let mut out: Vec<NodeText> = Vec::new();
        let mut remaining = max_chars;

        for id in node_ids {
            cancel.check()?;
            if remaining == Some(0) {
                break;
            }
            let local = ids::strip_part_suffix(ids::strip_namespace(id, repository, branch));
            let block = if let Some(chunk) = bundle.chunks.get(local) {
                let path = chunk.file.as_deref().unwrap_or(local);
                format!("### File: {}\n{}", path, chunk.text)
            } else if let Some(body) = bundle.sql_bodies.get(local) {
                let kind = body.kind.as_deref().unwrap_or("object");
                let name = match (&body.schema, &body.name) {
                    (Some(schema), Some(name)) => format!("{schema}.{name}"),
                    _ => body.key.clone(),
                };
                format!("[SQL {}] {}\n{}", kind, name, body.text)
            } else {
                missing.push(local.to_string());
                continue;
            };

            match remaining {
                None => out.push(NodeText {
                    id: id.clone(),
                    text: block,
                }),
                Some(budget) => {
                    let len = block.chars().count();
                    if len <= budget {
                        remaining = Some(budget - len);
                        out.push(NodeText {
                            id: id.clone(),
                            text: block,
                        });
                    } else {
                        let cut: String = block.chars().take(budget).collect();
                        out.push(NodeText {
                            id: id.clone(),
                            text: cut,
                        });
                        remaining = Some(0);
                    }
                }
            }
        }

        if !missing.is_empty() {
            return Err(inconsistency(repository, branch, missing));
        }
        Ok(out)
    }
}

fn inconsistency(repository: &str, branch: &str, missing: Vec<String>) -> EngineError {
    let sample = missing.iter().take(MISSING_ID_SAMPLE).cloned().collect();
    EngineError::BundleInconsistency {
        repository: repository.to_string(),
        branch: branch.to_string(),
        missing: missing.len(),
        sample,
    }
}
