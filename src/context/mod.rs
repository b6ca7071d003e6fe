//! Context materialization: orders seed and graph-expanded nodes under a
//! prioritization policy and packs their texts into a token or character
//! budget with atomic-skip semantics.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::{EngineError, Result};
use crate::graph::{ExpansionEdge, GraphProvider, NodeText};

/// Counts tokens for budget enforcement. Implementations live outside
/// this crate (model tokenizers); tests use whitespace counting.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Resolves node ids to text. Ids the source does not know may be omitted
/// from the result; the materializer skips them.
pub trait TextSource {
    fn fetch(&self, node_ids: &[String]) -> Result<Vec<NodeText>>;
}

/// [`TextSource`] backed by a graph provider, scoped to one bundle.
pub struct GraphTextSource<'a> {
    provider: &'a GraphProvider,
    repository: &'a str,
    branch: &'a str,
    cancel: &'a CancellationToken,
}

impl<'a> GraphTextSource<'a> {
    pub fn new(
        provider: &'a GraphProvider,
        repository: &'a str,
        branch: &'a str,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            provider,
            repository,
            branch,
            cancel,
        }
    }
}

impl TextSource for GraphTextSource<'_> {
    fn fetch(&self, node_ids: &[String]) -> Result<Vec<NodeText>> {
        self.provider
            .fetch_node_texts(self.repository, self.branch, node_ids, None, self.cancel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextPolicy {
    /// All seeds in retrieval order, then graph nodes by (depth, id).
    SeedFirst,
    /// Each seed immediately followed by its own reachable descendants.
    GraphFirst,
    /// Seeds and graph nodes interleaved roughly 1:1, seed first.
    Balanced,
}

/// Whether a context fetch includes graph-related chunks or only the
/// retrieval seeds. Callers disagree on a sensible default, so this is
/// always explicit configuration, never inferred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelatedChunkPolicy {
    #[default]
    WithDependencies,
    SeedsOnly,
}

/// At most one of the two limits may be set.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ContextBudget {
    #[serde(default)]
    pub budget_tokens: Option<usize>,
    #[serde(default)]
    pub max_chars: Option<usize>,
}

impl ContextBudget {
    pub fn tokens(budget_tokens: usize) -> Self {
        Self {
            budget_tokens: Some(budget_tokens),
            max_chars: None,
        }
    }

    pub fn chars(max_chars: usize) -> Self {
        Self {
            budget_tokens: None,
            max_chars: Some(max_chars),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    fn validate(&self, counter: Option<&dyn TokenCounter>) -> Result<()> {
        if self.budget_tokens.is_some() && self.max_chars.is_some() {
            return Err(EngineError::validation(
                "budget_tokens and max_chars are mutually exclusive",
            ));
        }
        if self.budget_tokens.is_some() && counter.is_none() {
            return Err(EngineError::configuration(
                "budget_tokens requires an injected token counter",
            ));
        }
        Ok(())
    }
}

/// Orders candidates per `policy`, fetches their texts, and packs them.
/// Over-budget candidates are skipped, never treated as a stop signal.
/// Budget validation happens before any text is fetched.
pub fn materialize_context(
    source: &dyn TextSource,
    seed_nodes: &[String],
    graph_nodes: &[String],
    graph_edges: &[ExpansionEdge],
    policy: ContextPolicy,
    related: RelatedChunkPolicy,
    budget: ContextBudget,
    counter: Option<&dyn TokenCounter>,
    cancel: &CancellationToken,
) -> Result<Vec<NodeText>> {
    budget.validate(counter)?;
    cancel.check()?;

    let (graph_nodes, graph_edges): (&[String], &[ExpansionEdge]) = match related {
        RelatedChunkPolicy::WithDependencies => (graph_nodes, graph_edges),
        RelatedChunkPolicy::SeedsOnly => (&[], &[]),
    };
    let ordered = order_candidates(seed_nodes, graph_nodes, graph_edges, policy);
    if ordered.is_empty() {
        return Ok(Vec::new());
    }

    let fetched = source.fetch(&ordered)?;
    cancel.check()?;
    let mut texts: BTreeMap<&str, &str> = BTreeMap::new();
    for node in &fetched {
        texts.insert(node.id.as_str(), node.text.as_str());
    }

    let mut remaining = budget.budget_tokens.or(budget.max_chars);
    let mut out = Vec::new();
    for id in &ordered {
        let text = match texts.get(id.as_str()) {
            Some(text) => *text,
            None => continue,
        };
        let cost = match (budget.budget_tokens, counter) {
            (Some(_), Some(counter)) => counter.count(text),
            _ => text.chars().count(),
        };
        match remaining {
            None => out.push(NodeText {
                id: id.clone(),
                text: text.to_string(),
            }),
            Some(left) if cost <= left => {
                remaining = Some(left - cost);
                out.push(NodeText {
                    id: id.clone(),
                    text: text.to_string(),
                });
            }
            Some(_) => {
                debug!(id = %id, cost, "candidate over remaining budget, skipped");
            }
        }
    }
    Ok(out)
}

/// Candidate order for the chosen policy, de-duplicated. Seeds keep their
/// retrieval order; graph candidates are ordered shallowest-first with id
/// as the tie-break, from the minimum depth seen across the edge set.
fn order_candidates(
    seed_nodes: &[String],
    graph_nodes: &[String],
    graph_edges: &[ExpansionEdge],
    policy: ContextPolicy,
) -> Vec<String> {
    let mut seeds: Vec<&String> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for seed in seed_nodes {
        if seen.insert(seed.as_str()) {
            seeds.push(seed);
        }
    }

    let mut depth: HashMap<&str, usize> = HashMap::new();
    for edge in graph_edges {
        let entry = depth.entry(edge.to.as_str()).or_insert(edge.depth);
        *entry = (*entry).min(edge.depth);
    }

    let mut graph: Vec<&String> = Vec::new();
    let mut graph_seen = HashSet::new();
    for node in graph_nodes {
        if !seen.contains(node.as_str()) && graph_seen.insert(node.as_str()) {
            graph.push(node);
        }
    }
    let node_depth = |id: &str| depth.get(id).copied().unwrap_or(usize::MAX);
    graph.sort_by(|a, b| {
        node_depth(a)
            .cmp(&node_depth(b))
            .then_with(|| a.cmp(b))
    });

    match policy {
        ContextPolicy::SeedFirst => seeds
            .into_iter()
            .chain(graph)
            .map(|s| s.to_string())
            .collect(),
        ContextPolicy::Balanced => {
            let mut out = Vec::with_capacity(seeds.len() + graph.len());
            let mut graph_iter = graph.into_iter();
            for seed in &seeds {
                out.push(seed.to_string());
                if let Some(node) = graph_iter.next() {
                    out.push(node.to_string());
                }
            }
            out.extend(graph_iter.map(|s| s.to_string()));
            out
        }
        ContextPolicy::GraphFirst => {
            let mut forward: HashMap<&str, Vec<&str>> = HashMap::new();
            for edge in graph_edges {
                forward
                    .entry(edge.from.as_str())
                    .or_default()
                    .push(edge.to.as_str());
            }
            let graph_set: HashSet<&str> = graph.iter().map(|s| s.as_str()).collect();

            let mut out: Vec<String> = Vec::new();
            let mut emitted: HashSet<&str> = HashSet::new();
            for seed in &seeds {
                if !emitted.insert(seed.as_str()) {
                    continue;
                }
                out.push(seed.to_string());

                // Descendants reachable from this seed only.
                let mut reachable: Vec<&str> = Vec::new();
                let mut visited: HashSet<&str> = HashSet::new();
                let mut queue: VecDeque<&str> = VecDeque::new();
                queue.push_back(seed.as_str());
                visited.insert(seed.as_str());
                while let Some(current) = queue.pop_front() {
                    for &next in forward.get(current).map(Vec::as_slice).unwrap_or(&[]) {
                        if visited.insert(next) {
                            if graph_set.contains(next) {
                                reachable.push(next);
                            }
                            queue.push_back(next);
                        }
                    }
                }
                reachable.sort_by(|a, b| {
                    node_depth(a)
                        .cmp(&node_depth(b))
                        .then_with(|| a.cmp(b))
                });
                for node in reachable {
                    if emitted.insert(node) {
                        out.push(node.to_string());
                    }
                }
            }
            // Graph nodes unreachable from any seed still get emitted, last.
            for node in graph {
                if emitted.insert(node.as_str()) {
                    out.push(node.to_string());
                }
            }
            out
        }
    }
}
