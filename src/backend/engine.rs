use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::error::{EngineError, Result};
use crate::filter::{self, AccessDescriptor, DocMeta, RetrievalFilters};
use crate::fts::{InvertedIndex, MatchOperator};
use crate::fuse::{reciprocal_rank_fusion, DEFAULT_RRF_K};
use crate::ids;
use crate::vector::{oversampled_k, SemanticSearcher, VectorIndex, DEFAULT_OVERSAMPLE_FACTOR};

use super::{
    Embedder, RerankKind, RetrievalBackend, SearchHit, SearchRequest, SearchResponse, SearchType,
};

/// Widen factor applied to each hybrid sub-search before fusion.
pub const DEFAULT_HYBRID_WIDEN_FACTOR: usize = 2;

const DEFAULT_RERANK_WIDEN_FACTOR: usize = 4;

/// Filter keys a caller could use to widen or narrow the dataset scope.
/// They are stripped before matching; scope is enforced by partition
/// routing, and identity axes by the access descriptor.
const RESERVED_FILTER_KEYS: &[&str] = &[
    "repo",
    "repository",
    "branch",
    "snapshot_id",
    "tenant_id",
    "owner_id",
    "allowed_group_ids",
];

#[derive(Debug, Clone)]
pub struct CorpusDoc {
    pub local_id: String,
    pub text: String,
    pub meta: DocMeta,
}

/// One immutable (repository, branch) dataset: documents, the inverted
/// index over their texts, and the aligned embedding index. Row position
/// is the shared `doc_id` across all three.
pub struct Partition {
    pub repository: String,
    pub branch: String,
    docs: Vec<CorpusDoc>,
    // Row-aligned copy of the document metadata, kept separately so the
    // semantic path can borrow it as a slice.
    metas: Vec<DocMeta>,
    by_local_id: HashMap<String, u32>,
    inverted: InvertedIndex,
    vectors: Box<dyn VectorIndex>,
}

impl Partition {
    pub fn build(
        repository: impl Into<String>,
        branch: impl Into<String>,
        docs: Vec<CorpusDoc>,
        vectors: Box<dyn VectorIndex>,
    ) -> Result<Self> {
        if vectors.len() != docs.len() {
            return Err(EngineError::validation(format!(
                "vector index has {} rows for {} documents",
                vectors.len(),
                docs.len()
            )));
        }
        let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
        let inverted = InvertedIndex::build(&texts);
        let mut by_local_id = HashMap::with_capacity(docs.len());
        for (row, doc) in docs.iter().enumerate() {
            if by_local_id.insert(doc.local_id.clone(), row as u32).is_some() {
                return Err(EngineError::validation(format!(
                    "duplicate local id '{}' in partition",
                    doc.local_id
                )));
            }
        }
        let metas = docs.iter().map(|d| d.meta.clone()).collect();
        Ok(Self {
            repository: repository.into(),
            branch: branch.into(),
            docs,
            metas,
            by_local_id,
            inverted,
            vectors,
        })
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn doc(&self, row: u32) -> &CorpusDoc {
        &self.docs[row as usize]
    }

    pub fn row_of(&self, local_id: &str) -> Option<u32> {
        self.by_local_id.get(local_id).copied()
    }
}

/// Partitioned retrieval engine. Holds immutable per-(repository, branch)
/// datasets and dispatches scoped requests to the lexical, semantic, or
/// fused path.
pub struct RetrievalEngine {
    partitions: HashMap<(String, String), Arc<Partition>>,
    embedder: Arc<dyn Embedder>,
    oversample_factor: usize,
    hybrid_widen_factor: usize,
}

impl RetrievalEngine {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            partitions: HashMap::new(),
            embedder,
            oversample_factor: DEFAULT_OVERSAMPLE_FACTOR,
            hybrid_widen_factor: DEFAULT_HYBRID_WIDEN_FACTOR,
        }
    }

    pub fn with_factors(mut self, oversample_factor: usize, hybrid_widen_factor: usize) -> Self {
        self.oversample_factor = oversample_factor;
        self.hybrid_widen_factor = hybrid_widen_factor.max(1);
        self
    }

    pub fn register_partition(&mut self, partition: Partition) {
        let key = (partition.repository.clone(), partition.branch.clone());
        self.partitions.insert(key, Arc::new(partition));
    }

    pub fn partition(&self, repository: &str, branch: &str) -> Result<&Arc<Partition>> {
        self.partitions
            .get(&(repository.to_string(), branch.to_string()))
            .ok_or_else(|| {
                EngineError::validation(format!(
                    "no dataset registered for repository '{}' branch '{}'",
                    repository, branch
                ))
            })
    }

    /// Strips scope-reserved filter keys. Caller values for these keys are
    /// discarded, never merged; the partition itself carries the
    /// repository/branch constraint, so no metadata filter re-states it.
    /// Documents inside a partition do not need a `branch` field to match.
    fn enforce_scope(&self, filters: &RetrievalFilters, branch: &str) -> RetrievalFilters {
        let mut scoped = filters.clone();
        for key in RESERVED_FILTER_KEYS {
            if scoped.extra.remove(*key).is_some() {
                warn!(key, "discarding scope-reserved filter key");
            }
        }
        if !scoped.branch.is_empty() {
            if scoped.branch != [branch.to_string()] {
                warn!("discarding caller branch filter; routing fixes the branch");
            }
            scoped.branch.clear();
        }
        scoped
    }

    fn bm25_candidates(
        &self,
        partition: &Partition,
        query: &str,
        k: usize,
        operator: MatchOperator,
        access: &AccessDescriptor,
        filters: &RetrievalFilters,
    ) -> Vec<(u32, f64)> {
        let raw_k = oversampled_k(k, self.oversample_factor);
        let raw = partition.inverted.search(query, raw_k, operator);
        let mut hits: Vec<(u32, f64)> = raw
            .into_iter()
            .filter(|&(row, _)| {
                let meta = &partition.doc(row).meta;
                filter::passes(meta, access) && filters.matches(meta)
            })
            .collect();
        hits.truncate(k);
        hits
    }

    fn semantic_candidates(
        &self,
        partition: &Partition,
        query: &str,
        k: usize,
        access: &AccessDescriptor,
        filters: &RetrievalFilters,
    ) -> Result<Vec<(u32, f64)>> {
        let embedding = self.embedder.encode(query)?;
        let searcher = SemanticSearcher::new(partition.vectors.as_ref(), &partition.metas);
        let hits = searcher.search(&embedding, k, self.oversample_factor, access, filters)?;
        Ok(hits.into_iter().map(|(row, s)| (row, s as f64)).collect())
    }

    fn to_response(partition: &Partition, candidates: Vec<(String, f64)>) -> SearchResponse {
        let hits = candidates
            .into_iter()
            .enumerate()
            .map(|(i, (local_id, score))| SearchHit {
                id: ids::make_canonical(&partition.repository, &partition.branch, &local_id),
                score,
                rank: i + 1,
            })
            .collect();
        SearchResponse { hits }
    }

    fn named(partition: &Partition, rows: Vec<(u32, f64)>) -> Vec<(String, f64)> {
        rows.into_iter()
            .map(|(row, score)| (partition.doc(row).local_id.clone(), score))
            .collect()
    }
}

impl RetrievalBackend for RetrievalEngine {
    fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse> {
        request.validate()?;
        cancel.check()?;

        let branch = request
            .scope_ref()
            .ok_or_else(|| EngineError::validation("a branch or snapshot_id is required"))?
            .to_string();
        let partition = self.partition(&request.repository, &branch)?;
        let filters = self.enforce_scope(&request.filters, &branch);
        let operator = request.bm25_operator.unwrap_or_default();

        debug!(
            repository = %request.repository,
            branch = %branch,
            search_type = ?request.search_type,
            top_k = request.top_k,
            "dispatching search"
        );

        match request.search_type {
            SearchType::Bm25 => {
                let rows = self.bm25_candidates(
                    partition,
                    &request.query,
                    request.top_k,
                    operator,
                    &request.access,
                    &filters,
                );
                Ok(Self::to_response(partition, Self::named(partition, rows)))
            }
            SearchType::Semantic => {
                let widened = match request.rerank {
                    Some(RerankKind::Similarity) => {
                        request.top_k
                            * request
                                .rerank_widen_factor
                                .unwrap_or(DEFAULT_RERANK_WIDEN_FACTOR)
                                .max(1)
                    }
                    _ => request.top_k,
                };
                let mut rows = self.semantic_candidates(
                    partition,
                    &request.query,
                    widened,
                    &request.access,
                    &filters,
                )?;
                cancel.check()?;
                // Candidates come back ordered by exact cosine already; the
                // rerank step just restores the caller's top_k after the
                // widened fetch.
                rows.truncate(request.top_k);
                Ok(Self::to_response(partition, Self::named(partition, rows)))
            }
            SearchType::Hybrid => {
                let widened = request.top_k * self.hybrid_widen_factor;
                let semantic = self.semantic_candidates(
                    partition,
                    &request.query,
                    widened,
                    &request.access,
                    &filters,
                )?;
                cancel.check()?;
                let lexical = self.bm25_candidates(
                    partition,
                    &request.query,
                    widened,
                    operator,
                    &request.access,
                    &filters,
                );
                cancel.check()?;

                let primary = Self::named(partition, semantic);
                let secondary = Self::named(partition, lexical);
                let rrf_k = request.rrf_k.unwrap_or(DEFAULT_RRF_K);
                let mut fused = reciprocal_rank_fusion(&primary, &secondary, rrf_k);
                fused.truncate(request.top_k);
                let candidates = fused.into_iter().map(|h| (h.id, h.score)).collect();
                Ok(Self::to_response(partition, candidates))
            }
            SearchType::Auto => unreachable!("validate rejects auto"),
        }
    }

    fn fetch_texts(
        &self,
        node_ids: &[String],
        repository: &str,
        branch: &str,
        filters: &RetrievalFilters,
    ) -> Result<BTreeMap<String, String>> {
        let partition = self.partition(repository, branch)?;
        let filters = self.enforce_scope(filters, branch);
        let mut texts = BTreeMap::new();
        for id in node_ids {
            let local = ids::strip_part_suffix(ids::strip_namespace(id, repository, branch));
            match partition.row_of(local) {
                Some(row) => {
                    let doc = partition.doc(row);
                    if filters.matches(&doc.meta) {
                        texts.insert(id.clone(), doc.text.clone());
                    }
                }
                None => debug!(id = %id, "fetch_texts: unknown node id"),
            }
        }
        Ok(texts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::LinearVectorIndex;

    /// Maps a handful of known words onto a 2-d space so vector order is
    /// predictable in tests.
    struct StubEmbedder;

    impl Embedder for StubEmbedder {
        fn encode(&self, text: &str) -> Result<Vec<f32>> {
            let lower = text.to_lowercase();
            let x = if lower.contains("invoice") { 1.0 } else { 0.0 };
            let y = if lower.contains("customer") { 1.0 } else { 0.0 };
            Ok(vec![x, y])
        }
    }

    fn doc(local_id: &str, text: &str, tags: &[&str]) -> CorpusDoc {
        CorpusDoc {
            local_id: local_id.into(),
            text: text.into(),
            meta: DocMeta {
                local_id: local_id.into(),
                acl_tags: tags.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        }
    }

    fn engine() -> RetrievalEngine {
        let docs = vec![
            doc("billing/invoice.cs", "class InvoiceService { void SendInvoice() }", &[]),
            doc(
                "billing/secret.cs",
                "class SecretInvoiceLedger { void SendInvoice() }",
                &["finance"],
            ),
            doc("crm/customer.cs", "class CustomerRepository { }", &[]),
        ];
        let vectors = LinearVectorIndex::from_rows(
            &[vec![0.9, 0.1], vec![1.0, 0.0], vec![0.0, 1.0]],
            2,
        )
        .unwrap();
        let partition = Partition::build("Shop", "main", docs, Box::new(vectors)).unwrap();
        let mut engine = RetrievalEngine::new(Arc::new(StubEmbedder)).with_factors(5, 2);
        engine.register_partition(partition);
        engine
    }

    fn request(search_type: SearchType, query: &str) -> SearchRequest {
        SearchRequest {
            search_type,
            query: query.into(),
            top_k: 2,
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
    fn bm25_search_returns_canonical_ids_with_contiguous_ranks() {
        let engine = engine();
        let resp = engine
            .search(&request(SearchType::Bm25, "invoice"), &CancellationToken::new())
            .unwrap();
        assert!(!resp.hits.is_empty());
        for (i, hit) in resp.hits.iter().enumerate() {
            assert_eq!(hit.rank, i + 1);
            assert!(hit.id.starts_with("Shop::main::"));
        }
    }

    #[test]
    fn semantic_search_orders_by_embedding_similarity() {
        let engine = engine();
        let resp = engine
            .search(
                &request(SearchType::Semantic, "customer"),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(resp.hits[0].id, "Shop::main::crm/customer.cs");
    }

    #[test]
    fn hybrid_search_fuses_both_paths() {
        let engine = engine();
        let resp = engine
            .search(&request(SearchType::Hybrid, "invoice"), &CancellationToken::new())
            .unwrap();
        assert!(!resp.hits.is_empty());
        // The invoice documents lead on both paths.
        assert!(resp.hits[0].id.contains("invoice") || resp.hits[0].id.contains("secret"));
        assert!(resp.hits.len() <= 2);
    }

    #[test]
    fn access_filtering_applies_to_every_path() {
        let engine = engine();
        for search_type in [SearchType::Bm25, SearchType::Semantic, SearchType::Hybrid] {
            let mut req = request(search_type, "invoice");
            req.access.acl_tags_any = Some(vec!["public".into()]);
            let resp = engine.search(&req, &CancellationToken::new()).unwrap();
            assert!(
                resp.hits.iter().all(|h| !h.id.contains("secret")),
                "{:?} leaked a restricted hit",
                search_type
            );
        }
    }

    #[test]
    fn smuggled_scope_filter_keys_are_discarded() {
        let engine = engine();
        let mut req = request(SearchType::Bm25, "invoice");
        req.repository = "Shop".into();
        req.filters
            .extra
            .insert("repo".into(), vec!["OtherRepo".into()]);
        let resp = engine.search(&req, &CancellationToken::new()).unwrap();
        assert!(!resp.hits.is_empty());
        assert!(resp.hits.iter().all(|h| h.id.starts_with("Shop::main::")));
    }

    #[test]
    fn branch_scope_needs_no_branch_metadata_on_documents() {
        // None of the corpus docs carry a branch field; routing to the
        // (repository, branch) partition is the whole scope check, so a
        // plain query must still return hits.
        let engine = engine();
        let resp = engine
            .search(&request(SearchType::Bm25, "invoice"), &CancellationToken::new())
            .unwrap();
        assert!(!resp.hits.is_empty());

        // A caller-supplied branch filter is discarded, not matched against
        // document metadata, whether it names the scope branch or another.
        for caller_branch in ["main", "release"] {
            let mut req = request(SearchType::Bm25, "invoice");
            req.filters.branch = vec![caller_branch.into()];
            let resp = engine.search(&req, &CancellationToken::new()).unwrap();
            assert!(!resp.hits.is_empty(), "branch filter '{caller_branch}' emptied results");
            assert!(resp.hits.iter().all(|h| h.id.starts_with("Shop::main::")));
        }
    }

    #[test]
    fn unknown_partition_is_a_validation_error() {
        let engine = engine();
        let mut req = request(SearchType::Bm25, "invoice");
        req.repository = "Nope".into();
        assert!(matches!(
            engine.search(&req, &CancellationToken::new()),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn cancellation_yields_no_partial_results() {
        let engine = engine();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            engine.search(&request(SearchType::Hybrid, "invoice"), &cancel),
            Err(EngineError::Cancelled)
        ));
    }

    #[test]
    fn fetch_texts_resolves_canonical_and_part_suffixed_ids() {
        let engine = engine();
        let ids = vec![
            "Shop::main::billing/invoice.cs".to_string(),
            "Shop::main::billing/invoice.cs:part=2".to_string(),
            "Shop::main::missing.cs".to_string(),
        ];
        let texts = engine
            .fetch_texts(&ids, "Shop", "main", &RetrievalFilters::default())
            .unwrap();
        assert_eq!(texts.len(), 2);
        assert!(texts.contains_key("Shop::main::billing/invoice.cs:part=2"));
        assert!(!texts.contains_key("Shop::main::missing.cs"));
    }

    #[test]
    fn empty_query_returns_empty_hits_not_an_error() {
        let engine = engine();
        let resp = engine
            .search(&request(SearchType::Bm25, "?? !!"), &CancellationToken::new())
            .unwrap();
        assert!(resp.hits.is_empty());
    }
}
