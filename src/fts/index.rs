use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::tokenize::tokenize;

/// BM25 parameters (tuned for code search)
pub const BM25_K1: f64 = 1.2;
pub const BM25_B: f64 = 0.75;

/// How query terms combine in lexical search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOperator {
    And,
    Or,
}

impl Default for MatchOperator {
    fn default() -> Self {
        MatchOperator::Or
    }
}

/// Columnar inverted index in CSR layout.
///
/// Postings for term `t` live at `doc_ids[offsets[t]..offsets[t + 1]]` with
/// their saturated term frequencies in the parallel `tfs` range. The flat
/// arrays keep query-time scoring free of per-term allocation and map 1:1
/// onto the on-disk `tf_*.npy` files.
#[derive(Debug, Clone, Default)]
pub struct InvertedIndex {
    /// Sorted vocabulary; position is the term id.
    pub vocab: Vec<String>,
    term_ids: HashMap<String, usize>,
    pub offsets: Vec<i64>,
    pub doc_ids: Vec<i32>,
    pub tfs: Vec<i16>,
    pub df: Vec<i32>,
    pub doc_len: Vec<i32>,
    pub avgdl: f64,
    pub doc_count: usize,
}

impl InvertedIndex {
    /// Build the index from raw document texts. `doc_id` is the position in
    /// `documents` and stays aligned with the caller's metadata array.
    pub fn build(documents: &[String]) -> Self {
        let doc_count = documents.len();
        if doc_count == 0 {
            return Self::default();
        }

        let tokenized: Vec<Vec<String>> =
            documents.par_iter().map(|doc| tokenize(doc)).collect();

        let mut doc_len: Vec<i32> = Vec::with_capacity(doc_count);
        let mut total_len = 0u64;
        // BTreeMap gives the sorted, deterministic vocabulary order for free.
        let mut postings: BTreeMap<String, Vec<(i32, i16)>> = BTreeMap::new();

        for (doc_id, tokens) in tokenized.iter().enumerate() {
            doc_len.push(tokens.len() as i32);
            total_len += tokens.len() as u64;

            let mut tf: HashMap<&str, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token.as_str()).or_insert(0) += 1;
            }
            for (term, count) in tf {
                let saturated = count.min(i16::MAX as u32) as i16;
                postings
                    .entry(term.to_string())
                    .or_default()
                    .push((doc_id as i32, saturated));
            }
        }

        let vocab_size = postings.len();
        let mut vocab = Vec::with_capacity(vocab_size);
        let mut offsets = Vec::with_capacity(vocab_size + 1);
        let mut doc_ids = Vec::new();
        let mut tfs = Vec::new();
        let mut df = Vec::with_capacity(vocab_size);

        offsets.push(0i64);
        for (term, mut list) in postings {
            list.sort_by_key(|&(doc, _)| doc);
            df.push(list.len() as i32);
            for (doc, tf) in list {
                doc_ids.push(doc);
                tfs.push(tf);
            }
            offsets.push(doc_ids.len() as i64);
            vocab.push(term);
        }

        let term_ids = vocab
            .iter()
            .enumerate()
            .map(|(id, term)| (term.clone(), id))
            .collect();

        Self {
            vocab,
            term_ids,
            offsets,
            doc_ids,
            tfs,
            df,
            doc_len,
            avgdl: total_len as f64 / doc_count as f64,
            doc_count,
        }
    }

    /// Reassemble an index from its columnar parts (the on-disk layout).
    pub fn from_parts(
        vocab: Vec<String>,
        offsets: Vec<i64>,
        doc_ids: Vec<i32>,
        tfs: Vec<i16>,
        df: Vec<i32>,
        doc_len: Vec<i32>,
        avgdl: f64,
    ) -> Self {
        let doc_count = doc_len.len();
        let term_ids = vocab
            .iter()
            .enumerate()
            .map(|(id, term)| (term.clone(), id))
            .collect();
        Self {
            vocab,
            term_ids,
            offsets,
            doc_ids,
            tfs,
            df,
            doc_len,
            avgdl,
            doc_count,
        }
    }

    pub fn term_id(&self, term: &str) -> Option<usize> {
        self.term_ids.get(term).copied()
    }

    fn postings(&self, term_id: usize) -> (&[i32], &[i16]) {
        let start = self.offsets[term_id] as usize;
        let end = self.offsets[term_id + 1] as usize;
        (&self.doc_ids[start..end], &self.tfs[start..end])
    }

    /// BM25 over every document containing any query term.
    ///
    /// Returns up to `raw_k` `(doc_id, score)` pairs, score descending with
    /// doc_id ascending as the tie-break. Documents with zero or negative
    /// accumulated score are excluded; a query that tokenizes to nothing
    /// yields an empty list rather than an error.
    pub fn search(&self, query: &str, raw_k: usize, operator: MatchOperator) -> Vec<(u32, f64)> {
        if self.doc_count == 0 || raw_k == 0 {
            return vec![];
        }

        let tokens = tokenize(query);
        if tokens.is_empty() {
            return vec![];
        }

        // Repetition in the query multiplies the term's contribution.
        let mut query_terms: HashMap<&str, u32> = HashMap::new();
        for token in &tokens {
            *query_terms.entry(token.as_str()).or_insert(0) += 1;
        }

        let mut matched_terms = 0usize;
        let mut scores: HashMap<i32, f64> = HashMap::new();
        let mut term_hits: HashMap<i32, usize> = HashMap::new();

        for (term, repetition) in &query_terms {
            let Some(term_id) = self.term_id(term) else {
                continue;
            };
            matched_terms += 1;
            let df = self.df[term_id] as f64;
            let n = self.doc_count as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

            let (docs, tfs) = self.postings(term_id);
            for (&doc, &tf) in docs.iter().zip(tfs) {
                let tf = tf as f64;
                let len_norm =
                    1.0 - BM25_B + BM25_B * (self.doc_len[doc as usize] as f64 / self.avgdl);
                let contribution =
                    idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * len_norm) * *repetition as f64;
                *scores.entry(doc).or_insert(0.0) += contribution;
                *term_hits.entry(doc).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(u32, f64)> = scores
            .into_iter()
            .filter(|&(doc, score)| {
                score > 0.0
                    && (operator == MatchOperator::Or
                        || term_hits.get(&doc).copied().unwrap_or(0) == matched_terms)
            })
            .map(|(doc, score)| (doc as u32, score))
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(raw_k);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<String> {
        vec![
            "public static void Main(string[] args) { Startup.Run(); }".into(),
            "class Startup { public void ConfigureServices() {} }".into(),
            "SELECT InvoiceId FROM dbo.Invoices WHERE CustomerId = @id".into(),
            "fn unrelated_helper() { compute_checksum(); }".into(),
        ]
    }

    #[test]
    fn builds_sorted_vocabulary_with_csr_offsets() {
        let index = InvertedIndex::build(&corpus());
        assert_eq!(index.doc_count, 4);
        assert_eq!(index.offsets.len(), index.vocab.len() + 1);
        assert_eq!(index.df.len(), index.vocab.len());
        assert!(index.vocab.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*index.offsets.last().unwrap() as usize, index.doc_ids.len());
        assert_eq!(index.doc_ids.len(), index.tfs.len());
        assert!(index.avgdl > 0.0);
    }

    #[test]
    fn search_finds_matching_documents() {
        let index = InvertedIndex::build(&corpus());
        let hits = index.search("startup", 10, MatchOperator::Or);
        let docs: Vec<u32> = hits.iter().map(|&(d, _)| d).collect();
        assert!(docs.contains(&0));
        assert!(docs.contains(&1));
    }

    #[test]
    fn empty_query_returns_empty_not_error() {
        let index = InvertedIndex::build(&corpus());
        assert!(index.search("!!! ???", 10, MatchOperator::Or).is_empty());
        assert!(index.search("", 10, MatchOperator::Or).is_empty());
    }

    #[test]
    fn unknown_terms_return_empty() {
        let index = InvertedIndex::build(&corpus());
        assert!(index
            .search("zzzformat nothinghere", 10, MatchOperator::Or)
            .is_empty());
    }

    #[test]
    fn and_operator_requires_all_terms() {
        let index = InvertedIndex::build(&corpus());
        let or_hits = index.search("startup main", 10, MatchOperator::Or);
        let and_hits = index.search("startup main", 10, MatchOperator::And);
        assert!(or_hits.len() >= 2);
        // Only doc 0 contains both "startup" and "main".
        assert_eq!(and_hits.len(), 1);
        assert_eq!(and_hits[0].0, 0);
    }

    #[test]
    fn idf_decreases_with_document_frequency() {
        // "common" in all docs, "rare" in one; rare must outscore common for
        // a document containing both once.
        let docs = vec![
            "common rare filler words here".to_string(),
            "common words filler".to_string(),
            "common filler words".to_string(),
        ];
        let index = InvertedIndex::build(&docs);
        let rare = index.search("rare", 10, MatchOperator::Or);
        let common = index.search("common", 10, MatchOperator::Or);
        let rare_score = rare.iter().find(|&&(d, _)| d == 0).unwrap().1;
        let common_score = common.iter().find(|&&(d, _)| d == 0).unwrap().1;
        assert!(rare_score > common_score);
    }

    #[test]
    fn query_repetition_multiplies_contribution() {
        let index = InvertedIndex::build(&corpus());
        let single = index.search("startup", 10, MatchOperator::Or);
        let repeated = index.search("startup startup", 10, MatchOperator::Or);
        let s1 = single.iter().find(|&&(d, _)| d == 1).unwrap().1;
        let s2 = repeated.iter().find(|&&(d, _)| d == 1).unwrap().1;
        assert!((s2 - 2.0 * s1).abs() < 1e-9);
    }

    #[test]
    fn ranking_ties_break_by_doc_id() {
        let docs = vec!["alpha beta".to_string(), "alpha beta".to_string()];
        let index = InvertedIndex::build(&docs);
        let hits = index.search("alpha", 10, MatchOperator::Or);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 0);
        assert_eq!(hits[1].0, 1);
    }

    #[test]
    fn raw_k_truncates() {
        let docs: Vec<String> = (0..20).map(|i| format!("shared term doc{i}")).collect();
        let index = InvertedIndex::build(&docs);
        let hits = index.search("shared", 5, MatchOperator::Or);
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn empty_corpus_is_searchable() {
        let index = InvertedIndex::build(&[]);
        assert!(index.search("anything", 10, MatchOperator::Or).is_empty());
    }

    #[test]
    fn round_trips_through_parts() {
        let index = InvertedIndex::build(&corpus());
        let rebuilt = InvertedIndex::from_parts(
            index.vocab.clone(),
            index.offsets.clone(),
            index.doc_ids.clone(),
            index.tfs.clone(),
            index.df.clone(),
            index.doc_len.clone(),
            index.avgdl,
        );
        assert_eq!(
            index.search("startup main", 10, MatchOperator::Or),
            rebuilt.search("startup main", 10, MatchOperator::Or)
        );
    }
}
