//! On-disk layout of the inverted index: one directory per corpus/snapshot.
//!
//! `tf_vocab.json` maps term → id, the `tf_*.npy` files hold the flat CSR
//! arrays, and `tf_index_meta.json` carries corpus-level statistics. The
//! layout is append-free and immutable for the lifetime of a serving process.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::index::InvertedIndex;
use super::npy::{read_npy, write_npy};
use crate::error::{EngineError, Result};

const VOCAB_FILE: &str = "tf_vocab.json";
const OFFSETS_FILE: &str = "tf_offsets.npy";
const DOC_IDS_FILE: &str = "tf_doc_ids.npy";
const TFS_FILE: &str = "tf_tfs.npy";
const DF_FILE: &str = "tf_df.npy";
const DOC_LEN_FILE: &str = "tf_doc_len.npy";
const META_FILE: &str = "tf_index_meta.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub doc_count: usize,
    pub vocab_size: usize,
    pub avgdl: f64,
}

pub fn save_index(dir: &Path, index: &InvertedIndex) -> Result<()> {
    fs::create_dir_all(dir)?;

    let vocab: BTreeMap<&str, usize> = index
        .vocab
        .iter()
        .enumerate()
        .map(|(id, term)| (term.as_str(), id))
        .collect();
    fs::write(dir.join(VOCAB_FILE), serde_json::to_vec(&vocab)?)?;

    write_npy(&dir.join(OFFSETS_FILE), &index.offsets)?;
    write_npy(&dir.join(DOC_IDS_FILE), &index.doc_ids)?;
    write_npy(&dir.join(TFS_FILE), &index.tfs)?;
    write_npy(&dir.join(DF_FILE), &index.df)?;
    write_npy(&dir.join(DOC_LEN_FILE), &index.doc_len)?;

    let meta = IndexMeta {
        doc_count: index.doc_count,
        vocab_size: index.vocab.len(),
        avgdl: index.avgdl,
    };
    fs::write(dir.join(META_FILE), serde_json::to_vec_pretty(&meta)?)?;
    Ok(())
}

/// Load an index directory. `aligned_doc_count` is the length of the caller's
/// metadata array; a mismatch against the stored document count is surfaced
/// as a warning rather than a hard failure.
pub fn load_index(dir: &Path, aligned_doc_count: Option<usize>) -> Result<InvertedIndex> {
    let vocab_path = dir.join(VOCAB_FILE);
    let vocab_bytes = fs::read(&vocab_path).map_err(|e| {
        EngineError::index(format!("failed to read {}: {e}", vocab_path.display()))
    })?;
    let vocab_map: BTreeMap<String, usize> = serde_json::from_slice(&vocab_bytes)?;

    let mut vocab = vec![String::new(); vocab_map.len()];
    for (term, id) in vocab_map {
        if id >= vocab.len() {
            return Err(EngineError::index(format!(
                "{}: term id {id} out of range for vocab of {}",
                vocab_path.display(),
                vocab.len()
            )));
        }
        vocab[id] = term;
    }

    let offsets: Vec<i64> = read_npy(&dir.join(OFFSETS_FILE))?;
    let doc_ids: Vec<i32> = read_npy(&dir.join(DOC_IDS_FILE))?;
    let tfs: Vec<i16> = read_npy(&dir.join(TFS_FILE))?;
    let df: Vec<i32> = read_npy(&dir.join(DF_FILE))?;
    let doc_len: Vec<i32> = read_npy(&dir.join(DOC_LEN_FILE))?;

    let meta_bytes = fs::read(dir.join(META_FILE))
        .map_err(|e| EngineError::index(format!("failed to read index meta: {e}")))?;
    let meta: IndexMeta = serde_json::from_slice(&meta_bytes)?;

    if offsets.len() != vocab.len() + 1 || df.len() != vocab.len() {
        return Err(EngineError::index(format!(
            "{}: offsets/df arrays do not match vocabulary size {}",
            dir.display(),
            vocab.len()
        )));
    }
    if doc_ids.len() != tfs.len() || *offsets.last().unwrap_or(&0) as usize != doc_ids.len() {
        return Err(EngineError::index(format!(
            "{}: postings arrays are inconsistent",
            dir.display()
        )));
    }
    if meta.doc_count != doc_len.len() {
        return Err(EngineError::index(format!(
            "{}: meta doc_count {} does not match doc length array {}",
            dir.display(),
            meta.doc_count,
            doc_len.len()
        )));
    }

    if let Some(aligned) = aligned_doc_count {
        if aligned != meta.doc_count {
            warn!(
                index_docs = meta.doc_count,
                metadata_docs = aligned,
                dir = %dir.display(),
                "document count mismatch between inverted index and metadata array"
            );
        }
    }

    Ok(InvertedIndex::from_parts(
        vocab, offsets, doc_ids, tfs, df, doc_len, meta.avgdl,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fts::index::MatchOperator;
    use tempfile::tempdir;

    fn sample_index() -> InvertedIndex {
        InvertedIndex::build(&[
            "public static void Main".to_string(),
            "configure services startup".to_string(),
            "select from invoices".to_string(),
        ])
    }

    #[test]
    fn save_then_load_preserves_ranking() {
        let dir = tempdir().unwrap();
        let index = sample_index();
        save_index(dir.path(), &index).unwrap();

        let loaded = load_index(dir.path(), Some(3)).unwrap();
        assert_eq!(loaded.doc_count, 3);
        assert_eq!(loaded.vocab, index.vocab);
        assert_eq!(
            index.search("startup services", 10, MatchOperator::Or),
            loaded.search("startup services", 10, MatchOperator::Or)
        );
    }

    #[test]
    fn creates_expected_files() {
        let dir = tempdir().unwrap();
        save_index(dir.path(), &sample_index()).unwrap();
        for file in [
            VOCAB_FILE,
            OFFSETS_FILE,
            DOC_IDS_FILE,
            TFS_FILE,
            DF_FILE,
            DOC_LEN_FILE,
            META_FILE,
        ] {
            assert!(dir.path().join(file).exists(), "missing {file}");
        }
    }

    #[test]
    fn doc_count_mismatch_is_soft() {
        let dir = tempdir().unwrap();
        save_index(dir.path(), &sample_index()).unwrap();
        // Mismatched metadata alignment loads anyway (warning only).
        let loaded = load_index(dir.path(), Some(99)).unwrap();
        assert_eq!(loaded.doc_count, 3);
    }

    #[test]
    fn missing_primary_artifact_is_fatal() {
        let dir = tempdir().unwrap();
        save_index(dir.path(), &sample_index()).unwrap();
        fs::remove_file(dir.path().join(VOCAB_FILE)).unwrap();
        assert!(load_index(dir.path(), None).is_err());
    }

    #[test]
    fn corrupted_postings_are_rejected() {
        let dir = tempdir().unwrap();
        save_index(dir.path(), &sample_index()).unwrap();
        // Truncate doc_ids so it no longer matches offsets.
        write_npy::<i32>(&dir.path().join(DOC_IDS_FILE), &[0]).unwrap();
        let err = load_index(dir.path(), None).unwrap_err();
        assert!(err.to_string().contains("inconsistent"));
    }
}
