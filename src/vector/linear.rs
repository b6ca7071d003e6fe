use rayon::prelude::*;

use crate::error::{EngineError, Result};

use super::{cosine_similarity, select_top_k, VectorIndex};

/// Brute-force cosine index over a dense row-major embedding matrix.
/// Exact by construction, so recall never depends on index tuning; the
/// oversampling in the adapter exists purely for the filtering stages.
pub struct LinearVectorIndex {
    vectors: Vec<f32>,
    dimension: usize,
    rows: usize,
}

impl LinearVectorIndex {
    pub fn new(vectors: Vec<f32>, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(EngineError::validation("embedding dimension must be > 0"));
        }
        if vectors.len() % dimension != 0 {
            return Err(EngineError::validation(format!(
                "embedding buffer of {} floats is not a multiple of dimension {}",
                vectors.len(),
                dimension
            )));
        }
        let rows = vectors.len() / dimension;
        Ok(Self {
            vectors,
            dimension,
            rows,
        })
    }

    pub fn from_rows(rows: &[Vec<f32>], dimension: usize) -> Result<Self> {
        let mut flat = Vec::with_capacity(rows.len() * dimension);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dimension {
                return Err(EngineError::validation(format!(
                    "embedding row {} has dimension {}, expected {}",
                    i,
                    row.len(),
                    dimension
                )));
            }
            flat.extend_from_slice(row);
        }
        Self::new(flat, dimension)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn row(&self, idx: u32) -> &[f32] {
        let start = idx as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    fn check_query(&self, query: &[f32]) -> Result<()> {
        if query.len() != self.dimension {
            return Err(EngineError::validation(format!(
                "query embedding has dimension {}, index expects {}",
                query.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}

impl VectorIndex for LinearVectorIndex {
    fn len(&self) -> usize {
        self.rows
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>> {
        self.check_query(query)?;
        let mut matches: Vec<(u32, f32)> = (0..self.rows as u32)
            .into_par_iter()
            .map(|row| (row, cosine_similarity(query, self.row(row))))
            .collect();
        select_top_k(&mut matches, k);
        Ok(matches)
    }

    fn search_subset(&self, query: &[f32], rows: &[u32], k: usize) -> Result<Vec<(u32, f32)>> {
        self.check_query(query)?;
        for &row in rows {
            if row as usize >= self.rows {
                return Err(EngineError::validation(format!(
                    "subset row {} out of bounds for index of {} rows",
                    row, self.rows
                )));
            }
        }
        let mut matches: Vec<(u32, f32)> = rows
            .par_iter()
            .map(|&row| (row, cosine_similarity(query, self.row(row))))
            .collect();
        select_top_k(&mut matches, k);
        Ok(matches)
    }
}
