mod disk;
mod index;
mod npy;
mod tokenize;

pub use disk::{load_index, save_index, IndexMeta};
pub use index::{InvertedIndex, MatchOperator, BM25_B, BM25_K1};
pub use tokenize::tokenize;
