//! Cascading duplicate detection.
//!
//! Three escalating tiers, cheapest first: filename edit similarity, OCR
//! content token overlap, semantic embedding similarity. A tier that crosses
//! its threshold short-circuits everything after it. Exact byte duplicates
//! are caught upstream by the journal's content hash and never reach this
//! cascade.

pub mod detector;
pub mod embedding;
pub mod index;
pub mod normalize;
pub mod ocr;
pub mod similarity;

pub use detector::*;
pub use embedding::{EmbeddingModel, MockEmbedder, EMBEDDING_DIM};
pub use index::{SqliteVectorIndex, VectorIndex, VectorMatch};
pub use normalize::{content_sample, normalize_filename};
pub use ocr::{MockOcr, OcrEngine};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Thresholds and limits for the cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Tier 0: normalized filename edit-similarity threshold.
    pub filename_threshold: f64,
    /// Tier 1: token-set Jaccard threshold over content samples.
    pub content_threshold: f64,
    /// Tier 2: cosine similarity threshold over embeddings.
    pub semantic_threshold: f64,
    /// Content sample length in characters, lower-cased.
    pub sample_chars: usize,
    /// How many nearest neighbours to pull from the vector index.
    pub nearest_k: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            filename_threshold: 0.70,
            content_threshold: 0.85,
            semantic_threshold: 0.95,
            sample_chars: 1000,
            nearest_k: 5,
        }
    }
}
