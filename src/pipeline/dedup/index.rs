//! Vector similarity index over admitted documents.
//!
//! The shipped implementation scans the `journal_embeddings` table and
//! ranks by cosine similarity in process. Corpora here are bounded by what
//! one operator has admitted, so a linear scan holds up; a real ANN service
//! can be swapped in behind the same trait.

use rusqlite::{params, Connection, OptionalExtension};

use super::similarity::cosine;
use super::DedupError;

/// A neighbour returned by the index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub journal_id: i64,
    pub similarity: f64,
}

/// Nearest-neighbour search over stored document embeddings.
pub trait VectorIndex: Send + Sync {
    /// Store the embedding for an admitted journal entry.
    fn add(&self, conn: &Connection, journal_id: i64, embedding: &[f32])
        -> Result<(), DedupError>;

    /// Neighbours with similarity ≥ `threshold`, best first, at most `k`.
    fn nearest(
        &self,
        conn: &Connection,
        query: &[f32],
        threshold: f64,
        k: usize,
    ) -> Result<Vec<VectorMatch>, DedupError>;
}

/// SQLite-backed index scanning `journal_embeddings`.
pub struct SqliteVectorIndex;

impl SqliteVectorIndex {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqliteVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex for SqliteVectorIndex {
    fn add(
        &self,
        conn: &Connection,
        journal_id: i64,
        embedding: &[f32],
    ) -> Result<(), DedupError> {
        conn.execute(
            "INSERT OR REPLACE INTO journal_embeddings (journal_id, embedding, dimension)
             VALUES (?1, ?2, ?3)",
            params![journal_id, encode_embedding(embedding), embedding.len() as i64],
        )
        .map_err(crate::db::DatabaseError::from)?;
        Ok(())
    }

    fn nearest(
        &self,
        conn: &Connection,
        query: &[f32],
        threshold: f64,
        k: usize,
    ) -> Result<Vec<VectorMatch>, DedupError> {
        let mut stmt = conn
            .prepare("SELECT journal_id, embedding FROM journal_embeddings")
            .map_err(crate::db::DatabaseError::from)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(crate::db::DatabaseError::from)?;

        let mut matches = Vec::new();
        for row in rows {
            let (journal_id, blob) = row.map_err(crate::db::DatabaseError::from)?;
            let stored = decode_embedding(&blob);
            let similarity = cosine(query, &stored);
            if similarity >= threshold {
                matches.push(VectorMatch { journal_id, similarity });
            }
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(k);
        Ok(matches)
    }
}

impl SqliteVectorIndex {
    /// Stored embedding for one entry, if any. Used by maintenance tooling.
    pub fn get(&self, conn: &Connection, journal_id: i64) -> Result<Option<Vec<f32>>, DedupError> {
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM journal_embeddings WHERE journal_id = ?1",
                params![journal_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(crate::db::DatabaseError::from)?;
        Ok(blob.map(|b| decode_embedding(&b)))
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
