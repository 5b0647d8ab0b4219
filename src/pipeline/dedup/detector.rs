//! The escalating duplicate cascade.
//!
//! Tier 0 compares normalized filenames (string edit ratio, no external
//! calls). Tier 1 compares OCR text samples (token-set Jaccard, one OCR
//! call). Tier 2 compares embeddings (one model call plus an index scan).
//! The first tier to cross its threshold wins; unavailable collaborators
//! degrade their tier to a skip.
//!
//! The detector is a pure classifier over data the journal already holds.
//! Persisting a new document's fingerprint is an explicit, separate
//! `remember` call made after admission.

use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::embedding::EmbeddingModel;
use super::index::VectorIndex;
use super::normalize::{content_sample, normalize_filename};
use super::ocr::OcrEngine;
use super::similarity::{edit_ratio, token_set_jaccard};
use super::{DedupConfig, DedupError};
use crate::db::DatabaseError;

// ═══════════════════════════════════════════
// Result types
// ═══════════════════════════════════════════

/// How a duplicate was recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    ExactHash,
    Filename,
    OcrContent,
    Semantic,
    None,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactHash => "exact_hash",
            Self::Filename => "filename",
            Self::OcrContent => "ocr_content",
            Self::Semantic => "semantic",
            Self::None => "none",
        }
    }
}

/// Outcome of one cascade run (or of the upstream exact-hash check).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub is_duplicate: bool,
    pub match_type: MatchKind,
    /// Best similarity observed by the deciding tier, 0.0–1.0.
    pub similarity: f64,
    pub matched_journal_id: Option<i64>,
    /// −1 exact hash; 0–2 cascade tiers. For a non-duplicate this is the
    /// deepest tier that actually ran.
    pub tier: i8,
}

impl DuplicateMatch {
    /// Exact content-hash match, found before the cascade runs.
    pub fn exact(matched_journal_id: i64) -> Self {
        Self {
            is_duplicate: true,
            match_type: MatchKind::ExactHash,
            similarity: 1.0,
            matched_journal_id: Some(matched_journal_id),
            tier: -1,
        }
    }

    fn duplicate(match_type: MatchKind, tier: i8, similarity: f64, journal_id: i64) -> Self {
        Self {
            is_duplicate: true,
            match_type,
            similarity,
            matched_journal_id: Some(journal_id),
            tier,
        }
    }

    fn confirmed_new(deepest_tier: i8) -> Self {
        Self {
            is_duplicate: false,
            match_type: MatchKind::None,
            similarity: 0.0,
            matched_journal_id: None,
            tier: deepest_tier,
        }
    }
}

/// Everything one `check` produced: the verdict, the fingerprint pieces
/// worth keeping if the document is admitted, and a stats snapshot.
#[derive(Debug, Clone)]
pub struct DedupCheck {
    pub result: DuplicateMatch,
    /// Lower-cased, truncated text the content/semantic tiers worked on.
    pub content_sample: Option<String>,
    /// Embedding of the sample, when the semantic tier ran.
    pub embedding: Option<Vec<f32>>,
    pub stats: DedupStatsSnapshot,
}

// ═══════════════════════════════════════════
// Statistics
// ═══════════════════════════════════════════

/// Per-tier counters. Owned by one detector instance, not process-global,
/// so concurrent workers never share mutable state through it.
#[derive(Debug, Default)]
pub struct DedupStats {
    filename_checks: AtomicU64,
    filename_hits: AtomicU64,
    content_checks: AtomicU64,
    content_hits: AtomicU64,
    semantic_checks: AtomicU64,
    semantic_hits: AtomicU64,
    confirmed_new: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStatsSnapshot {
    pub filename_checks: u64,
    pub filename_hits: u64,
    pub content_checks: u64,
    pub content_hits: u64,
    pub semantic_checks: u64,
    pub semantic_hits: u64,
    pub confirmed_new: u64,
}

impl DedupStats {
    fn snapshot(&self) -> DedupStatsSnapshot {
        DedupStatsSnapshot {
            filename_checks: self.filename_checks.load(Ordering::Relaxed),
            filename_hits: self.filename_hits.load(Ordering::Relaxed),
            content_checks: self.content_checks.load(Ordering::Relaxed),
            content_hits: self.content_hits.load(Ordering::Relaxed),
            semantic_checks: self.semantic_checks.load(Ordering::Relaxed),
            semantic_hits: self.semantic_hits.load(Ordering::Relaxed),
            confirmed_new: self.confirmed_new.load(Ordering::Relaxed),
        }
    }
}

// ═══════════════════════════════════════════
// Detector
// ═══════════════════════════════════════════

struct SemanticTier {
    embedder: Box<dyn EmbeddingModel>,
    index: Box<dyn VectorIndex>,
}

/// Cascading duplicate detector over the journal corpus.
pub struct TieredDeduplicator {
    config: DedupConfig,
    ocr: Option<Box<dyn OcrEngine>>,
    semantic: Option<SemanticTier>,
    stats: DedupStats,
}

impl TieredDeduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            ocr: None,
            semantic: None,
            stats: DedupStats::default(),
        }
    }

    /// Attach an OCR engine for the content tier.
    pub fn with_ocr(mut self, ocr: Box<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Attach an embedding model and index for the semantic tier.
    pub fn with_semantic(
        mut self,
        embedder: Box<dyn EmbeddingModel>,
        index: Box<dyn VectorIndex>,
    ) -> Self {
        self.semantic = Some(SemanticTier { embedder, index });
        self
    }

    /// Cumulative counters for this detector instance.
    pub fn stats(&self) -> DedupStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run the cascade for one candidate document.
    ///
    /// `extracted_text` short-circuits the OCR call when the caller already
    /// holds text for the document. `exclude_journal_id` keeps a candidate
    /// whose own pending row is already journaled from matching itself.
    pub fn check(
        &self,
        conn: &Connection,
        filename: &str,
        raw_bytes: &[u8],
        extracted_text: Option<&str>,
        exclude_journal_id: Option<i64>,
    ) -> Result<DedupCheck, DedupError> {
        let corpus = load_corpus(conn, exclude_journal_id)?;

        // Tier 0: filename edit similarity. O(n) string comparisons.
        let candidate_name = normalize_filename(filename);
        if !candidate_name.is_empty() {
            self.stats.filename_checks.fetch_add(1, Ordering::Relaxed);

            let best = corpus
                .iter()
                .map(|doc| (doc.journal_id, edit_ratio(&candidate_name, &doc.normalized_filename)))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            if let Some((journal_id, score)) = best {
                if score >= self.config.filename_threshold {
                    self.stats.filename_hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(journal_id, score, "Filename tier matched");
                    return Ok(self.finish(
                        DuplicateMatch::duplicate(MatchKind::Filename, 0, score, journal_id),
                        None,
                        None,
                    ));
                }
            }
        }

        // Tier 1: OCR content token overlap. One external OCR call.
        let text = match extracted_text {
            Some(text) => text.to_string(),
            None => match &self.ocr {
                Some(ocr) => match ocr.extract_text(raw_bytes) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "OCR failed, skipping content tier");
                        String::new()
                    }
                },
                None => String::new(),
            },
        };

        let sample = content_sample(&text, self.config.sample_chars);
        let sample = (!sample.is_empty()).then_some(sample);

        if let Some(ref sample) = sample {
            self.stats.content_checks.fetch_add(1, Ordering::Relaxed);

            let best = corpus
                .iter()
                .filter_map(|doc| {
                    let stored = doc.content_sample.as_deref()?;
                    Some((doc.journal_id, token_set_jaccard(sample, stored)))
                })
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            if let Some((journal_id, score)) = best {
                if score >= self.config.content_threshold {
                    self.stats.content_hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(journal_id, score, "Content tier matched");
                    return Ok(self.finish(
                        DuplicateMatch::duplicate(MatchKind::OcrContent, 1, score, journal_id),
                        sample.clone().into(),
                        None,
                    ));
                }
            }
        }

        // Tier 2: semantic similarity. One embedding call plus index scan.
        // Without a configured model the document classifies as new: a
        // missed duplicate costs one analysis call, a false duplicate
        // silently drops a real document.
        let mut embedding = None;
        let mut deepest: i8 = if sample.is_some() { 1 } else { 0 };
        if let (Some(semantic), Some(sample)) = (&self.semantic, &sample) {
            self.stats.semantic_checks.fetch_add(1, Ordering::Relaxed);
            deepest = 2;

            let vector = semantic.embedder.embed(sample)?;
            let neighbours = semantic.index.nearest(
                conn,
                &vector,
                self.config.semantic_threshold,
                self.config.nearest_k,
            )?;
            embedding = Some(vector);

            if let Some(best) = neighbours.first() {
                self.stats.semantic_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    journal_id = best.journal_id,
                    similarity = best.similarity,
                    "Semantic tier matched"
                );
                return Ok(self.finish(
                    DuplicateMatch::duplicate(
                        MatchKind::Semantic,
                        2,
                        best.similarity,
                        best.journal_id,
                    ),
                    sample.clone().into(),
                    embedding,
                ));
            }
        } else if self.semantic.is_none() {
            tracing::debug!("No embedding model configured, semantic tier skipped");
        }

        self.stats.confirmed_new.fetch_add(1, Ordering::Relaxed);
        Ok(self.finish(DuplicateMatch::confirmed_new(deepest), sample, embedding))
    }

    /// Persist the fingerprint of an admitted document so later checks can
    /// see it. No-op for the semantic part when that tier is not wired.
    pub fn remember(
        &self,
        conn: &Connection,
        journal_id: i64,
        check: &DedupCheck,
    ) -> Result<(), DedupError> {
        if let (Some(semantic), Some(embedding)) = (&self.semantic, &check.embedding) {
            semantic.index.add(conn, journal_id, embedding)?;
        }
        Ok(())
    }

    fn finish(
        &self,
        result: DuplicateMatch,
        content_sample: Option<String>,
        embedding: Option<Vec<f32>>,
    ) -> DedupCheck {
        DedupCheck {
            result,
            content_sample,
            embedding,
            stats: self.stats.snapshot(),
        }
    }
}

// ═══════════════════════════════════════════
// Corpus
// ═══════════════════════════════════════════

struct CorpusDoc {
    journal_id: i64,
    normalized_filename: String,
    content_sample: Option<String>,
}

/// Every non-duplicate journal entry. Duplicate rows are audit trail, not
/// corpus: matching against them would chain back-references.
fn load_corpus(
    conn: &Connection,
    exclude_journal_id: Option<i64>,
) -> Result<Vec<CorpusDoc>, DedupError> {
    let mut stmt = conn
        .prepare(
            "SELECT journal_id, normalized_filename, content_sample
             FROM journal
             WHERE is_duplicate = 0 AND (?1 IS NULL OR journal_id != ?1)",
        )
        .map_err(DatabaseError::from)?;

    let rows = stmt
        .query_map(params![exclude_journal_id], |row| {
            Ok(CorpusDoc {
                journal_id: row.get(0)?,
                normalized_filename: row.get(1)?,
                content_sample: row.get(2)?,
            })
        })
        .map_err(DatabaseError::from)?;

    let mut corpus = Vec::new();
    for row in rows {
        corpus.push(row.map_err(DatabaseError::from)?);
    }
    Ok(corpus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::pipeline::dedup::embedding::MockEmbedder;
    use crate::pipeline::dedup::index::SqliteVectorIndex;
    use crate::pipeline::dedup::ocr::MockOcr;

    /// OCR that must never be reached — proves tier short-circuiting.
    struct UnreachableOcr;
    impl OcrEngine for UnreachableOcr {
        fn extract_text(&self, _: &[u8]) -> Result<String, DedupError> {
            panic!("OCR called although a cheaper tier should have decided");
        }
    }

    struct FailingOcr;
    impl OcrEngine for FailingOcr {
        fn extract_text(&self, _: &[u8]) -> Result<String, DedupError> {
            Err(DedupError::Ocr("engine offline".into()))
        }
    }

    /// Embedder that maps every text to the same vector — forces a
    /// semantic hit regardless of token overlap.
    struct ConstantEmbedder;
    impl EmbeddingModel for ConstantEmbedder {
        fn embed(&self, _: &str) -> Result<Vec<f32>, DedupError> {
            Ok(vec![1.0, 0.0, 0.0])
        }
        fn dimension(&self) -> usize {
            3
        }
    }

    fn seed_entry(
        conn: &Connection,
        id: i64,
        normalized_filename: &str,
        sample: Option<&str>,
    ) {
        conn.execute(
            "INSERT INTO journal (journal_id, content_hash, original_filename,
                                  normalized_filename, source_type, content_sample,
                                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3, 'upload', ?4,
                     '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            params![id, format!("hash-{id}"), normalized_filename, sample],
        )
        .unwrap();
    }

    #[test]
    fn similar_filename_short_circuits_without_ocr() {
        let conn = open_memory_database().unwrap();
        seed_entry(&conn, 1, "bank statement january", None);

        let detector =
            TieredDeduplicator::new(DedupConfig::default()).with_ocr(Box::new(UnreachableOcr));

        let check = detector
            .check(&conn, "bank statement january (2).pdf", b"bytes", None, None)
            .unwrap();

        assert!(check.result.is_duplicate);
        assert_eq!(check.result.tier, 0);
        assert_eq!(check.result.match_type, MatchKind::Filename);
        assert_eq!(check.result.matched_journal_id, Some(1));
        assert_eq!(check.stats.filename_hits, 1);
        assert_eq!(check.stats.content_checks, 0);
    }

    #[test]
    fn content_overlap_matches_at_tier_one() {
        let conn = open_memory_database().unwrap();
        seed_entry(
            &conn,
            7,
            "electric bill",
            Some("electric utility invoice account 4411 total due 83.20"),
        );

        let detector = TieredDeduplicator::new(DedupConfig::default()).with_ocr(Box::new(
            MockOcr::returning("ELECTRIC utility invoice account 4411 total due 83.20"),
        ));

        let check = detector
            .check(&conn, "IMG_20240112_093015.jpg", b"scan bytes", None, None)
            .unwrap();

        assert!(check.result.is_duplicate);
        assert_eq!(check.result.tier, 1);
        assert_eq!(check.result.match_type, MatchKind::OcrContent);
        assert_eq!(check.result.matched_journal_id, Some(7));
        assert_eq!(check.stats.content_hits, 1);
    }

    #[test]
    fn semantic_tier_catches_rephrased_content() {
        let conn = open_memory_database().unwrap();
        seed_entry(&conn, 3, "quarterly report", Some("alpha beta gamma"));

        let index = SqliteVectorIndex::new();
        index.add(&conn, 3, &[1.0, 0.0, 0.0]).unwrap();

        let detector = TieredDeduplicator::new(DedupConfig::default())
            .with_ocr(Box::new(MockOcr::returning("delta epsilon zeta")))
            .with_semantic(Box::new(ConstantEmbedder), Box::new(index));

        // Zero filename similarity, zero token overlap, cosine 1.0
        let check = detector
            .check(&conn, "PXL_20240301_110203.jpg", b"bytes", None, None)
            .unwrap();

        assert!(check.result.is_duplicate);
        assert_eq!(check.result.tier, 2);
        assert_eq!(check.result.match_type, MatchKind::Semantic);
        assert_eq!(check.result.matched_journal_id, Some(3));
        assert!(check.result.similarity >= 0.95);
    }

    #[test]
    fn ocr_failure_degrades_to_skip() {
        let conn = open_memory_database().unwrap();
        seed_entry(&conn, 1, "water bill", Some("water utility charges"));

        let detector =
            TieredDeduplicator::new(DedupConfig::default()).with_ocr(Box::new(FailingOcr));

        let check = detector
            .check(&conn, "DSC_9912.jpg", b"bytes", None, None)
            .unwrap();

        assert!(!check.result.is_duplicate);
        assert_eq!(check.result.match_type, MatchKind::None);
        assert_eq!(check.stats.content_checks, 0, "skipped tier must not count");
        assert_eq!(check.stats.confirmed_new, 1);
    }

    #[test]
    fn missing_embedder_classifies_as_new() {
        let conn = open_memory_database().unwrap();
        seed_entry(&conn, 1, "old lease", Some("completely different words"));

        let detector = TieredDeduplicator::new(DedupConfig::default())
            .with_ocr(Box::new(MockOcr::returning("fresh unseen content here")));

        let check = detector
            .check(&conn, "new upload.pdf", b"bytes", None, None)
            .unwrap();

        assert!(!check.result.is_duplicate);
        assert_eq!(check.stats.semantic_checks, 0);
        assert_eq!(check.stats.confirmed_new, 1);
    }

    #[test]
    fn provided_text_skips_the_ocr_call() {
        let conn = open_memory_database().unwrap();
        seed_entry(&conn, 5, "receipt", Some("grocery receipt total 54.10"));

        let detector =
            TieredDeduplicator::new(DedupConfig::default()).with_ocr(Box::new(UnreachableOcr));

        let check = detector
            .check(
                &conn,
                "unrelated-name.pdf",
                b"bytes",
                Some("grocery receipt total 54.10"),
                None,
            )
            .unwrap();

        assert!(check.result.is_duplicate);
        assert_eq!(check.result.tier, 1);
    }

    #[test]
    fn candidate_never_matches_its_own_row() {
        let conn = open_memory_database().unwrap();
        seed_entry(&conn, 42, "tax return 2023", None);

        let detector = TieredDeduplicator::new(DedupConfig::default());

        let check = detector
            .check(&conn, "tax return 2023.pdf", b"bytes", None, Some(42))
            .unwrap();

        assert!(!check.result.is_duplicate, "self-match must be excluded");
    }

    #[test]
    fn duplicate_rows_are_not_corpus() {
        let conn = open_memory_database().unwrap();
        conn.execute(
            "INSERT INTO journal (journal_id, content_hash, original_filename,
                                  normalized_filename, source_type, is_duplicate,
                                  created_at, updated_at)
             VALUES (9, 'h9', 'lease.pdf', 'lease', 'upload', 1,
                     '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let detector = TieredDeduplicator::new(DedupConfig::default());
        let check = detector.check(&conn, "lease.pdf", b"bytes", None, None).unwrap();

        assert!(!check.result.is_duplicate);
    }

    #[test]
    fn stats_accumulate_across_checks() {
        let conn = open_memory_database().unwrap();
        let detector = TieredDeduplicator::new(DedupConfig::default());

        detector.check(&conn, "a.pdf", b"x", None, None).unwrap();
        detector.check(&conn, "b.pdf", b"y", None, None).unwrap();

        let stats = detector.stats();
        assert_eq!(stats.filename_checks, 2);
        assert_eq!(stats.confirmed_new, 2);
        assert_eq!(stats.filename_hits, 0);
    }

    #[test]
    fn remember_stores_embedding_for_later_checks() {
        let conn = open_memory_database().unwrap();
        seed_entry(&conn, 11, "memo", None);

        let detector = TieredDeduplicator::new(DedupConfig::default())
            .with_ocr(Box::new(MockOcr::returning("internal memo budget planning")))
            .with_semantic(Box::new(MockEmbedder::new()), Box::new(SqliteVectorIndex::new()));

        let check = detector
            .check(&conn, "zz-unique.pdf", b"bytes", None, None)
            .unwrap();
        assert!(!check.result.is_duplicate);
        assert!(check.embedding.is_some());

        detector.remember(&conn, 11, &check).unwrap();

        let stored = SqliteVectorIndex::new().get(&conn, 11).unwrap();
        assert!(stored.is_some());
    }
}
