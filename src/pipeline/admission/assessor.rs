//! The assessment pipeline: submission → decision.
//!
//! One `submit` call journals the attempt, runs the exact-hash fast path
//! and the tiered cascade, classifies the document type and returns a
//! definite decision with a human-readable reason. Queue item creation is
//! the caller's move (`pipeline::intake`).

use base64::Engine;
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::ledger::{NewSubmission, SqliteJournal};
use super::rules::RuleTable;
use super::AdmissionError;
use crate::db::DatabaseError;
use crate::models::SourceType;
use crate::pipeline::dedup::{
    normalize_filename, DedupCheck, DedupStatsSnapshot, DuplicateMatch, TieredDeduplicator,
};

/// SHA-256 content hash of the raw bytes, base64-encoded. Ground truth for
/// exact duplicates.
pub fn content_hash(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// The decision handed back for every submission.
#[derive(Debug, Clone, Serialize)]
pub struct AssessmentResult {
    pub journal_id: i64,
    pub should_process: bool,
    pub reason: String,
    pub is_duplicate: bool,
    pub duplicate_of: Option<i64>,
    /// −1 exact hash, 0–2 cascade tier. None for non-duplicates.
    pub duplicate_tier: Option<i8>,
    /// Rule priority for admitted documents; 0 when nothing will be queued.
    pub priority: u8,
    pub document_type: Option<String>,
}

/// Admission gate for inbound documents.
pub struct DocumentAssessor {
    dedup: TieredDeduplicator,
    rules: RuleTable,
    journal: SqliteJournal,
}

impl DocumentAssessor {
    pub fn new(dedup: TieredDeduplicator, rules: RuleTable) -> Self {
        Self {
            dedup,
            rules,
            journal: SqliteJournal::new(),
        }
    }

    pub fn journal(&self) -> &SqliteJournal {
        &self.journal
    }

    /// Cascade counters for this assessor's detector.
    pub fn dedup_stats(&self) -> DedupStatsSnapshot {
        self.dedup.stats()
    }

    /// Assess one submission. Every call journals exactly one entry.
    pub fn submit(
        &self,
        conn: &Connection,
        raw_bytes: &[u8],
        filename: &str,
        source_type: SourceType,
        extracted_text: Option<&str>,
    ) -> Result<AssessmentResult, AdmissionError> {
        let submission = NewSubmission {
            content_hash: content_hash(raw_bytes),
            original_filename: filename.to_string(),
            normalized_filename: normalize_filename(filename),
            source_type,
        };

        // Exact-byte duplicates are free to detect and never re-enter the
        // cascade.
        if let Some(existing) = self.journal.find_by_hash(conn, &submission.content_hash)? {
            return self.record_exact(conn, &submission, existing.journal_id, false);
        }

        let entry = match self.journal.insert_pending(conn, &submission) {
            Ok(entry) => entry,
            // Lost the insert race against a concurrent identical
            // submission: the unique index is the authority, resolve as a
            // duplicate discovered after the fact.
            Err(AdmissionError::Database(DatabaseError::ConstraintViolation(_))) => {
                let existing = self
                    .journal
                    .find_by_hash(conn, &submission.content_hash)?
                    .ok_or_else(|| {
                        AdmissionError::Database(DatabaseError::ConstraintViolation(
                            "hash vanished after losing insert race".into(),
                        ))
                    })?;
                return self.record_exact(conn, &submission, existing.journal_id, true);
            }
            Err(e) => return Err(e),
        };

        self.journal.mark_assessing(conn, entry.journal_id)?;

        let check = self.dedup.check(
            conn,
            filename,
            raw_bytes,
            extracted_text,
            Some(entry.journal_id),
        )?;

        if check.result.is_duplicate {
            let matched = check.result.matched_journal_id.unwrap_or_default();
            self.journal
                .record_tier_duplicate(conn, entry.journal_id, check.result.tier, matched)?;

            tracing::info!(
                journal_id = entry.journal_id,
                matched,
                tier = check.result.tier,
                similarity = check.result.similarity,
                "Submission rejected as duplicate"
            );

            return Ok(AssessmentResult {
                journal_id: entry.journal_id,
                should_process: false,
                reason: format!(
                    "{} similarity {:.2} to journal entry #{matched}",
                    check.result.match_type.as_str(),
                    check.result.similarity
                ),
                is_duplicate: true,
                duplicate_of: Some(matched),
                duplicate_tier: Some(check.result.tier),
                priority: 0,
                document_type: None,
            });
        }

        if let Some(sample) = &check.content_sample {
            self.journal.set_content_sample(conn, entry.journal_id, sample)?;
        }

        let rule = self
            .rules
            .classify(filename, check.content_sample.as_deref())
            .clone();

        // Keep the fingerprint either way: held documents are still real
        // documents future submissions must be compared against.
        self.remember(conn, entry.journal_id, &check);

        if rule.requires_human_review {
            self.journal.record_decision(
                conn,
                entry.journal_id,
                &rule.document_type,
                rule.priority,
                false,
            )?;

            tracing::info!(
                journal_id = entry.journal_id,
                document_type = %rule.document_type,
                "Submission held for human review"
            );

            return Ok(AssessmentResult {
                journal_id: entry.journal_id,
                should_process: false,
                reason: format!("{} requires human review", rule.document_type),
                is_duplicate: false,
                duplicate_of: None,
                duplicate_tier: None,
                priority: 0,
                document_type: Some(rule.document_type),
            });
        }

        self.journal.record_decision(
            conn,
            entry.journal_id,
            &rule.document_type,
            rule.priority,
            true,
        )?;

        tracing::info!(
            journal_id = entry.journal_id,
            document_type = %rule.document_type,
            priority = rule.priority,
            "Submission admitted"
        );

        Ok(AssessmentResult {
            journal_id: entry.journal_id,
            should_process: true,
            reason: format!(
                "admitted as {} (priority {})",
                rule.document_type, rule.priority
            ),
            is_duplicate: false,
            duplicate_of: None,
            duplicate_tier: None,
            priority: rule.priority,
            document_type: Some(rule.document_type),
        })
    }

    fn record_exact(
        &self,
        conn: &Connection,
        submission: &NewSubmission,
        duplicate_of: i64,
        after_race: bool,
    ) -> Result<AssessmentResult, AdmissionError> {
        let matched = DuplicateMatch::exact(duplicate_of);
        let entry = self
            .journal
            .record_exact_duplicate(conn, submission, duplicate_of)?;

        tracing::info!(
            journal_id = entry.journal_id,
            duplicate_of,
            after_race,
            "Exact content hash already journaled"
        );

        let mut reason = format!("exact content hash match of journal entry #{duplicate_of}");
        if after_race {
            reason.push_str(" (discovered on insert)");
        }

        Ok(AssessmentResult {
            journal_id: entry.journal_id,
            should_process: false,
            reason,
            is_duplicate: true,
            duplicate_of: matched.matched_journal_id,
            duplicate_tier: Some(matched.tier),
            priority: 0,
            document_type: None,
        })
    }

    fn remember(&self, conn: &Connection, journal_id: i64, check: &DedupCheck) {
        if let Err(e) = self.dedup.remember(conn, journal_id, check) {
            // Losing one embedding weakens future tier-2 recall but must
            // not fail an otherwise sound admission.
            tracing::warn!(journal_id, error = %e, "Failed to store fingerprint embedding");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::models::QueueStatus;
    use crate::pipeline::dedup::{
        DedupConfig, MockEmbedder, MockOcr, SqliteVectorIndex, TieredDeduplicator,
    };

    fn assessor_with_ocr(text: &str) -> DocumentAssessor {
        let dedup = TieredDeduplicator::new(DedupConfig::default())
            .with_ocr(Box::new(MockOcr::returning(text)))
            .with_semantic(
                Box::new(MockEmbedder::new()),
                Box::new(SqliteVectorIndex::new()),
            );
        DocumentAssessor::new(dedup, RuleTable::builtin())
    }

    #[test]
    fn content_hash_is_deterministic() {
        assert_eq!(content_hash(b"same bytes"), content_hash(b"same bytes"));
        assert_ne!(content_hash(b"bytes a"), content_hash(b"bytes b"));
    }

    #[test]
    fn first_submission_is_admitted() {
        let conn = open_memory_database().unwrap();
        let assessor = assessor_with_ocr("invoice no 12 amount due 83.20");

        let result = assessor
            .submit(&conn, b"scan bytes", "acme invoice.pdf", SourceType::Upload, None)
            .unwrap();

        assert!(result.should_process);
        assert!(!result.is_duplicate);
        assert_eq!(result.document_type.as_deref(), Some("invoice"));
        assert_eq!(result.priority, 7);

        let entry = assessor.journal().get(&conn, result.journal_id).unwrap();
        assert_eq!(entry.queue_status, QueueStatus::Queued);
        assert!(entry.content_sample.is_some());
    }

    #[test]
    fn byte_identical_resubmission_skips_the_cascade() {
        let conn = open_memory_database().unwrap();
        let assessor = assessor_with_ocr("quarterly numbers");

        let first = assessor
            .submit(&conn, b"identical", "report q1.pdf", SourceType::Upload, None)
            .unwrap();
        let stats_after_first = assessor.dedup_stats();

        let second = assessor
            .submit(&conn, b"identical", "report q1 again.pdf", SourceType::ChatBot, None)
            .unwrap();

        assert!(!second.should_process);
        assert!(second.is_duplicate);
        assert_eq!(second.duplicate_tier, Some(-1));
        assert_eq!(second.duplicate_of, Some(first.journal_id));
        // No tier 0–2 logic ran for the resubmission
        assert_eq!(assessor.dedup_stats(), stats_after_first);

        // Both attempts are journaled
        assert_eq!(assessor.journal().counts(&conn).unwrap().total, 2);
    }

    #[test]
    fn near_identical_filename_is_caught_at_tier_zero() {
        let conn = open_memory_database().unwrap();
        let assessor = assessor_with_ocr("unrelated words entirely");

        assessor
            .submit(&conn, b"bytes one", "bank statement march.pdf", SourceType::Upload, None)
            .unwrap();
        let second = assessor
            .submit(&conn, b"bytes two", "Bank Statement March (2).pdf", SourceType::Upload, None)
            .unwrap();

        assert!(!second.should_process);
        assert!(second.is_duplicate);
        assert_eq!(second.duplicate_tier, Some(0));
        assert!(second.reason.contains("filename"));

        let entry = assessor.journal().get(&conn, second.journal_id).unwrap();
        assert_eq!(entry.queue_status, QueueStatus::SkippedDuplicate);
    }

    #[test]
    fn review_required_type_is_held() {
        let conn = open_memory_database().unwrap();
        let assessor = assessor_with_ocr("passport date of birth 1984");

        let result = assessor
            .submit(&conn, b"id bytes", "passport scan.jpg", SourceType::Upload, None)
            .unwrap();

        assert!(!result.should_process);
        assert!(!result.is_duplicate);
        assert!(result.reason.contains("human review"));
        assert_eq!(result.document_type.as_deref(), Some("identity_document"));

        let entry = assessor.journal().get(&conn, result.journal_id).unwrap();
        assert_eq!(entry.queue_status, QueueStatus::Pending);

        let held = assessor
            .journal()
            .pending_review(&conn, &RuleTable::builtin())
            .unwrap();
        assert_eq!(held.len(), 1);
    }

    #[test]
    fn caller_supplied_text_feeds_classification() {
        let conn = open_memory_database().unwrap();
        // OCR output would say "letter"; the caller's text says receipt
        let assessor = assessor_with_ocr("dear sir sincerely yours");

        let result = assessor
            .submit(
                &conn,
                b"bytes",
                "IMG_20240112.jpg",
                SourceType::Api,
                Some("subtotal 12.00 change due 3.00"),
            )
            .unwrap();

        assert_eq!(result.document_type.as_deref(), Some("receipt"));
    }

    #[test]
    fn admitted_fingerprint_is_remembered_for_semantic_tier() {
        let conn = open_memory_database().unwrap();
        let assessor = assessor_with_ocr("some ocr text body");

        let result = assessor
            .submit(&conn, b"bytes", "memo.pdf", SourceType::Upload, None)
            .unwrap();
        assert!(result.should_process);

        let stored = SqliteVectorIndex::new()
            .get(&conn, result.journal_id)
            .unwrap();
        assert!(stored.is_some(), "embedding must be indexed on admission");
    }
}
