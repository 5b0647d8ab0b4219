//! The journal ledger — append-only CRUD over the `journal` table.
//!
//! Rows are inserted once and mutated only by the assessment pipeline;
//! nothing here deletes. Exact-duplicate resubmissions get their own rows
//! so the ledger records every attempt, not just every document.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::rules::RuleTable;
use super::AdmissionError;
use crate::db::DatabaseError;
use crate::models::{JournalEntry, QueueStatus, SourceType};

/// A submission about to be journaled.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub content_hash: String,
    pub original_filename: String,
    pub normalized_filename: String,
    pub source_type: SourceType,
}

/// SQLite-backed journal store.
pub struct SqliteJournal;

impl SqliteJournal {
    pub fn new() -> Self {
        Self
    }

    /// Canonical (non-duplicate) entry for a content hash, if any.
    pub fn find_by_hash(
        &self,
        conn: &Connection,
        content_hash: &str,
    ) -> Result<Option<JournalEntry>, AdmissionError> {
        let row = conn
            .query_row(
                &format!("{SELECT_ENTRY} WHERE content_hash = ?1 AND is_duplicate = 0"),
                params![content_hash],
                map_row,
            )
            .optional()
            .map_err(DatabaseError::from)?;

        row.map(entry_from_row).transpose()
    }

    /// Journal a fresh submission in `pending` status.
    ///
    /// The partial unique index on `content_hash` is the storage-layer
    /// guarantee; a lost insert race surfaces as
    /// `DatabaseError::ConstraintViolation` for the caller to resolve as a
    /// duplicate discovered after the fact.
    pub fn insert_pending(
        &self,
        conn: &Connection,
        submission: &NewSubmission,
    ) -> Result<JournalEntry, AdmissionError> {
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        conn.execute(
            "INSERT INTO journal (content_hash, original_filename, normalized_filename,
                                  source_type, queue_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)",
            params![
                submission.content_hash,
                submission.original_filename,
                submission.normalized_filename,
                submission.source_type.as_str(),
                now,
            ],
        )
        .map_err(DatabaseError::from)?;

        self.get(conn, conn.last_insert_rowid())
    }

    /// Journal an exact-hash resubmission as its own audit row.
    pub fn record_exact_duplicate(
        &self,
        conn: &Connection,
        submission: &NewSubmission,
        duplicate_of: i64,
    ) -> Result<JournalEntry, AdmissionError> {
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        conn.execute(
            "INSERT INTO journal (content_hash, original_filename, normalized_filename,
                                  source_type, queue_status, is_duplicate,
                                  duplicate_of_journal_id, duplicate_detection_tier,
                                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'skipped_duplicate', 1, ?5, -1, ?6, ?6)",
            params![
                submission.content_hash,
                submission.original_filename,
                submission.normalized_filename,
                submission.source_type.as_str(),
                duplicate_of,
                now,
            ],
        )
        .map_err(DatabaseError::from)?;

        self.get(conn, conn.last_insert_rowid())
    }

    pub fn mark_assessing(&self, conn: &Connection, journal_id: i64) -> Result<(), AdmissionError> {
        self.update_status(conn, journal_id, QueueStatus::Assessing)
    }

    fn update_status(
        &self,
        conn: &Connection,
        journal_id: i64,
        status: QueueStatus,
    ) -> Result<(), AdmissionError> {
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let changed = conn
            .execute(
                "UPDATE journal SET queue_status = ?1, updated_at = ?2 WHERE journal_id = ?3",
                params![status.as_str(), now, journal_id],
            )
            .map_err(DatabaseError::from)?;

        if changed == 0 {
            return Err(AdmissionError::EntryNotFound(journal_id));
        }
        Ok(())
    }

    /// Record a cascade hit: the entry becomes a duplicate pointing at the
    /// matched entry and leaves the processing path.
    pub fn record_tier_duplicate(
        &self,
        conn: &Connection,
        journal_id: i64,
        tier: i8,
        duplicate_of: i64,
    ) -> Result<(), AdmissionError> {
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let changed = conn
            .execute(
                "UPDATE journal
                 SET is_duplicate = 1, duplicate_detection_tier = ?1,
                     duplicate_of_journal_id = ?2, queue_status = 'skipped_duplicate',
                     updated_at = ?3
                 WHERE journal_id = ?4",
                params![tier, duplicate_of, now, journal_id],
            )
            .map_err(DatabaseError::from)?;

        if changed == 0 {
            return Err(AdmissionError::EntryNotFound(journal_id));
        }
        Ok(())
    }

    /// Record the assessment decision for a non-duplicate entry. `queued`
    /// entries move to the queue path; review holds stay `pending` until a
    /// human acts.
    pub fn record_decision(
        &self,
        conn: &Connection,
        journal_id: i64,
        document_type: &str,
        priority: u8,
        queued: bool,
    ) -> Result<(), AdmissionError> {
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let status = if queued {
            QueueStatus::Queued
        } else {
            QueueStatus::Pending
        };

        let changed = conn
            .execute(
                "UPDATE journal
                 SET document_type = ?1, priority = ?2, queue_status = ?3, updated_at = ?4
                 WHERE journal_id = ?5",
                params![document_type, priority, status.as_str(), now, journal_id],
            )
            .map_err(DatabaseError::from)?;

        if changed == 0 {
            return Err(AdmissionError::EntryNotFound(journal_id));
        }
        Ok(())
    }

    /// Store the text sample future content/semantic tiers compare against.
    pub fn set_content_sample(
        &self,
        conn: &Connection,
        journal_id: i64,
        sample: &str,
    ) -> Result<(), AdmissionError> {
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        conn.execute(
            "UPDATE journal SET content_sample = ?1, updated_at = ?2 WHERE journal_id = ?3",
            params![sample, now, journal_id],
        )
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    pub fn get(&self, conn: &Connection, journal_id: i64) -> Result<JournalEntry, AdmissionError> {
        let row = conn
            .query_row(
                &format!("{SELECT_ENTRY} WHERE journal_id = ?1"),
                params![journal_id],
                map_row,
            )
            .optional()
            .map_err(DatabaseError::from)?;

        match row {
            Some(raw) => entry_from_row(raw),
            None => Err(AdmissionError::EntryNotFound(journal_id)),
        }
    }

    /// Latest entries, newest first. For dashboards and operator tooling.
    pub fn recent(
        &self,
        conn: &Connection,
        limit: u32,
    ) -> Result<Vec<JournalEntry>, AdmissionError> {
        let mut stmt = conn
            .prepare(&format!(
                "{SELECT_ENTRY} ORDER BY journal_id DESC LIMIT ?1"
            ))
            .map_err(DatabaseError::from)?;

        let rows = stmt
            .query_map(params![limit], map_row)
            .map_err(DatabaseError::from)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(entry_from_row(row.map_err(DatabaseError::from)?)?);
        }
        Ok(entries)
    }

    /// Entries held for human review: still `pending`, classified, and
    /// their rule demands review.
    pub fn pending_review(
        &self,
        conn: &Connection,
        rules: &RuleTable,
    ) -> Result<Vec<JournalEntry>, AdmissionError> {
        let mut stmt = conn
            .prepare(&format!(
                "{SELECT_ENTRY} WHERE queue_status = 'pending' AND document_type IS NOT NULL
                 ORDER BY priority DESC, journal_id ASC"
            ))
            .map_err(DatabaseError::from)?;

        let rows = stmt.query_map([], map_row).map_err(DatabaseError::from)?;

        let mut entries = Vec::new();
        for row in rows {
            let entry = entry_from_row(row.map_err(DatabaseError::from)?)?;
            let held = entry
                .document_type
                .as_deref()
                .and_then(|t| rules.rule_for(t))
                .map(|r| r.requires_human_review)
                .unwrap_or(false);
            if held {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Submission and duplicate counts broken down by source type.
    pub fn counts_by_source(
        &self,
        conn: &Connection,
    ) -> Result<Vec<SourceCounts>, AdmissionError> {
        let mut stmt = conn
            .prepare(
                "SELECT source_type, COUNT(*), SUM(is_duplicate)
                 FROM journal GROUP BY source_type ORDER BY source_type",
            )
            .map_err(DatabaseError::from)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            })
            .map_err(DatabaseError::from)?;

        let mut counts = Vec::new();
        for row in rows {
            let (source, total, duplicates) = row.map_err(DatabaseError::from)?;
            let source_type = SourceType::parse(&source).ok_or_else(|| {
                AdmissionError::Database(DatabaseError::InvalidEnum {
                    field: "source_type".into(),
                    value: source,
                })
            })?;
            counts.push(SourceCounts {
                source_type,
                total: total as u64,
                duplicates: duplicates.unwrap_or(0) as u64,
            });
        }
        Ok(counts)
    }

    /// Aggregate counters for observability.
    pub fn counts(&self, conn: &Connection) -> Result<JournalCounts, AdmissionError> {
        let counts = conn
            .query_row(
                "SELECT COUNT(*),
                        SUM(is_duplicate),
                        SUM(queue_status = 'queued'),
                        SUM(queue_status = 'completed'),
                        SUM(queue_status = 'failed')
                 FROM journal",
                [],
                |row| {
                    Ok(JournalCounts {
                        total: row.get::<_, i64>(0)? as u64,
                        duplicates: row.get::<_, Option<i64>>(1)?.unwrap_or(0) as u64,
                        queued: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u64,
                        completed: row.get::<_, Option<i64>>(3)?.unwrap_or(0) as u64,
                        failed: row.get::<_, Option<i64>>(4)?.unwrap_or(0) as u64,
                    })
                },
            )
            .map_err(DatabaseError::from)?;
        Ok(counts)
    }
}

impl Default for SqliteJournal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct JournalCounts {
    pub total: u64,
    pub duplicates: u64,
    pub queued: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Per-source slice of the journal, for dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SourceCounts {
    pub source_type: SourceType,
    pub total: u64,
    pub duplicates: u64,
}

const SELECT_ENTRY: &str = "SELECT journal_id, content_hash, original_filename,
    normalized_filename, source_type, document_type, queue_status, is_duplicate,
    duplicate_of_journal_id, duplicate_detection_tier, priority, content_sample,
    created_at, updated_at FROM journal";

struct EntryRow {
    journal_id: i64,
    content_hash: String,
    original_filename: String,
    normalized_filename: String,
    source_type: String,
    document_type: Option<String>,
    queue_status: String,
    is_duplicate: bool,
    duplicate_of_journal_id: Option<i64>,
    duplicate_detection_tier: Option<i8>,
    priority: u8,
    content_sample: Option<String>,
    created_at: String,
    updated_at: String,
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok(EntryRow {
        journal_id: row.get(0)?,
        content_hash: row.get(1)?,
        original_filename: row.get(2)?,
        normalized_filename: row.get(3)?,
        source_type: row.get(4)?,
        document_type: row.get(5)?,
        queue_status: row.get(6)?,
        is_duplicate: row.get(7)?,
        duplicate_of_journal_id: row.get(8)?,
        duplicate_detection_tier: row.get(9)?,
        priority: row.get(10)?,
        content_sample: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn entry_from_row(row: EntryRow) -> Result<JournalEntry, AdmissionError> {
    let source_type = SourceType::parse(&row.source_type).ok_or_else(|| {
        AdmissionError::Database(DatabaseError::InvalidEnum {
            field: "source_type".into(),
            value: row.source_type.clone(),
        })
    })?;
    let queue_status = QueueStatus::parse(&row.queue_status).ok_or_else(|| {
        AdmissionError::Database(DatabaseError::InvalidEnum {
            field: "queue_status".into(),
            value: row.queue_status.clone(),
        })
    })?;

    Ok(JournalEntry {
        journal_id: row.journal_id,
        content_hash: row.content_hash,
        original_filename: row.original_filename,
        normalized_filename: row.normalized_filename,
        source_type,
        document_type: row.document_type,
        queue_status,
        is_duplicate: row.is_duplicate,
        duplicate_of_journal_id: row.duplicate_of_journal_id,
        duplicate_detection_tier: row.duplicate_detection_tier,
        priority: row.priority,
        content_sample: row.content_sample,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    fn submission(hash: &str, name: &str) -> NewSubmission {
        NewSubmission {
            content_hash: hash.into(),
            original_filename: name.into(),
            normalized_filename: crate::pipeline::dedup::normalize_filename(name),
            source_type: SourceType::Upload,
        }
    }

    #[test]
    fn insert_and_find_by_hash() {
        let conn = open_memory_database().unwrap();
        let journal = SqliteJournal::new();

        let entry = journal
            .insert_pending(&conn, &submission("h1", "invoice.pdf"))
            .unwrap();
        assert_eq!(entry.queue_status, QueueStatus::Pending);
        assert!(!entry.is_duplicate);

        let found = journal.find_by_hash(&conn, "h1").unwrap().unwrap();
        assert_eq!(found.journal_id, entry.journal_id);

        assert!(journal.find_by_hash(&conn, "h2").unwrap().is_none());
    }

    #[test]
    fn duplicate_hash_insert_is_a_constraint_violation() {
        let conn = open_memory_database().unwrap();
        let journal = SqliteJournal::new();

        journal
            .insert_pending(&conn, &submission("h1", "a.pdf"))
            .unwrap();
        let second = journal.insert_pending(&conn, &submission("h1", "b.pdf"));

        assert!(matches!(
            second,
            Err(AdmissionError::Database(DatabaseError::ConstraintViolation(_)))
        ));
    }

    #[test]
    fn exact_duplicate_rows_share_the_hash() {
        let conn = open_memory_database().unwrap();
        let journal = SqliteJournal::new();

        let original = journal
            .insert_pending(&conn, &submission("h1", "a.pdf"))
            .unwrap();
        let dup = journal
            .record_exact_duplicate(&conn, &submission("h1", "a copy.pdf"), original.journal_id)
            .unwrap();

        assert!(dup.is_duplicate);
        assert_eq!(dup.duplicate_detection_tier, Some(-1));
        assert_eq!(dup.duplicate_of_journal_id, Some(original.journal_id));
        assert_eq!(dup.queue_status, QueueStatus::SkippedDuplicate);

        // find_by_hash still resolves to the canonical entry
        let found = journal.find_by_hash(&conn, "h1").unwrap().unwrap();
        assert_eq!(found.journal_id, original.journal_id);
    }

    #[test]
    fn tier_duplicate_updates_entry() {
        let conn = open_memory_database().unwrap();
        let journal = SqliteJournal::new();

        let original = journal
            .insert_pending(&conn, &submission("h1", "lease.pdf"))
            .unwrap();
        let near = journal
            .insert_pending(&conn, &submission("h2", "lease (2).pdf"))
            .unwrap();

        journal
            .record_tier_duplicate(&conn, near.journal_id, 0, original.journal_id)
            .unwrap();

        let entry = journal.get(&conn, near.journal_id).unwrap();
        assert!(entry.is_duplicate);
        assert_eq!(entry.duplicate_detection_tier, Some(0));
        assert_eq!(entry.duplicate_of_journal_id, Some(original.journal_id));
        assert_eq!(entry.queue_status, QueueStatus::SkippedDuplicate);
    }

    #[test]
    fn decision_moves_entry_to_queued() {
        let conn = open_memory_database().unwrap();
        let journal = SqliteJournal::new();

        let entry = journal
            .insert_pending(&conn, &submission("h1", "invoice.pdf"))
            .unwrap();
        journal.mark_assessing(&conn, entry.journal_id).unwrap();
        journal
            .record_decision(&conn, entry.journal_id, "invoice", 7, true)
            .unwrap();

        let entry = journal.get(&conn, entry.journal_id).unwrap();
        assert_eq!(entry.queue_status, QueueStatus::Queued);
        assert_eq!(entry.document_type.as_deref(), Some("invoice"));
        assert_eq!(entry.priority, 7);
    }

    #[test]
    fn review_hold_stays_pending_and_is_listed() {
        let conn = open_memory_database().unwrap();
        let journal = SqliteJournal::new();
        let rules = RuleTable::builtin();

        let entry = journal
            .insert_pending(&conn, &submission("h1", "passport.jpg"))
            .unwrap();
        journal
            .record_decision(&conn, entry.journal_id, "identity_document", 9, false)
            .unwrap();

        let held = journal.pending_review(&conn, &rules).unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].journal_id, entry.journal_id);
        assert_eq!(held[0].queue_status, QueueStatus::Pending);
    }

    #[test]
    fn missing_entry_is_not_found() {
        let conn = open_memory_database().unwrap();
        let journal = SqliteJournal::new();
        assert!(matches!(
            journal.get(&conn, 404),
            Err(AdmissionError::EntryNotFound(404))
        ));
        assert!(matches!(
            journal.record_tier_duplicate(&conn, 404, 0, 1),
            Err(AdmissionError::EntryNotFound(404))
        ));
    }

    #[test]
    fn counts_aggregate_by_status() {
        let conn = open_memory_database().unwrap();
        let journal = SqliteJournal::new();

        let a = journal.insert_pending(&conn, &submission("h1", "a.pdf")).unwrap();
        journal.record_decision(&conn, a.journal_id, "invoice", 7, true).unwrap();

        let b = journal.insert_pending(&conn, &submission("h2", "b.pdf")).unwrap();
        journal
            .record_tier_duplicate(&conn, b.journal_id, 1, a.journal_id)
            .unwrap();

        journal
            .record_exact_duplicate(&conn, &submission("h1", "a again.pdf"), a.journal_id)
            .unwrap();

        let counts = journal.counts(&conn).unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.duplicates, 2);
        assert_eq!(counts.queued, 1);
    }

    #[test]
    fn counts_split_by_source_type() {
        let conn = open_memory_database().unwrap();
        let journal = SqliteJournal::new();

        let a = journal.insert_pending(&conn, &submission("h1", "a.pdf")).unwrap();
        journal
            .record_exact_duplicate(&conn, &submission("h1", "a again.pdf"), a.journal_id)
            .unwrap();
        journal
            .insert_pending(
                &conn,
                &NewSubmission {
                    content_hash: "h2".into(),
                    original_filename: "b.pdf".into(),
                    normalized_filename: "b".into(),
                    source_type: SourceType::BulkFolder,
                },
            )
            .unwrap();

        let by_source = journal.counts_by_source(&conn).unwrap();
        assert_eq!(by_source.len(), 2);

        let upload = by_source
            .iter()
            .find(|c| c.source_type == SourceType::Upload)
            .unwrap();
        assert_eq!(upload.total, 2);
        assert_eq!(upload.duplicates, 1);

        let bulk = by_source
            .iter()
            .find(|c| c.source_type == SourceType::BulkFolder)
            .unwrap();
        assert_eq!(bulk.total, 1);
        assert_eq!(bulk.duplicates, 0);
    }

    #[test]
    fn recent_returns_newest_first() {
        let conn = open_memory_database().unwrap();
        let journal = SqliteJournal::new();

        for i in 0..5 {
            journal
                .insert_pending(&conn, &submission(&format!("h{i}"), &format!("doc{i}.pdf")))
                .unwrap();
        }

        let recent = journal.recent(&conn, 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].journal_id > recent[1].journal_id);
    }
}
