//! SQLite-backed work queue.
//!
//! `claim` is the pipeline's sole concurrency-control point: a single
//! conditional UPDATE picks the best queued item and marks it assigned in
//! one statement, so concurrent worker processes can never claim the same
//! item. Failed items are terminal; reprocessing takes a fresh submission.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::QueueError;
use crate::db::DatabaseError;
use crate::models::{QueueItem, QueueItemStatus};

/// Outcome a worker reports for a claimed item.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    Success(serde_json::Value),
    Failure(String),
}

/// Queue depth per status, for dashboards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub queued: u64,
    pub assigned: u64,
    pub completed: u64,
    pub failed: u64,
}

pub struct SqliteWorkQueue;

impl SqliteWorkQueue {
    pub fn new() -> Self {
        Self
    }

    /// Create the queue item for an admitted journal entry.
    pub fn enqueue(
        &self,
        conn: &Connection,
        journal_id: i64,
        priority: u8,
    ) -> Result<QueueItem, QueueError> {
        // Direct check against the journal: duplicates never get an item.
        let is_duplicate: Option<bool> = conn
            .query_row(
                "SELECT is_duplicate FROM journal WHERE journal_id = ?1",
                params![journal_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::from)?;

        match is_duplicate {
            None => return Err(QueueError::ItemNotFound(journal_id)),
            Some(true) => return Err(QueueError::DuplicateEntry(journal_id)),
            Some(false) => {}
        }

        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let inserted = conn.execute(
            "INSERT INTO work_queue (journal_id, priority, status, enqueued_at)
             VALUES (?1, ?2, 'queued', ?3)",
            params![journal_id, priority, now],
        );

        match inserted {
            Ok(_) => self.get(conn, conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(f, _))
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(QueueError::AlreadyQueued(journal_id))
            }
            Err(e) => Err(QueueError::Database(DatabaseError::from(e))),
        }
    }

    /// Atomically claim the best queued item for a worker: highest
    /// priority first, FIFO within a priority. Returns None when the queue
    /// is empty.
    pub fn claim(
        &self,
        conn: &Connection,
        worker_id: &str,
    ) -> Result<Option<QueueItem>, QueueError> {
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let item = conn
            .query_row(
                "UPDATE work_queue
                 SET status = 'assigned', assigned_worker_id = ?1, claimed_at = ?2
                 WHERE queue_id = (
                     SELECT queue_id FROM work_queue
                     WHERE status = 'queued'
                     ORDER BY priority DESC, enqueued_at ASC, queue_id ASC
                     LIMIT 1
                 ) AND status = 'queued'
                 RETURNING queue_id, journal_id, priority, status, assigned_worker_id,
                           result_data, error_message, enqueued_at, claimed_at, finished_at",
                params![worker_id, now],
                map_row,
            )
            .optional()
            .map_err(DatabaseError::from)?;

        if let Some(ref item) = item {
            tracing::debug!(queue_id = item.queue_id, worker_id, "Item claimed");
        }

        item.map(item_from_row).transpose()
    }

    /// Finish an assigned item and mirror the outcome onto its journal
    /// entry. Only `assigned → completed|failed` is a legal transition.
    pub fn complete(
        &self,
        conn: &Connection,
        queue_id: i64,
        outcome: CompletionOutcome,
    ) -> Result<QueueItem, QueueError> {
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let (status, result_data, error_message) = match &outcome {
            CompletionOutcome::Success(data) => {
                ("completed", Some(data.to_string()), Option::<String>::None)
            }
            CompletionOutcome::Failure(message) => ("failed", None, Some(message.clone())),
        };

        let changed = conn
            .execute(
                "UPDATE work_queue
                 SET status = ?1, result_data = ?2, error_message = ?3, finished_at = ?4
                 WHERE queue_id = ?5 AND status = 'assigned'",
                params![status, result_data, error_message, now, queue_id],
            )
            .map_err(DatabaseError::from)?;

        if changed == 0 {
            // Distinguish missing from mis-stated
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT queue_id FROM work_queue WHERE queue_id = ?1",
                    params![queue_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(DatabaseError::from)?;
            return match exists {
                None => Err(QueueError::ItemNotFound(queue_id)),
                Some(_) => Err(QueueError::NotAssigned(queue_id)),
            };
        }

        let item = self.get(conn, queue_id)?;

        // The journal mirrors terminal queue outcomes.
        conn.execute(
            "UPDATE journal SET queue_status = ?1, updated_at = ?2 WHERE journal_id = ?3",
            params![status, now, item.journal_id],
        )
        .map_err(DatabaseError::from)?;

        tracing::info!(queue_id, journal_id = item.journal_id, status, "Item finished");

        Ok(item)
    }

    pub fn get(&self, conn: &Connection, queue_id: i64) -> Result<QueueItem, QueueError> {
        let row = conn
            .query_row(
                "SELECT queue_id, journal_id, priority, status, assigned_worker_id,
                        result_data, error_message, enqueued_at, claimed_at, finished_at
                 FROM work_queue WHERE queue_id = ?1",
                params![queue_id],
                map_row,
            )
            .optional()
            .map_err(DatabaseError::from)?;

        match row {
            Some(raw) => item_from_row(raw),
            None => Err(QueueError::ItemNotFound(queue_id)),
        }
    }

    /// Queue depth per status.
    pub fn depth(&self, conn: &Connection) -> Result<QueueDepth, QueueError> {
        let depth = conn
            .query_row(
                "SELECT SUM(status = 'queued'), SUM(status = 'assigned'),
                        SUM(status = 'completed'), SUM(status = 'failed')
                 FROM work_queue",
                [],
                |row| {
                    Ok(QueueDepth {
                        queued: row.get::<_, Option<i64>>(0)?.unwrap_or(0) as u64,
                        assigned: row.get::<_, Option<i64>>(1)?.unwrap_or(0) as u64,
                        completed: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u64,
                        failed: row.get::<_, Option<i64>>(3)?.unwrap_or(0) as u64,
                    })
                },
            )
            .map_err(DatabaseError::from)?;
        Ok(depth)
    }
}

impl Default for SqliteWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

struct ItemRow {
    queue_id: i64,
    journal_id: i64,
    priority: u8,
    status: String,
    assigned_worker_id: Option<String>,
    result_data: Option<String>,
    error_message: Option<String>,
    enqueued_at: String,
    claimed_at: Option<String>,
    finished_at: Option<String>,
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRow> {
    Ok(ItemRow {
        queue_id: row.get(0)?,
        journal_id: row.get(1)?,
        priority: row.get(2)?,
        status: row.get(3)?,
        assigned_worker_id: row.get(4)?,
        result_data: row.get(5)?,
        error_message: row.get(6)?,
        enqueued_at: row.get(7)?,
        claimed_at: row.get(8)?,
        finished_at: row.get(9)?,
    })
}

fn item_from_row(row: ItemRow) -> Result<QueueItem, QueueError> {
    let status = QueueItemStatus::parse(&row.status).ok_or_else(|| {
        QueueError::Database(DatabaseError::InvalidEnum {
            field: "status".into(),
            value: row.status.clone(),
        })
    })?;

    let result_data = row
        .result_data
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .unwrap_or_else(|_| row.result_data.clone().map(serde_json::Value::String));

    Ok(QueueItem {
        queue_id: row.queue_id,
        journal_id: row.journal_id,
        priority: row.priority,
        status,
        assigned_worker_id: row.assigned_worker_id,
        result_data,
        error_message: row.error_message,
        enqueued_at: row.enqueued_at,
        claimed_at: row.claimed_at,
        finished_at: row.finished_at,
    })
}
