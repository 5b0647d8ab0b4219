//! Session and checkpoint persistence.
//!
//! The session row is rewritten after every mutation so the database is
//! always the resume source of truth. Checkpoints are append-only
//! snapshots; resume reads the latest one and never mutates it.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::SessionError;
use crate::db::DatabaseError;
use crate::models::{CampaignSession, Checkpoint, SessionStatus};

pub struct SqliteSessionStore;

impl SqliteSessionStore {
    pub fn new() -> Self {
        Self
    }

    pub fn insert_session(
        &self,
        conn: &Connection,
        session: &CampaignSession,
    ) -> Result<(), SessionError> {
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        conn.execute(
            "INSERT INTO campaign_sessions
             (session_id, total_documents, batch_size, total_batches, completed_batches,
              failed_batches, status, started_at, estimated_completion, total_cost, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                session.session_id,
                session.total_documents,
                session.batch_size,
                session.total_batches,
                session.completed_batches,
                session.failed_batches,
                session.status.as_str(),
                session.started_at,
                session.estimated_completion,
                session.total_cost,
                now,
            ],
        )
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    /// Persist the current session state. Called after every mutation.
    pub fn update_session(
        &self,
        conn: &Connection,
        session: &CampaignSession,
    ) -> Result<(), SessionError> {
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let changed = conn
            .execute(
                "UPDATE campaign_sessions
                 SET completed_batches = ?1, failed_batches = ?2, status = ?3,
                     estimated_completion = ?4, total_cost = ?5, updated_at = ?6
                 WHERE session_id = ?7",
                params![
                    session.completed_batches,
                    session.failed_batches,
                    session.status.as_str(),
                    session.estimated_completion,
                    session.total_cost,
                    now,
                    session.session_id,
                ],
            )
            .map_err(DatabaseError::from)?;

        if changed == 0 {
            return Err(SessionError::SessionNotFound(session.session_id.clone()));
        }
        Ok(())
    }

    pub fn get_session(
        &self,
        conn: &Connection,
        session_id: &str,
    ) -> Result<CampaignSession, SessionError> {
        let row = conn
            .query_row(
                "SELECT session_id, total_documents, batch_size, total_batches,
                        completed_batches, failed_batches, status, started_at,
                        estimated_completion, total_cost
                 FROM campaign_sessions WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, u32>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, f64>(9)?,
                    ))
                },
            )
            .optional()
            .map_err(DatabaseError::from)?;

        let Some((
            session_id,
            total_documents,
            batch_size,
            total_batches,
            completed_batches,
            failed_batches,
            status,
            started_at,
            estimated_completion,
            total_cost,
        )) = row
        else {
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        };

        let status = SessionStatus::parse(&status).ok_or_else(|| {
            SessionError::Database(DatabaseError::InvalidEnum {
                field: "status".into(),
                value: status.clone(),
            })
        })?;

        Ok(CampaignSession {
            session_id,
            total_documents,
            batch_size,
            total_batches,
            completed_batches,
            failed_batches,
            status,
            started_at,
            estimated_completion,
            total_cost,
        })
    }

    /// Append a checkpoint snapshot.
    pub fn save_checkpoint(
        &self,
        conn: &Connection,
        checkpoint: &Checkpoint,
    ) -> Result<(), SessionError> {
        let snapshot = serde_json::to_string(checkpoint)?;

        conn.execute(
            "INSERT INTO campaign_checkpoints (session_id, batch_number, snapshot, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                checkpoint.session_id,
                checkpoint.batch_number,
                snapshot,
                checkpoint.created_at,
            ],
        )
        .map_err(DatabaseError::from)?;

        tracing::info!(
            session_id = %checkpoint.session_id,
            batch_number = checkpoint.batch_number,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Latest checkpoint for a session, if any.
    pub fn latest_checkpoint(
        &self,
        conn: &Connection,
        session_id: &str,
    ) -> Result<Option<Checkpoint>, SessionError> {
        let snapshot: Option<String> = conn
            .query_row(
                "SELECT snapshot FROM campaign_checkpoints
                 WHERE session_id = ?1
                 ORDER BY batch_number DESC, checkpoint_id DESC
                 LIMIT 1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::from)?;

        match snapshot {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

impl Default for SqliteSessionStore {
    fn default() -> Self {
        Self::new()
    }
}
