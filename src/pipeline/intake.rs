//! Single entry point for interactive submissions.
//!
//! Wires the assessment decision to the work queue: the assessor decides,
//! the intake acts. Admitted documents get exactly one queue item;
//! duplicates and review holds get none.

use rusqlite::Connection;

use crate::models::{QueueItem, SourceType};
use crate::pipeline::admission::{AdmissionError, AssessmentResult, DocumentAssessor};
use crate::pipeline::queue::{QueueError, SqliteWorkQueue};

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Assessment failed: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Enqueue failed: {0}")]
    Queue(#[from] QueueError),
}

/// What one submission produced.
#[derive(Debug)]
pub struct IntakeOutcome {
    pub assessment: AssessmentResult,
    /// Present only when the assessment admitted the document.
    pub queue_item: Option<QueueItem>,
}

/// Gate + queue, as callers use them together.
pub struct DocumentIntake {
    assessor: DocumentAssessor,
    queue: SqliteWorkQueue,
}

impl DocumentIntake {
    pub fn new(assessor: DocumentAssessor) -> Self {
        Self {
            assessor,
            queue: SqliteWorkQueue::new(),
        }
    }

    pub fn assessor(&self) -> &DocumentAssessor {
        &self.assessor
    }

    pub fn queue(&self) -> &SqliteWorkQueue {
        &self.queue
    }

    /// Assess one submission and enqueue it if admitted.
    pub fn submit(
        &self,
        conn: &Connection,
        raw_bytes: &[u8],
        filename: &str,
        source_type: SourceType,
        extracted_text: Option<&str>,
    ) -> Result<IntakeOutcome, IntakeError> {
        let assessment =
            self.assessor
                .submit(conn, raw_bytes, filename, source_type, extracted_text)?;

        let queue_item = if assessment.should_process {
            Some(
                self.queue
                    .enqueue(conn, assessment.journal_id, assessment.priority)?,
            )
        } else {
            None
        };

        Ok(IntakeOutcome {
            assessment,
            queue_item,
        })
    }
}
