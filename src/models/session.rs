//! Campaign session, batch job and checkpoint models.
//!
//! A session splits a large backlog into fixed-size batches. The session row
//! is persisted after every mutation; batch jobs live in memory and are
//! re-derived from the checkpoint's document list on resume.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Stopped,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "completed_with_errors" => Some(Self::CompletedWithErrors),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchJobStatus {
    Pending,
    Downloading,
    Processing,
    Completed,
    Failed,
}

impl BatchJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One processing campaign over a document backlog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSession {
    pub session_id: String,
    pub total_documents: u32,
    pub batch_size: u32,
    pub total_batches: u32,
    pub completed_batches: u32,
    pub failed_batches: u32,
    pub status: SessionStatus,
    pub started_at: String,
    pub estimated_completion: Option<String>,
    /// Accumulated rental spend in the provider's currency.
    pub total_cost: f64,
}

impl CampaignSession {
    /// Batches still unaccounted for (neither completed nor failed).
    pub fn remaining_batches(&self) -> u32 {
        self.total_batches
            .saturating_sub(self.completed_batches + self.failed_batches)
    }
}

/// A fixed-size slice of the backlog, processed as one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub batch_id: String,
    /// 1-based; defines the resume position.
    pub batch_number: u32,
    pub document_ids: Vec<String>,
    pub status: BatchJobStatus,
    pub processed_count: u32,
    pub error_message: Option<String>,
}

/// Immutable resume snapshot. `document_ids` is the full ordered backlog so
/// the batch layout can be re-derived deterministically on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    /// Highest batch number accounted for at snapshot time; resume starts
    /// at `batch_number + 1`.
    pub batch_number: u32,
    pub created_at: String,
    pub session: CampaignSession,
    pub document_ids: Vec<String>,
}
