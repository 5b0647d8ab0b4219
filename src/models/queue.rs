//! Work queue item model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Queued,
    Assigned,
    Completed,
    Failed,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Assigned => "assigned",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "assigned" => Some(Self::Assigned),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Completed and failed items never leave their state; reprocessing
    /// a failed document requires a fresh submission.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of work handed to exactly one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub queue_id: i64,
    pub journal_id: i64,
    pub priority: u8,
    pub status: QueueItemStatus,
    pub assigned_worker_id: Option<String>,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub enqueued_at: String,
    pub claimed_at: Option<String>,
    pub finished_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            QueueItemStatus::Queued,
            QueueItemStatus::Assigned,
            QueueItemStatus::Completed,
            QueueItemStatus::Failed,
        ] {
            assert_eq!(QueueItemStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn terminal_states() {
        assert!(QueueItemStatus::Completed.is_terminal());
        assert!(QueueItemStatus::Failed.is_terminal());
        assert!(!QueueItemStatus::Queued.is_terminal());
        assert!(!QueueItemStatus::Assigned.is_terminal());
    }
}
