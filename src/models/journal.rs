//! Journal entry model — one row per submission attempt, never deleted.
//!
//! The journal is the system of record for "have we seen this before":
//! duplicate attempts are appended as their own rows carrying a
//! back-reference to the entry they duplicate.

use serde::{Deserialize, Serialize};

/// Where a submission came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Upload,
    ChatBot,
    BulkFolder,
    Api,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::ChatBot => "chat_bot",
            Self::BulkFolder => "bulk_folder",
            Self::Api => "api",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(Self::Upload),
            "chat_bot" => Some(Self::ChatBot),
            "bulk_folder" => Some(Self::BulkFolder),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a journal entry through assessment and processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Assessing,
    Queued,
    SkippedDuplicate,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assessing => "assessing",
            Self::Queued => "queued",
            Self::SkippedDuplicate => "skipped_duplicate",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "assessing" => Some(Self::Assessing),
            "queued" => Some(Self::Queued),
            "skipped_duplicate" => Some(Self::SkippedDuplicate),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One submission attempt as recorded in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub journal_id: i64,
    /// SHA-256 of the raw bytes, base64-encoded. Ground truth for exact
    /// duplicates.
    pub content_hash: String,
    pub original_filename: String,
    pub normalized_filename: String,
    pub source_type: SourceType,
    /// Assigned during assessment; None until classified.
    pub document_type: Option<String>,
    pub queue_status: QueueStatus,
    pub is_duplicate: bool,
    pub duplicate_of_journal_id: Option<i64>,
    /// −1 exact hash, 0 filename, 1 OCR content, 2 semantic.
    pub duplicate_detection_tier: Option<i8>,
    pub priority: u8,
    /// Lower-cased text sample used by the content and semantic tiers.
    pub content_sample: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}
