//! Sluice — duplicate-aware ingestion admission for scanned-document
//! processing campaigns.
//!
//! Every document that costs money to analyze passes one gate: a content
//! hash against the journal, then an escalating similarity cascade
//! (filename → OCR text → embeddings). What survives is classified,
//! journaled and queued by priority for worker processes. Very large
//! backlogs run as checkpointed batch campaigns against a rented compute
//! instance, resumable after interruption without re-spending on finished
//! work.
//!
//! The journal is append-only and is the system of record for "have we
//! seen this before". The AI analysis itself, dashboards and bot front
//! ends live outside this crate; OCR, embeddings, bulk sources and the
//! compute rental market are consumed through traits.

pub mod db;
pub mod models;
pub mod pipeline;

pub use db::{open_database, open_memory_database, DatabaseError};
pub use models::{
    BatchJob, BatchJobStatus, CampaignSession, Checkpoint, JournalEntry, QueueItem,
    QueueItemStatus, QueueStatus, SessionStatus, SourceType,
};
pub use pipeline::admission::{
    content_hash, AdmissionError, AssessmentResult, DocumentAssessor, DocumentTypeRule,
    RuleTable, SqliteJournal,
};
pub use pipeline::campaign::{
    CampaignConfig, CampaignEstimate, CampaignEvent, CampaignRunner, CancelFlag,
    ComputeProvider, DocumentSource, PollConfig, SessionError, SqliteSessionStore,
};
pub use pipeline::dedup::{
    DedupConfig, DedupError, DuplicateMatch, EmbeddingModel, MatchKind, OcrEngine,
    SqliteVectorIndex, TieredDeduplicator, VectorIndex,
};
pub use pipeline::intake::{DocumentIntake, IntakeError, IntakeOutcome};
pub use pipeline::queue::{CompletionOutcome, QueueError, SqliteWorkQueue};
