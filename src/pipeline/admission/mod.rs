//! Admission control: the journal ledger and the assessment pipeline.
//!
//! Every inbound document passes through `DocumentAssessor::submit`, which
//! journals the attempt, runs the duplicate cascade, applies the
//! document-type policy and hands back a definite decision. The assessor
//! never creates queue items itself; the caller acts on the decision.

pub mod assessor;
pub mod ledger;
pub mod rules;

pub use assessor::*;
pub use ledger::*;
pub use rules::*;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::pipeline::dedup::DedupError;

#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Duplicate check failed: {0}")]
    Dedup(#[from] DedupError),

    #[error("Journal entry not found: {0}")]
    EntryNotFound(i64),

    #[error("Invalid document-type rule: {0}")]
    InvalidRule(String),
}
