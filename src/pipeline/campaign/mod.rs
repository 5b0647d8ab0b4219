//! Checkpointed batch campaigns over a rented compute instance.
//!
//! A campaign splits a large backlog into fixed-size batches, drives each
//! batch through download → admission → remote processing, and persists a
//! resumable checkpoint every few batches. One batch failing never aborts
//! the campaign; partial success is a normal, reportable outcome.

pub mod planner;
pub mod runner;
pub mod store;
pub mod traits;

pub use planner::*;
pub use runner::*;
pub use store::*;
pub use traits::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DatabaseError;
use crate::pipeline::intake::IntakeError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Intake failed: {0}")]
    Intake(#[from] IntakeError),

    #[error("No compute offers match the configured constraints")]
    NoMatchingOffers,

    #[error("Rented instance {0} did not become ready in time")]
    InstanceNotReady(String),

    #[error("Document source error: {0}")]
    Source(String),

    #[error("Compute provider error: {0}")]
    Provider(String),

    #[error("Remote job still incomplete after {attempts} poll attempts")]
    PollExhausted { attempts: u32 },

    #[error("Campaign stopped")]
    Stopped,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("No checkpoint recorded for session {0}")]
    CheckpointNotFound(String),

    #[error("Snapshot serialization failed: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Remote-job polling: explicit interval and attempt cap instead of an
/// unbounded wait.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            max_attempts: 720,
        }
    }
}

/// Campaign tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub batch_size: u32,
    /// Persist a checkpoint every this many batches.
    pub checkpoint_interval: u32,
    /// How long to wait for a rented instance to come up.
    pub instance_ready_timeout_secs: u64,
    /// Used for the up-front completion estimate.
    pub seconds_per_document: f64,
    pub poll: PollConfig,
    pub offers: OfferConstraints,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            checkpoint_interval: 10,
            instance_ready_timeout_secs: 300,
            seconds_per_document: 4.5,
            poll: PollConfig::default(),
            offers: OfferConstraints::default(),
        }
    }
}
