//! Collaborator seams for campaigns: the bulk document source and the
//! compute rental provider. Both are remote services owned outside this
//! crate; campaigns treat them as black boxes behind these traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::SessionError;

/// A remote file as listed by the bulk source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub name: String,
    pub size_bytes: u64,
    pub modified: Option<String>,
}

/// Listing filters understood by the bulk source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilter {
    pub name_contains: Option<String>,
    pub min_size_bytes: Option<u64>,
    pub max_size_bytes: Option<u64>,
}

/// Bulk file listing and download.
pub trait DocumentSource: Send + Sync {
    fn list(&self, folder: &str, filter: &ListFilter)
        -> Result<Vec<RemoteDocument>, SessionError>;

    fn download(&self, id: &str) -> Result<Vec<u8>, SessionError>;
}

/// What we demand from a rentable instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferConstraints {
    pub min_gpu_ram_gb: f64,
    pub max_hourly_rate: f64,
    pub min_reliability: f64,
}

impl Default for OfferConstraints {
    fn default() -> Self {
        Self {
            min_gpu_ram_gb: 16.0,
            max_hourly_rate: 1.0,
            min_reliability: 0.95,
        }
    }
}

/// One rentable machine on the provider's market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeOffer {
    pub offer_id: String,
    pub gpu_name: String,
    pub gpu_ram_gb: f64,
    pub hourly_rate: f64,
    pub reliability: f64,
}

/// Work shipped to a rented instance for one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub session_id: String,
    pub batch_id: String,
    pub batch_number: u32,
    /// Remote ids of the documents admitted for processing.
    pub document_refs: Vec<String>,
}

/// State of a submitted remote job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteJobStatus {
    Queued,
    Running,
    Completed,
    Failed { message: String },
}

/// GPU rental market: search, rent, drive, release.
pub trait ComputeProvider: Send + Sync {
    fn search_offers(
        &self,
        constraints: &OfferConstraints,
    ) -> Result<Vec<ComputeOffer>, SessionError>;

    /// Rent an offer; returns the instance id.
    fn rent(&self, offer_id: &str) -> Result<String, SessionError>;

    /// Block until the instance is ready or the timeout passes.
    fn wait_ready(&self, instance_id: &str, timeout: Duration) -> Result<bool, SessionError>;

    /// Ship one batch of work; returns the remote job id.
    fn submit_job(&self, instance_id: &str, payload: &JobPayload)
        -> Result<String, SessionError>;

    fn job_status(&self, instance_id: &str, job_id: &str)
        -> Result<RemoteJobStatus, SessionError>;

    /// Release the instance. Idempotent; returns whether anything was
    /// actually running.
    fn stop(&self, instance_id: &str) -> Result<bool, SessionError>;
}
