//! Batch layout and cost estimation.
//!
//! Partitioning is deterministic: the same backlog and batch size always
//! produce the same layout, which is what makes checkpoints sufficient for
//! resume.

use serde::Serialize;
use uuid::Uuid;

use crate::models::{BatchJob, BatchJobStatus};

/// Split an ordered backlog into fixed-size batches; the last batch may be
/// short. Batch numbers are 1-based.
pub fn partition(document_ids: &[String], batch_size: u32) -> Vec<BatchJob> {
    let size = batch_size.max(1) as usize;

    document_ids
        .chunks(size)
        .enumerate()
        .map(|(idx, chunk)| BatchJob {
            batch_id: Uuid::new_v4().to_string(),
            batch_number: idx as u32 + 1,
            document_ids: chunk.to_vec(),
            status: BatchJobStatus::Pending,
            processed_count: 0,
            error_message: None,
        })
        .collect()
}

/// Up-front campaign estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CampaignEstimate {
    pub total_batches: u32,
    pub total_hours: f64,
    pub total_cost: f64,
}

/// Estimate batches, wall-clock hours and rental cost for a backlog.
pub fn estimate(
    total_documents: u32,
    batch_size: u32,
    cost_per_hour: f64,
    seconds_per_document: f64,
) -> CampaignEstimate {
    let size = batch_size.max(1);
    let total_batches = total_documents.div_ceil(size);
    let total_hours = f64::from(total_documents) * seconds_per_document / 3600.0;
    let total_cost = total_hours * cost_per_hour;

    CampaignEstimate {
        total_batches,
        total_hours,
        total_cost,
    }
}
