//! Campaign state machine: start → process batches → finish, with
//! checkpointed resume.
//!
//! Batch work is sequential; durability comes from persisting the session
//! after every mutation and checkpointing every few batches, not from
//! in-memory concurrency. The cancel flag is honoured between batches and
//! between poll attempts; an in-flight remote job is never forcibly
//! killed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::planner::{estimate, partition};
use super::store::SqliteSessionStore;
use super::traits::{ComputeOffer, ComputeProvider, DocumentSource, JobPayload, RemoteJobStatus};
use super::{CampaignConfig, SessionError};
use crate::models::{
    BatchJob, BatchJobStatus, CampaignSession, Checkpoint, SessionStatus, SourceType,
};
use crate::pipeline::intake::DocumentIntake;

/// Cooperative stop signal shared between the runner and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress events emitted while a campaign runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CampaignEvent {
    Started {
        session_id: String,
        total_batches: u32,
    },
    BatchStarted {
        batch_number: u32,
        total_batches: u32,
    },
    BatchCompleted {
        batch_number: u32,
        processed_count: u32,
    },
    BatchFailed {
        batch_number: u32,
        error: String,
    },
    CheckpointSaved {
        batch_number: u32,
    },
    Finished {
        status: SessionStatus,
        completed_batches: u32,
        failed_batches: u32,
    },
}

/// Drives one campaign at a time against a rented instance.
pub struct CampaignRunner {
    source: Box<dyn DocumentSource>,
    provider: Box<dyn ComputeProvider>,
    intake: DocumentIntake,
    store: SqliteSessionStore,
    config: CampaignConfig,
    /// Instance currently rented by `run`, reachable from `stop`.
    active_instance: Mutex<Option<String>>,
}

impl CampaignRunner {
    pub fn new(
        source: Box<dyn DocumentSource>,
        provider: Box<dyn ComputeProvider>,
        intake: DocumentIntake,
        config: CampaignConfig,
    ) -> Self {
        Self {
            source,
            provider,
            intake,
            store: SqliteSessionStore::new(),
            config,
            active_instance: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &SqliteSessionStore {
        &self.store
    }

    /// List the remote folder and return the ordered backlog of candidate
    /// ids, ready to hand to `start`.
    pub fn discover(
        &self,
        folder: &str,
        filter: &super::traits::ListFilter,
    ) -> Result<Vec<String>, SessionError> {
        let listed = self.source.list(folder, filter)?;
        tracing::info!(folder, count = listed.len(), "Backlog discovered");
        Ok(listed.into_iter().map(|doc| doc.id).collect())
    }

    /// Create and persist a new session over an ordered backlog.
    pub fn start(
        &self,
        conn: &Connection,
        document_ids: Vec<String>,
    ) -> Result<(CampaignSession, Vec<BatchJob>), SessionError> {
        let jobs = partition(&document_ids, self.config.batch_size);
        let est = estimate(
            document_ids.len() as u32,
            self.config.batch_size,
            self.config.offers.max_hourly_rate,
            self.config.seconds_per_document,
        );

        let started = Utc::now();
        let eta = started
            + chrono::Duration::seconds((est.total_hours * 3600.0) as i64);

        let session = CampaignSession {
            session_id: Uuid::new_v4().to_string(),
            total_documents: document_ids.len() as u32,
            batch_size: self.config.batch_size,
            total_batches: jobs.len() as u32,
            completed_batches: 0,
            failed_batches: 0,
            status: SessionStatus::Running,
            started_at: started.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            estimated_completion: Some(eta.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            total_cost: 0.0,
        };

        self.store.insert_session(conn, &session)?;

        tracing::info!(
            session_id = %session.session_id,
            total_documents = session.total_documents,
            total_batches = session.total_batches,
            estimated_cost = est.total_cost,
            "Campaign session created"
        );

        Ok((session, jobs))
    }

    /// Process every batch after `start_after`, one at a time. A batch
    /// failure is recorded and the loop continues; only resource
    /// acquisition failures are fatal.
    pub fn run(
        &self,
        conn: &Connection,
        session: &mut CampaignSession,
        jobs: &mut [BatchJob],
        start_after: u32,
        cancel: &CancelFlag,
        progress: Option<&dyn Fn(CampaignEvent)>,
    ) -> Result<SessionStatus, SessionError> {
        let pending = jobs
            .iter()
            .filter(|j| j.batch_number > start_after)
            .count();

        if pending == 0 {
            return self.finalize(conn, session, false, progress);
        }

        // Acquire the compute resource up front: failure here is fatal to
        // the session and no batch work has been spent yet.
        let offer = match self.acquire_instance(conn, session) {
            Ok(offer) => offer,
            Err(e) => {
                session.status = SessionStatus::Failed;
                self.store.update_session(conn, session)?;
                return Err(e);
            }
        };

        emit(
            progress,
            CampaignEvent::Started {
                session_id: session.session_id.clone(),
                total_batches: session.total_batches,
            },
        );

        // The instance is released no matter how the batch loop ends.
        let outcome =
            self.process_batches(conn, session, jobs, start_after, &offer, cancel, progress);
        self.release_instance();
        let stopped = outcome?;

        self.finalize(conn, session, stopped, progress)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_batches(
        &self,
        conn: &Connection,
        session: &mut CampaignSession,
        jobs: &mut [BatchJob],
        start_after: u32,
        offer: &ComputeOffer,
        cancel: &CancelFlag,
        progress: Option<&dyn Fn(CampaignEvent)>,
    ) -> Result<bool, SessionError> {
        let backlog: Vec<String> = jobs
            .iter()
            .flat_map(|j| j.document_ids.iter().cloned())
            .collect();

        let mut stopped = false;

        for job in jobs.iter_mut().filter(|j| j.batch_number > start_after) {
            if cancel.is_cancelled() {
                stopped = true;
                break;
            }

            emit(
                progress,
                CampaignEvent::BatchStarted {
                    batch_number: job.batch_number,
                    total_batches: session.total_batches,
                },
            );

            let batch_start = Instant::now();

            match self.run_batch(conn, session, job, cancel) {
                Ok(processed) => {
                    job.status = BatchJobStatus::Completed;
                    job.processed_count = processed;
                    session.completed_batches += 1;
                    emit(
                        progress,
                        CampaignEvent::BatchCompleted {
                            batch_number: job.batch_number,
                            processed_count: processed,
                        },
                    );
                }
                Err(SessionError::Stopped) => {
                    // Cancelled mid-poll. The remote job keeps running;
                    // the batch stays unaccounted and re-runs on resume.
                    stopped = true;
                }
                Err(e) => {
                    job.status = BatchJobStatus::Failed;
                    job.error_message = Some(e.to_string());
                    session.failed_batches += 1;
                    tracing::warn!(
                        batch_number = job.batch_number,
                        error = %e,
                        "Batch failed, continuing with the next one"
                    );
                    emit(
                        progress,
                        CampaignEvent::BatchFailed {
                            batch_number: job.batch_number,
                            error: e.to_string(),
                        },
                    );
                }
            }

            session.total_cost +=
                batch_start.elapsed().as_secs_f64() / 3600.0 * offer.hourly_rate;
            self.store.update_session(conn, session)?;

            if stopped {
                break;
            }

            if job.batch_number % self.config.checkpoint_interval == 0 {
                let checkpoint = Checkpoint {
                    session_id: session.session_id.clone(),
                    batch_number: job.batch_number,
                    created_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    session: session.clone(),
                    document_ids: backlog.clone(),
                };
                self.store.save_checkpoint(conn, &checkpoint)?;
                emit(
                    progress,
                    CampaignEvent::CheckpointSaved {
                        batch_number: job.batch_number,
                    },
                );
            }
        }

        Ok(stopped)
    }

    /// Reload a session from a checkpoint and continue after its batch
    /// number. Batches at or below the checkpoint are never re-executed.
    pub fn resume(
        &self,
        conn: &Connection,
        checkpoint: &Checkpoint,
        cancel: &CancelFlag,
        progress: Option<&dyn Fn(CampaignEvent)>,
    ) -> Result<SessionStatus, SessionError> {
        let mut session = checkpoint.session.clone();
        session.status = SessionStatus::Running;
        self.store.update_session(conn, &session)?;

        let mut jobs = partition(&checkpoint.document_ids, session.batch_size);
        for job in jobs.iter_mut().filter(|j| j.batch_number <= checkpoint.batch_number) {
            job.status = BatchJobStatus::Completed;
        }

        tracing::info!(
            session_id = %session.session_id,
            resume_after = checkpoint.batch_number,
            "Resuming campaign from checkpoint"
        );

        self.run(
            conn,
            &mut session,
            &mut jobs,
            checkpoint.batch_number,
            cancel,
            progress,
        )
    }

    /// Stop the campaign: no new batches start and the rented instance is
    /// released. An in-flight remote job is left to finish on its own.
    pub fn stop(
        &self,
        conn: &Connection,
        session_id: &str,
        cancel: &CancelFlag,
    ) -> Result<CampaignSession, SessionError> {
        cancel.cancel();
        self.release_instance();

        let mut session = self.store.get_session(conn, session_id)?;
        // Terminal states stay terminal; only a running session stops.
        if session.status == SessionStatus::Running {
            session.status = SessionStatus::Stopped;
            self.store.update_session(conn, &session)?;
            tracing::info!(session_id, "Campaign stopped");
        }
        Ok(session)
    }

    // -----------------------------------------------------------------
    // internals
    // -----------------------------------------------------------------

    fn acquire_instance(
        &self,
        _conn: &Connection,
        session: &CampaignSession,
    ) -> Result<ComputeOffer, SessionError> {
        let mut offers = self.provider.search_offers(&self.config.offers)?;
        if offers.is_empty() {
            return Err(SessionError::NoMatchingOffers);
        }
        offers.sort_by(|a, b| {
            a.hourly_rate
                .partial_cmp(&b.hourly_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let offer = offers.remove(0);

        let instance_id = self.provider.rent(&offer.offer_id)?;
        let ready = self.provider.wait_ready(
            &instance_id,
            Duration::from_secs(self.config.instance_ready_timeout_secs),
        )?;

        if !ready {
            let _ = self.provider.stop(&instance_id);
            return Err(SessionError::InstanceNotReady(instance_id));
        }

        tracing::info!(
            session_id = %session.session_id,
            instance_id,
            gpu = %offer.gpu_name,
            hourly_rate = offer.hourly_rate,
            "Instance rented"
        );

        *self.active_instance.lock().unwrap() = Some(instance_id);
        Ok(offer)
    }

    fn run_batch(
        &self,
        conn: &Connection,
        session: &CampaignSession,
        job: &mut BatchJob,
        cancel: &CancelFlag,
    ) -> Result<u32, SessionError> {
        job.status = BatchJobStatus::Downloading;

        let mut downloaded = Vec::new();
        for doc_id in &job.document_ids {
            match self.source.download(doc_id) {
                Ok(bytes) => downloaded.push((doc_id.clone(), bytes)),
                // One bad document is a unit failure, not a batch failure.
                Err(e) => {
                    tracing::warn!(doc_id, error = %e, "Download failed, skipping document");
                }
            }
        }

        if downloaded.is_empty() && !job.document_ids.is_empty() {
            return Err(SessionError::Source(format!(
                "all {} downloads failed",
                job.document_ids.len()
            )));
        }

        job.status = BatchJobStatus::Processing;

        let mut processed = 0u32;
        let mut admitted = Vec::new();
        for (doc_id, bytes) in &downloaded {
            // Bulk sources list path-like ids; they double as filenames
            // for classification and the filename tier.
            match self
                .intake
                .submit(conn, bytes, doc_id, SourceType::BulkFolder, None)
            {
                Ok(outcome) => {
                    processed += 1;
                    if outcome.assessment.should_process {
                        admitted.push(doc_id.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!(doc_id, error = %e, "Admission failed, skipping document");
                }
            }
        }

        if admitted.is_empty() {
            // Entire batch was duplicates or holds: nothing to rent time
            // for, and that is a successful outcome.
            return Ok(processed);
        }

        let instance_id = self
            .active_instance
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SessionError::Provider("no active instance".into()))?;

        let payload = JobPayload {
            session_id: session.session_id.clone(),
            batch_id: job.batch_id.clone(),
            batch_number: job.batch_number,
            document_refs: admitted,
        };

        let job_id = self.provider.submit_job(&instance_id, &payload)?;
        self.poll_job(&instance_id, &job_id, cancel)?;

        Ok(processed)
    }

    /// Explicit poll state machine: bounded attempts, fixed interval,
    /// cancellable between attempts.
    fn poll_job(
        &self,
        instance_id: &str,
        job_id: &str,
        cancel: &CancelFlag,
    ) -> Result<(), SessionError> {
        for attempt in 1..=self.config.poll.max_attempts {
            if cancel.is_cancelled() {
                return Err(SessionError::Stopped);
            }

            match self.provider.job_status(instance_id, job_id)? {
                RemoteJobStatus::Completed => return Ok(()),
                RemoteJobStatus::Failed { message } => {
                    return Err(SessionError::Provider(message));
                }
                RemoteJobStatus::Queued | RemoteJobStatus::Running => {
                    tracing::trace!(job_id, attempt, "Remote job still running");
                    std::thread::sleep(Duration::from_millis(self.config.poll.interval_ms));
                }
            }
        }

        Err(SessionError::PollExhausted {
            attempts: self.config.poll.max_attempts,
        })
    }

    fn release_instance(&self) {
        let instance = self.active_instance.lock().unwrap().take();
        if let Some(instance_id) = instance {
            match self.provider.stop(&instance_id) {
                Ok(_) => tracing::info!(instance_id, "Instance released"),
                Err(e) => tracing::warn!(instance_id, error = %e, "Instance release failed"),
            }
        }
    }

    fn finalize(
        &self,
        conn: &Connection,
        session: &mut CampaignSession,
        stopped: bool,
        progress: Option<&dyn Fn(CampaignEvent)>,
    ) -> Result<SessionStatus, SessionError> {
        session.status = if stopped {
            SessionStatus::Stopped
        } else if session.failed_batches > 0 {
            SessionStatus::CompletedWithErrors
        } else {
            SessionStatus::Completed
        };
        self.store.update_session(conn, session)?;

        tracing::info!(
            session_id = %session.session_id,
            status = %session.status,
            completed = session.completed_batches,
            failed = session.failed_batches,
            cost = session.total_cost,
            "Campaign finished"
        );

        emit(
            progress,
            CampaignEvent::Finished {
                status: session.status,
                completed_batches: session.completed_batches,
                failed_batches: session.failed_batches,
            },
        );

        Ok(session.status)
    }
}

fn emit(progress: Option<&dyn Fn(CampaignEvent)>, event: CampaignEvent) {
    if let Some(progress) = progress {
        progress(event);
    }
}
