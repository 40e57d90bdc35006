//! Job dispatcher: a bounded pool of worker threads enriching Posts.
//!
//! Jobs wait on an unbounded queue; only `worker_count` of them run at a
//! time. Every live job is tracked on the [`JobBoard`]; attempts run under
//! a lease, so a job whose worker never reports is reclaimed by the
//! scheduler once the lease expires.

pub mod board;
pub mod job;
pub mod retry;
mod scheduler;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Sender};
use log::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::enrichment::EnrichmentPipeline;
use crate::error::{StageError, StoreError, WorkerError};
use crate::model::{PartialPostUpdate, PostId, UploadErrorEntry, UploadId, UploadStatus};
use crate::progress::{EnrichmentEvent, EnrichmentPhase, ProgressReporter};
use crate::store::{PostStore, UploadStore};
use crate::writer::{Commit, ResultWriter};

pub use board::{CancelOutcome, Enqueued, JobBoard, SettleOutcome, UploadSettled};
pub use job::{EnrichmentJob, JobStatus, Lease, Settlement};
pub use retry::{RetryAction, RetryPolicy};

/// What `cancel_upload` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelSummary {
    pub skipped: usize,
    pub in_flight: usize,
}

/// State shared by the dispatcher handle, its workers and its scheduler.
struct Shared {
    board: Mutex<JobBoard>,
    changed: Condvar,
    queue: Sender<EnrichmentJob>,
    posts: Arc<dyn PostStore>,
    uploads: Arc<dyn UploadStore>,
    writer: Arc<ResultWriter>,
    pipeline: Arc<EnrichmentPipeline>,
    policy: RetryPolicy,
    config: DispatcherConfig,
    progress: Arc<dyn ProgressReporter>,
    shutdown: AtomicBool,
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    control: Sender<()>,
    workers: Vec<JoinHandle<()>>,
    scheduler: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Starts `config.worker_count` workers and the scheduler.
    pub fn start(
        config: DispatcherConfig,
        posts: Arc<dyn PostStore>,
        uploads: Arc<dyn UploadStore>,
        writer: Arc<ResultWriter>,
        pipeline: Arc<EnrichmentPipeline>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<Self, WorkerError> {
        let worker_count = config.worker_count.max(1);
        let (job_sender, job_receiver) = unbounded::<EnrichmentJob>();
        let (control, control_receiver) = bounded::<()>(1);

        let shared = Arc::new(Shared {
            board: Mutex::new(JobBoard::new()),
            changed: Condvar::new(),
            queue: job_sender,
            posts,
            uploads,
            writer,
            pipeline,
            policy: RetryPolicy::from_config(&config),
            config,
            progress,
            shutdown: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let worker_shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("enrich-worker-{}", worker_id))
                .spawn(move || worker::run_worker(worker_id, job_rx, worker_shared))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        let scheduler_shared = Arc::clone(&shared);
        let scheduler = thread::Builder::new()
            .name("enrich-scheduler".to_string())
            .spawn(move || scheduler::run_scheduler(control_receiver, scheduler_shared))
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        info!("Started {} enrichment workers", worker_count);

        Ok(Self {
            shared,
            control,
            workers,
            scheduler: Some(scheduler),
        })
    }

    /// Submits one job per Post. Returns how many Posts now count toward
    /// the Upload. An Upload left with nothing to run is finalized at once.
    pub fn dispatch(&self, upload_id: &UploadId, post_ids: &[PostId]) -> Result<usize, WorkerError> {
        if self.is_shutdown() {
            return Err(WorkerError::ChannelClosed);
        }

        let mut queued = Vec::new();
        let mut adopted = 0;
        let mut released = Vec::new();
        let nothing_to_run = {
            let mut board = self.shared.board()?;
            for post_id in post_ids {
                let job = EnrichmentJob::new(upload_id.clone(), post_id.clone());
                match board.enqueue(job.clone()) {
                    Enqueued::Queued => queued.push(job),
                    Enqueued::Adopted(settled) => {
                        adopted += 1;
                        released.extend(settled);
                    }
                    Enqueued::Rejected => {}
                }
            }
            queued.is_empty() && adopted == 0 && board.begin_finalizing(upload_id)
        };

        for job in &queued {
            self.shared.report(
                EnrichmentEvent::for_post(&job.upload_id, &job.post_id, EnrichmentPhase::Queued),
            );
            self.shared
                .queue
                .send(job.clone())
                .map_err(|_| WorkerError::ChannelClosed)?;
        }
        for settled in released {
            self.shared.finalize_upload(&settled.upload_id, settled.cancelled);
        }
        if nothing_to_run {
            debug!("Upload {} has nothing to enrich", upload_id);
            self.shared.finalize_upload(upload_id, false);
        }

        let total = queued.len() + adopted;
        info!("Dispatched {} enrichment jobs for upload {}", total, upload_id);
        Ok(total)
    }

    /// Skips the Upload's queued jobs and lets in-flight ones finish. The
    /// Upload becomes `cancelled` once nothing is in flight.
    pub fn cancel_upload(&self, upload_id: &UploadId) -> Result<CancelSummary, WorkerError> {
        let (outcome, finalize_now) = {
            let mut board = self.shared.board()?;
            match board.cancel_upload(upload_id) {
                Some(outcome) => {
                    let settled = outcome.settled.is_some();
                    (Some(outcome), settled)
                }
                None => (None, board.begin_finalizing(upload_id)),
            }
        };

        let summary = match &outcome {
            Some(outcome) => {
                for post_id in &outcome.skipped {
                    self.shared.report(EnrichmentEvent::for_post(
                        upload_id,
                        post_id,
                        EnrichmentPhase::Skipped,
                    ));
                }
                CancelSummary {
                    skipped: outcome.skipped.len(),
                    in_flight: outcome.in_flight,
                }
            }
            None => CancelSummary::default(),
        };
        info!(
            "Cancelled upload {}: {} jobs skipped, {} in flight",
            upload_id, summary.skipped, summary.in_flight
        );

        if finalize_now {
            self.shared.finalize_upload(upload_id, true);
        }
        Ok(summary)
    }

    /// Jobs of the Upload not yet settled.
    pub fn outstanding(&self, upload_id: &UploadId) -> Result<usize, WorkerError> {
        Ok(self.shared.board()?.outstanding(upload_id))
    }

    /// Blocks until the Upload has no live jobs and its final status is
    /// written. Returns false on timeout.
    pub fn wait_for_upload(&self, upload_id: &UploadId, timeout: Duration) -> Result<bool, WorkerError> {
        let deadline = Instant::now() + timeout;
        let mut board = self.shared.board()?;
        while board.is_active(upload_id) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            let (guard, _) = self
                .shared
                .changed
                .wait_timeout(board, remaining)
                .map_err(|_| WorkerError::LockPoisoned)?;
            board = guard;
        }
        Ok(true)
    }

    pub fn shutdown(&self) {
        info!("Shutting down enrichment workers...");
        self.shared.shutdown.store(true, Ordering::Relaxed);
        let _ = self.control.try_send(());
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Relaxed)
    }

    /// Stops the workers after their current job and joins every thread.
    /// Jobs still queued stay behind as `raw` Posts for recovery.
    pub fn wait(mut self) {
        self.shutdown();

        for (i, worker) in self.workers.drain(..).enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        if let Some(scheduler) = self.scheduler.take() {
            if scheduler.join().is_err() {
                error!("Scheduler panicked");
            }
        }

        info!("All enrichment workers have stopped");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if !self.is_shutdown() {
            self.shutdown();
        }
    }
}

impl Shared {
    fn board(&self) -> Result<MutexGuard<'_, JobBoard>, WorkerError> {
        self.board.lock().map_err(|_| WorkerError::LockPoisoned)
    }

    fn report(&self, event: EnrichmentEvent) {
        self.progress.report(event);
    }

    /// Records an attempt's end on the board and finalizes the Upload if
    /// that was its last job. Stale reports are dropped.
    fn settle(
        &self,
        job: &EnrichmentJob,
        lease: Lease,
        settlement: Settlement,
        error: Option<StageError>,
    ) {
        let outcome = match self.board() {
            Ok(mut board) => board.settle(&job.post_id, lease.token, settlement, error),
            Err(e) => {
                error!("Cannot settle job for post {}: {}", job.post_id, e);
                return;
            }
        };
        match outcome {
            SettleOutcome::Stale => {
                debug!("Dropped stale report for post {}", job.post_id);
            }
            SettleOutcome::Recorded => {}
            SettleOutcome::UploadSettled(settled) => {
                self.finalize_upload(&settled.upload_id, settled.cancelled);
            }
        }
        self.changed.notify_all();
    }

    /// Retries the job after its backoff, or fails it for good.
    fn retry_or_fail(
        &self,
        job: &EnrichmentJob,
        lease: Lease,
        update: &PartialPostUpdate,
        err: StageError,
    ) {
        match self.policy.next_action(lease.attempt, &err) {
            RetryAction::Retry(delay) => {
                if !update.is_empty() {
                    if let Err(e) = self.writer.commit(&job.post_id, update, Commit::Progress) {
                        warn!("Could not keep partial results for post {}: {}", job.post_id, e);
                    }
                }
                warn!(
                    "Attempt {} for post {} failed ({}), retrying in {:?}",
                    lease.attempt, job.post_id, err, delay
                );
                self.report(
                    EnrichmentEvent::for_post(&job.upload_id, &job.post_id, EnrichmentPhase::Retrying)
                        .with_stage(err.stage())
                        .with_attempt(lease.attempt)
                        .with_message(err.to_string()),
                );
                let ready_at = Instant::now() + delay;
                self.settle(job, lease, Settlement::Retry { ready_at }, Some(err));
            }
            RetryAction::Fail => self.fail_job(job, lease, update, err),
        }
    }

    /// Commits what finished, moves the Post to `enrichment_failed` and
    /// records the failure on the Upload.
    fn fail_job(&self, job: &EnrichmentJob, lease: Lease, update: &PartialPostUpdate, err: StageError) {
        error!(
            "Enrichment of post {} failed after {} attempts: {}",
            job.post_id, lease.attempt, err
        );
        let commit = Commit::Failed {
            stage: err.stage(),
            error: err.to_string(),
        };
        if let Err(e) = self.writer.commit(&job.post_id, update, commit) {
            error!("Could not record failure of post {}: {}", job.post_id, e);
        }

        let mut message = err.to_string();
        if let Some(stage) = err.stage() {
            message = format!("{} (stage {})", message, stage);
        }
        // The job may have been adopted by a newer Upload since it was leased.
        let upload_id = self
            .board()
            .ok()
            .and_then(|board| board.upload_of(&job.post_id).cloned())
            .unwrap_or_else(|| job.upload_id.clone());
        let entry = UploadErrorEntry::new("enrichment_failed", message).for_post(job.post_id.as_str());
        if let Err(e) = self.uploads.append_error(&upload_id, &entry) {
            error!("Could not record error for upload {}: {}", upload_id, e);
        }

        self.report(
            EnrichmentEvent::for_post(&job.upload_id, &job.post_id, EnrichmentPhase::Failed)
                .with_stage(err.stage())
                .with_attempt(lease.attempt)
                .with_message(err.to_string()),
        );
        self.settle(job, lease, Settlement::Failed, Some(err));
    }

    /// Writes the Upload's final status and wakes anyone waiting on it.
    fn finalize_upload(&self, upload_id: &UploadId, cancelled: bool) {
        match self.write_final_status(upload_id, cancelled) {
            Ok(status) => {
                info!("Upload {} finished: {}", upload_id, status);
            }
            Err(e) => error!("Could not finalize upload {}: {}", upload_id, e),
        }
        if let Ok(mut board) = self.board() {
            board.finalized(upload_id);
        }
        self.changed.notify_all();
    }

    /// `completed` only when every Post of the Upload is terminal. Posts
    /// left `raw` or `cleaning` keep the Upload `processing` for `recover`.
    fn write_final_status(&self, upload_id: &UploadId, cancelled: bool) -> Result<UploadStatus, StoreError> {
        let counts = self.posts.count_by_state(upload_id)?;
        let failed = counts.enrichment_failed;
        let unfinished = counts.raw + counts.cleaning;

        let status = if cancelled {
            UploadStatus::Cancelled
        } else if unfinished == 0 {
            UploadStatus::Completed
        } else {
            UploadStatus::Processing
        };

        if failed > 0 {
            let entry = UploadErrorEntry::new(
                "enrichment_summary",
                format!("{} posts failed enrichment", failed),
            );
            self.uploads.append_error(upload_id, &entry)?;
        }
        if status.is_finished() {
            self.uploads.finish(upload_id, status, failed)?;
        } else {
            warn!("Upload {} settled with {} posts not enriched", upload_id, unfinished);
            let entry = UploadErrorEntry::new(
                "unfinished_posts",
                format!("{} posts did not finish enrichment", unfinished),
            );
            self.uploads.append_error(upload_id, &entry)?;
        }

        let message = format!(
            "{} enriched, {} failed, {} not enriched",
            counts.enriched, failed, unfinished
        );
        self.report(EnrichmentEvent::upload_finished(upload_id, status, &message));
        Ok(status)
    }
}
