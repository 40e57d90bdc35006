use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use log::{debug, error, warn};

use super::{EnrichmentJob, Lease, Settlement, Shared};
use crate::enrichment::StageEvent;
use crate::error::{StageError, WriterError};
use crate::model::{EnrichmentState, PartialPostUpdate, Post, StageName};
use crate::progress::{EnrichmentEvent, EnrichmentPhase};
use crate::writer::Commit;

/// What the attempt thread sends back.
enum AttemptMessage {
    Stage(StageEvent),
    Finished,
}

pub(super) fn run_worker(worker_id: usize, job_receiver: Receiver<EnrichmentJob>, shared: Arc<Shared>) {
    debug!("Worker {} started", worker_id);

    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => run_job(worker_id, &shared, job),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn run_job(worker_id: usize, shared: &Shared, job: EnrichmentJob) {
    let lease = match shared.board() {
        Ok(mut board) => board.lease(&job.post_id, Instant::now(), shared.config.lease()),
        Err(e) => {
            error!("Worker {} cannot read the job board: {}", worker_id, e);
            return;
        }
    };
    let Some(lease) = lease else {
        debug!("Worker {} skipping post {}: job no longer queued", worker_id, job.post_id);
        return;
    };
    debug!(
        "Worker {} enriching post {} (attempt {})",
        worker_id, job.post_id, lease.attempt
    );

    let post = match shared.writer.begin(&job.post_id) {
        Ok(post) => post,
        Err(WriterError::PostNotFound(id)) => {
            let err = StageError::Exception {
                stage: None,
                message: format!("post {} no longer exists", id),
            };
            shared.fail_job(&job, lease, &PartialPostUpdate::new(), err);
            return;
        }
        Err(e) => {
            let err = StageError::Exception {
                stage: None,
                message: format!("could not start attempt: {}", e),
            };
            shared.retry_or_fail(&job, lease, &PartialPostUpdate::new(), err);
            return;
        }
    };

    // An earlier attempt finished but its report never arrived.
    match post.enrichment_state {
        EnrichmentState::Enriched => {
            shared.settle(&job, lease, Settlement::Succeeded, None);
            return;
        }
        EnrichmentState::EnrichmentFailed => {
            shared.settle(&job, lease, Settlement::Failed, None);
            return;
        }
        EnrichmentState::Raw | EnrichmentState::Cleaning => {}
    }

    shared.report(
        EnrichmentEvent::for_post(&job.upload_id, &job.post_id, EnrichmentPhase::Running)
            .with_attempt(lease.attempt),
    );

    let (update, failure) = run_attempt(shared, &job, lease, &post);
    finish_attempt(shared, &job, lease, update, failure);
}

/// Runs the pipeline on its own thread and collects stage results until it
/// finishes or the attempt times out. On timeout the thread is abandoned
/// and whatever it produces later is ignored.
fn run_attempt(
    shared: &Shared,
    job: &EnrichmentJob,
    lease: Lease,
    post: &Post,
) -> (PartialPostUpdate, Option<StageError>) {
    let mut update = PartialPostUpdate::new();
    let (tx, rx) = unbounded::<AttemptMessage>();
    let pipeline = Arc::clone(&shared.pipeline);
    let working = post.clone();

    let spawned = thread::Builder::new()
        .name(format!("enrich-attempt-{}", post.id))
        .spawn(move || {
            pipeline.run_with(&working, &mut |event| {
                let _ = tx.send(AttemptMessage::Stage(event));
            });
            let _ = tx.send(AttemptMessage::Finished);
        });
    if let Err(e) = spawned {
        let err = StageError::Exception {
            stage: None,
            message: format!("could not spawn attempt thread: {}", e),
        };
        return (update, Some(err));
    }

    let timeout = shared.config.attempt_timeout();
    let deadline = Instant::now() + timeout;
    let mut running: Option<StageName> = None;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(AttemptMessage::Stage(StageEvent::Started(stage))) => running = Some(stage),
            Ok(AttemptMessage::Stage(StageEvent::Completed(stage, partial))) => {
                update.merge(partial);
                running = None;
                shared.report(
                    EnrichmentEvent::for_post(
                        &job.upload_id,
                        &job.post_id,
                        EnrichmentPhase::StageCompleted,
                    )
                    .with_stage(Some(stage))
                    .with_attempt(lease.attempt),
                );
            }
            Ok(AttemptMessage::Stage(StageEvent::Failed(err))) => return (update, Some(err)),
            Ok(AttemptMessage::Finished) => return (update, None),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Attempt {} for post {} timed out after {:?} in {}",
                    lease.attempt,
                    job.post_id,
                    timeout,
                    running.map_or("<between stages>", |s| s.as_str())
                );
                let err = StageError::Timeout {
                    stage: running,
                    after: timeout,
                };
                return (update, Some(err));
            }
            Err(RecvTimeoutError::Disconnected) => {
                let err = StageError::Exception {
                    stage: running,
                    message: "enrichment thread panicked".to_string(),
                };
                return (update, Some(err));
            }
        }
    }
}

fn finish_attempt(
    shared: &Shared,
    job: &EnrichmentJob,
    lease: Lease,
    update: PartialPostUpdate,
    failure: Option<StageError>,
) {
    let still_held = shared
        .board()
        .map(|board| board.holds(&job.post_id, lease.token))
        .unwrap_or(false);
    if !still_held {
        debug!(
            "Lease on post {} was reclaimed, dropping attempt {}",
            job.post_id, lease.attempt
        );
        return;
    }

    let Some(err) = failure else {
        match shared.writer.commit(&job.post_id, &update, Commit::Succeeded) {
            Ok(_) => {
                shared.report(
                    EnrichmentEvent::for_post(&job.upload_id, &job.post_id, EnrichmentPhase::Enriched)
                        .with_attempt(lease.attempt),
                );
                shared.settle(job, lease, Settlement::Succeeded, None);
            }
            Err(e) => {
                let err = StageError::Exception {
                    stage: None,
                    message: format!("could not commit results: {}", e),
                };
                shared.retry_or_fail(job, lease, &update, err);
            }
        }
        return;
    };

    shared.retry_or_fail(job, lease, &update, err);
}
