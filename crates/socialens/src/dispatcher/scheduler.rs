use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{select, tick, Receiver};
use log::{debug, error, warn};

use super::{RetryAction, Settlement, Shared};
use crate::error::{StageError, WorkerError};
use crate::model::PartialPostUpdate;

/// Releases jobs whose backoff elapsed and reclaims expired leases, once
/// per reaper interval, until told to stop.
pub(super) fn run_scheduler(control: Receiver<()>, shared: Arc<Shared>) {
    debug!("Scheduler started");
    let ticker = tick(shared.config.reaper_interval());

    loop {
        select! {
            recv(control) -> _ => break,
            recv(ticker) -> _ => {
                if let Err(e) = reclaim_expired(&shared).and_then(|_| release_due(&shared)) {
                    error!("Scheduler pass failed: {}", e);
                }
            }
        }
    }

    debug!("Scheduler stopped");
}

fn release_due(shared: &Shared) -> Result<(), WorkerError> {
    let released = shared.board()?.release_due(Instant::now());
    for job in released {
        debug!("Requeueing post {}", job.post_id);
        shared.queue.send(job).map_err(|_| WorkerError::ChannelClosed)?;
    }
    Ok(())
}

/// An expired lease counts as a timed-out attempt: retried at once if the
/// policy allows, failed otherwise.
fn reclaim_expired(shared: &Shared) -> Result<(), WorkerError> {
    let now = Instant::now();
    let expired = shared.board()?.expired_leases(now);

    for (job, lease) in expired {
        warn!(
            "Lease on post {} expired during attempt {}, reclaiming",
            job.post_id, lease.attempt
        );
        let err = StageError::Timeout {
            stage: None,
            after: shared.config.lease(),
        };
        match shared.policy.next_action(lease.attempt, &err) {
            RetryAction::Retry(_) => {
                shared.settle(&job, lease, Settlement::Retry { ready_at: now }, Some(err));
            }
            RetryAction::Fail => {
                shared.fail_job(&job, lease, &PartialPostUpdate::new(), err);
            }
        }
    }
    Ok(())
}
