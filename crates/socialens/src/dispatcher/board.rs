//! Bookkeeping for every live Enrichment Job and per-Upload tallies.
//!
//! The board is plain data; the dispatcher keeps it behind a mutex and
//! never holds that mutex while a stage runs or a store call is made.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use super::job::{EnrichmentJob, JobStatus, Lease, Settlement};
use crate::error::StageError;
use crate::model::{PostId, UploadId};

#[derive(Debug, Clone)]
struct JobEntry {
    job: EnrichmentJob,
    status: JobStatus,
    attempts: u32,
    last_error: Option<StageError>,
}

#[derive(Debug, Clone, Default)]
struct UploadTally {
    outstanding: usize,
    succeeded: u64,
    failed: u64,
    skipped: u64,
    cancelled: bool,
}

/// Totals of one dispatch round, handed out when its last job settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettled {
    pub upload_id: UploadId,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// New job; the caller must put it on the queue.
    Queued,
    /// The Post's live job now counts toward this Upload. Carries the
    /// previous Upload's totals if that was its last job.
    Adopted(Option<UploadSettled>),
    /// Already live under this Upload, or the Upload is being cancelled.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The report came under a lease that is no longer current.
    Stale,
    Recorded,
    /// The report was the last outstanding job of its Upload.
    UploadSettled(UploadSettled),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelOutcome {
    /// Queued or backing-off jobs that will not run.
    pub skipped: Vec<PostId>,
    /// Leased jobs left to finish.
    pub in_flight: usize,
    pub settled: Option<UploadSettled>,
}

#[derive(Debug, Default)]
pub struct JobBoard {
    jobs: HashMap<PostId, JobEntry>,
    uploads: HashMap<UploadId, UploadTally>,
    /// Uploads whose last job settled but whose final status is not yet
    /// written.
    finalizing: HashSet<UploadId>,
    next_token: u64,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a queued job.
    ///
    /// A Post with a live job under another Upload moves to the new one: the
    /// Post belongs to whichever Upload last ingested it, and that is the
    /// Upload whose completion must wait for it.
    pub fn enqueue(&mut self, job: EnrichmentJob) -> Enqueued {
        if self
            .uploads
            .get(&job.upload_id)
            .is_some_and(|tally| tally.cancelled)
        {
            return Enqueued::Rejected;
        }

        if let Some(entry) = self.jobs.get_mut(&job.post_id) {
            if entry.job.upload_id == job.upload_id {
                return Enqueued::Rejected;
            }
            let previous = std::mem::replace(&mut entry.job.upload_id, job.upload_id.clone());
            self.uploads.entry(job.upload_id).or_default().outstanding += 1;
            if let Some(tally) = self.uploads.get_mut(&previous) {
                tally.outstanding = tally.outstanding.saturating_sub(1);
            }
            return Enqueued::Adopted(self.close_if_settled(&previous));
        }

        self.uploads
            .entry(job.upload_id.clone())
            .or_default()
            .outstanding += 1;
        self.jobs.insert(
            job.post_id.clone(),
            JobEntry {
                job,
                status: JobStatus::Queued,
                attempts: 0,
                last_error: None,
            },
        );
        Enqueued::Queued
    }

    /// Claims a queued job for one attempt. `None` means the job was
    /// cancelled, already claimed, or is backing off.
    pub fn lease(&mut self, post_id: &PostId, now: Instant, duration: Duration) -> Option<Lease> {
        let entry = self.jobs.get_mut(post_id)?;
        if entry.status != JobStatus::Queued {
            return None;
        }
        self.next_token += 1;
        entry.attempts += 1;
        let lease = Lease {
            token: self.next_token,
            attempt: entry.attempts,
            expires_at: now + duration,
        };
        entry.status = JobStatus::Leased(lease);
        Some(lease)
    }

    pub fn holds(&self, post_id: &PostId, token: u64) -> bool {
        matches!(
            self.jobs.get(post_id).map(|e| e.status),
            Some(JobStatus::Leased(lease)) if lease.token == token
        )
    }

    /// Records how an attempt ended. A retry of a cancelled Upload's job is
    /// turned into a skip.
    pub fn settle(
        &mut self,
        post_id: &PostId,
        token: u64,
        settlement: Settlement,
        error: Option<StageError>,
    ) -> SettleOutcome {
        if !self.holds(post_id, token) {
            return SettleOutcome::Stale;
        }
        let Some(entry) = self.jobs.get_mut(post_id) else {
            return SettleOutcome::Stale;
        };
        entry.last_error = error;
        let upload_id = entry.job.upload_id.clone();
        let cancelled = self
            .uploads
            .get(&upload_id)
            .is_some_and(|tally| tally.cancelled);

        match settlement {
            Settlement::Retry { ready_at } if !cancelled => {
                entry.status = JobStatus::Waiting { ready_at };
                SettleOutcome::Recorded
            }
            Settlement::Retry { .. } => self.remove(post_id, |tally| tally.skipped += 1),
            Settlement::Succeeded => self.remove(post_id, |tally| tally.succeeded += 1),
            Settlement::Failed => self.remove(post_id, |tally| tally.failed += 1),
        }
    }

    fn remove(&mut self, post_id: &PostId, count: impl FnOnce(&mut UploadTally)) -> SettleOutcome {
        let Some(entry) = self.jobs.remove(post_id) else {
            return SettleOutcome::Stale;
        };
        let upload_id = entry.job.upload_id;
        let Some(tally) = self.uploads.get_mut(&upload_id) else {
            return SettleOutcome::Recorded;
        };
        count(tally);
        tally.outstanding = tally.outstanding.saturating_sub(1);
        match self.close_if_settled(&upload_id) {
            Some(settled) => SettleOutcome::UploadSettled(settled),
            None => SettleOutcome::Recorded,
        }
    }

    fn close_if_settled(&mut self, upload_id: &UploadId) -> Option<UploadSettled> {
        if self.uploads.get(upload_id)?.outstanding > 0 {
            return None;
        }
        let tally = self.uploads.remove(upload_id)?;
        self.finalizing.insert(upload_id.clone());
        Some(UploadSettled {
            upload_id: upload_id.clone(),
            succeeded: tally.succeeded,
            failed: tally.failed,
            skipped: tally.skipped,
            cancelled: tally.cancelled,
        })
    }

    /// Moves every job whose backoff elapsed back to the queue.
    pub fn release_due(&mut self, now: Instant) -> Vec<EnrichmentJob> {
        let mut released = Vec::new();
        for entry in self.jobs.values_mut() {
            if let JobStatus::Waiting { ready_at } = entry.status {
                if ready_at <= now {
                    entry.status = JobStatus::Queued;
                    released.push(entry.job.clone());
                }
            }
        }
        released
    }

    /// Leases held past their expiry, oldest first.
    pub fn expired_leases(&self, now: Instant) -> Vec<(EnrichmentJob, Lease)> {
        let mut expired: Vec<_> = self
            .jobs
            .values()
            .filter_map(|entry| match entry.status {
                JobStatus::Leased(lease) if lease.expires_at <= now => {
                    Some((entry.job.clone(), lease))
                }
                _ => None,
            })
            .collect();
        expired.sort_by_key(|(_, lease)| lease.token);
        expired
    }

    /// Drops the Upload's queued and backing-off jobs and lets leased ones
    /// finish. `None` when the board holds nothing for the Upload.
    pub fn cancel_upload(&mut self, upload_id: &UploadId) -> Option<CancelOutcome> {
        let tally = self.uploads.get_mut(upload_id)?;
        tally.cancelled = true;

        let mut skipped = Vec::new();
        let mut in_flight = 0;
        for (post_id, entry) in &self.jobs {
            if entry.job.upload_id != *upload_id {
                continue;
            }
            match entry.status {
                JobStatus::Leased(_) => in_flight += 1,
                JobStatus::Queued | JobStatus::Waiting { .. } => skipped.push(post_id.clone()),
            }
        }
        for post_id in &skipped {
            self.jobs.remove(post_id);
        }
        tally.skipped += skipped.len() as u64;
        tally.outstanding = tally.outstanding.saturating_sub(skipped.len());

        skipped.sort();
        let settled = self.close_if_settled(upload_id);
        Some(CancelOutcome {
            skipped,
            in_flight,
            settled,
        })
    }

    /// Marks an Upload with nothing to run as settling, so waiters see it
    /// until its status is written. Returns false if it has live jobs or is
    /// already being finalized.
    pub fn begin_finalizing(&mut self, upload_id: &UploadId) -> bool {
        !self.uploads.contains_key(upload_id) && self.finalizing.insert(upload_id.clone())
    }

    pub fn finalized(&mut self, upload_id: &UploadId) {
        self.finalizing.remove(upload_id);
    }

    pub fn outstanding(&self, upload_id: &UploadId) -> usize {
        self.uploads.get(upload_id).map_or(0, |tally| tally.outstanding)
    }

    /// True while the Upload has live jobs or a pending final status.
    pub fn is_active(&self, upload_id: &UploadId) -> bool {
        self.uploads.contains_key(upload_id) || self.finalizing.contains(upload_id)
    }

    /// The Upload a live job currently counts toward.
    pub fn upload_of(&self, post_id: &PostId) -> Option<&UploadId> {
        self.jobs.get(post_id).map(|entry| &entry.job.upload_id)
    }

    pub fn attempts(&self, post_id: &PostId) -> Option<u32> {
        self.jobs.get(post_id).map(|entry| entry.attempts)
    }

    pub fn last_error(&self, post_id: &PostId) -> Option<&StageError> {
        self.jobs.get(post_id)?.last_error.as_ref()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
