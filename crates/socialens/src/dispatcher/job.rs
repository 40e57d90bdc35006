use std::time::Instant;

use crate::model::{PostId, UploadId};

/// The unit of asynchronous work: enrich exactly one Post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentJob {
    pub post_id: PostId,
    pub upload_id: UploadId,
}

impl EnrichmentJob {
    pub fn new(upload_id: UploadId, post_id: PostId) -> Self {
        Self { post_id, upload_id }
    }
}

/// A time-bounded claim on a job. Reports are only accepted under the
/// token of the current lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub token: u64,
    /// 1-based attempt this lease was granted for.
    pub attempt: u32,
    pub expires_at: Instant,
}

/// Where a live job is. Settled jobs leave the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Leased(Lease),
    /// Backing off until `ready_at`.
    Waiting { ready_at: Instant },
}

/// How an attempt ended, as reported to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Succeeded,
    Failed,
    Retry { ready_at: Instant },
}
