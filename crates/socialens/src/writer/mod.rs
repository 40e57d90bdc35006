//! Result writer: the only component that mutates a Post's enrichment
//! fields.
//!
//! Writes for one Post are serialized by a per-Post lock; the store write
//! itself is a compare-and-swap on the Post version, re-read and re-applied
//! when something else (a re-ingest refreshing source fields) got in
//! between.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::WriterError;
use crate::model::{EnrichmentState, PartialPostUpdate, Post, PostId, StageName};
use crate::store::PostStore;

/// Re-read/re-apply rounds before a stale write is reported.
const DEFAULT_CAS_ATTEMPTS: usize = 5;

/// How a commit moves the Post's enrichment state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    /// Store the outputs, leave the state alone. Ignored once the Post is
    /// terminal.
    Progress,
    Succeeded,
    Failed {
        stage: Option<StageName>,
        error: String,
    },
}

impl Commit {
    fn target(&self) -> Option<EnrichmentState> {
        match self {
            Commit::Progress => None,
            Commit::Succeeded => Some(EnrichmentState::Enriched),
            Commit::Failed { .. } => Some(EnrichmentState::EnrichmentFailed),
        }
    }
}

pub struct ResultWriter {
    posts: Arc<dyn PostStore>,
    locks: Mutex<HashMap<PostId, Arc<Mutex<()>>>>,
    cas_attempts: usize,
}

fn invalid_transition(post: &Post, to: EnrichmentState) -> WriterError {
    WriterError::InvalidTransition {
        post_id: post.id.to_string(),
        from: post.enrichment_state.as_str(),
        to: to.as_str(),
    }
}

impl ResultWriter {
    pub fn new(posts: Arc<dyn PostStore>) -> Self {
        Self {
            posts,
            locks: Mutex::new(HashMap::new()),
            cas_attempts: DEFAULT_CAS_ATTEMPTS,
        }
    }

    /// Marks the start of an attempt: `raw` becomes `cleaning`. A Post that
    /// is already terminal is returned unchanged so the caller can drop
    /// the job.
    pub fn begin(&self, id: &PostId) -> Result<Post, WriterError> {
        self.mutate(id, |post| {
            if post.enrichment_state == EnrichmentState::Raw {
                post.enrichment_state = EnrichmentState::Cleaning;
                Ok(true)
            } else {
                Ok(false)
            }
        })
    }

    /// Applies `update` and, for terminal commits, moves the state.
    ///
    /// Outputs overwrite per stage, so committing the same update twice
    /// leaves the Post as after the first time.
    pub fn commit(
        &self,
        id: &PostId,
        update: &PartialPostUpdate,
        commit: Commit,
    ) -> Result<Post, WriterError> {
        self.mutate(id, |post| {
            let current = post.enrichment_state;
            match commit.target() {
                None if current.is_terminal() => return Ok(false),
                None => {}
                Some(target) if current.is_terminal() && current != target => {
                    return Err(invalid_transition(post, target));
                }
                Some(target) if !current.can_transition_to(target) => {
                    return Err(invalid_transition(post, target));
                }
                Some(target) => post.enrichment_state = target,
            }

            update.apply_to(post);
            match &commit {
                Commit::Succeeded => {
                    post.failed_stage = None;
                    post.last_error = None;
                }
                Commit::Failed { stage, error } => {
                    post.failed_stage = *stage;
                    post.last_error = Some(error.clone());
                }
                Commit::Progress => {}
            }
            Ok(true)
        })
    }

    /// Clears enrichment output and returns a terminal Post to `raw`. This
    /// is the only way out of a terminal state.
    pub fn reset_for_reenrichment(&self, id: &PostId) -> Result<Post, WriterError> {
        self.mutate(id, |post| {
            if post.enrichment_state == EnrichmentState::Cleaning {
                return Err(invalid_transition(post, EnrichmentState::Raw));
            }
            post.clear_enrichment();
            Ok(true)
        })
    }

    fn lock_for(&self, id: &PostId) -> Result<Arc<Mutex<()>>, WriterError> {
        let mut locks = self.locks.lock().map_err(|_| WriterError::LockPoisoned)?;
        Ok(locks.entry(id.clone()).or_default().clone())
    }

    fn release(&self, id: &PostId, lock: Arc<Mutex<()>>) {
        if let Ok(mut locks) = self.locks.lock() {
            // The map's copy plus ours: nobody else is waiting.
            if Arc::strong_count(&lock) == 2 {
                locks.remove(id);
            }
        }
    }

    /// Read-modify-write under the per-Post lock. `apply` returns whether
    /// it changed anything; unchanged Posts are not written.
    fn mutate<F>(&self, id: &PostId, mut apply: F) -> Result<Post, WriterError>
    where
        F: FnMut(&mut Post) -> Result<bool, WriterError>,
    {
        let lock = self.lock_for(id)?;
        let result = {
            let _guard = lock.lock().map_err(|_| WriterError::LockPoisoned)?;
            self.write_with_retry(id, &mut apply)
        };
        self.release(id, lock);
        result
    }

    fn write_with_retry<F>(&self, id: &PostId, apply: &mut F) -> Result<Post, WriterError>
    where
        F: FnMut(&mut Post) -> Result<bool, WriterError>,
    {
        for attempt in 1..=self.cas_attempts {
            let current = self
                .posts
                .get(id)?
                .ok_or_else(|| WriterError::PostNotFound(id.to_string()))?;
            let expected = current.version;

            let mut next = current.clone();
            if !apply(&mut next)? {
                return Ok(current);
            }
            next.updated_at = Utc::now();

            if self.posts.compare_and_swap(&next, expected)? {
                next.version = expected + 1;
                return Ok(next);
            }
            log::debug!(
                "Stale write on post {} (attempt {}/{}), re-reading",
                id,
                attempt,
                self.cas_attempts
            );
        }
        Err(WriterError::StaleWriteRejected {
            post_id: id.to_string(),
        })
    }
}
