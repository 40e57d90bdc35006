//! Narrow persistence interfaces the core talks to.
//!
//! The pipeline only ever sees these traits. The shipped implementations
//! are SQLite (`Database`) for Posts and Uploads and the filesystem for
//! media blobs.

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{
    BlobHandle, EnrichmentState, Platform, Post, PostId, Sentiment, Upload, UploadErrorEntry,
    UploadId, UploadStatus,
};

pub mod blob;
mod sqlite;

pub use blob::{FsBlobStore, MemoryBlobStore};

/// Result of writing a freshly normalized Post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// The Post already existed. Source fields were refreshed; enrichment
    /// fields and state were left as they were.
    Updated { state: EnrichmentState },
}

/// Filter vocabulary shared by queries, aggregation and export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostFilter {
    pub platform: Option<Platform>,
    pub sentiment: Option<Sentiment>,
    pub language: Option<String>,
    pub has_media: Option<bool>,
    pub upload_id: Option<UploadId>,
    /// Any of these states. Empty means every state.
    pub states: Vec<EnrichmentState>,
    /// Inclusive lower bound on the authorship timestamp.
    pub timestamp_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the authorship timestamp.
    pub timestamp_before: Option<DateTime<Utc>>,
    /// Case-insensitive substring over raw or cleaned text.
    pub search_text: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Posts of one upload, counted per enrichment state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StateCounts {
    pub raw: u64,
    pub cleaning: u64,
    pub enriched: u64,
    pub enrichment_failed: u64,
}

impl StateCounts {
    pub fn get(&self, state: EnrichmentState) -> u64 {
        match state {
            EnrichmentState::Raw => self.raw,
            EnrichmentState::Cleaning => self.cleaning,
            EnrichmentState::Enriched => self.enriched,
            EnrichmentState::EnrichmentFailed => self.enrichment_failed,
        }
    }

    fn slot(&mut self, state: EnrichmentState) -> &mut u64 {
        match state {
            EnrichmentState::Raw => &mut self.raw,
            EnrichmentState::Cleaning => &mut self.cleaning,
            EnrichmentState::Enriched => &mut self.enriched,
            EnrichmentState::EnrichmentFailed => &mut self.enrichment_failed,
        }
    }

    pub fn add(&mut self, state: EnrichmentState, count: u64) {
        *self.slot(state) += count;
    }

    pub fn total(&self) -> u64 {
        self.raw + self.cleaning + self.enriched + self.enrichment_failed
    }
}

pub trait PostStore: Send + Sync {
    /// Creates the Post, or refreshes the source-owned fields of an
    /// existing one. Never touches enrichment state.
    fn upsert_source(&self, post: &Post) -> Result<UpsertOutcome, StoreError>;

    fn get(&self, id: &PostId) -> Result<Option<Post>, StoreError>;

    /// Writes `post` only if the stored version is still `expected_version`.
    /// Returns `false` when another writer got there first.
    fn compare_and_swap(&self, post: &Post, expected_version: i64) -> Result<bool, StoreError>;

    /// Matching Posts ordered by `(timestamp, id)`.
    fn query(&self, filter: &PostFilter) -> Result<Vec<Post>, StoreError>;

    fn count_by_state(&self, upload_id: &UploadId) -> Result<StateCounts, StoreError>;
}

pub trait UploadStore: Send + Sync {
    fn create(&self, upload: &Upload) -> Result<(), StoreError>;

    fn get(&self, id: &UploadId) -> Result<Option<Upload>, StoreError>;

    fn set_status(&self, id: &UploadId, status: UploadStatus) -> Result<(), StoreError>;

    fn update_counts(
        &self,
        id: &UploadId,
        total_posts: u64,
        persisted_posts: u64,
        skipped_records: u64,
    ) -> Result<(), StoreError>;

    /// Moves the upload to a finished status and stamps its completion time.
    fn finish(
        &self,
        id: &UploadId,
        status: UploadStatus,
        failed_posts: u64,
    ) -> Result<(), StoreError>;

    /// Appends to the error list. Concurrent appends must not lose entries.
    fn append_error(&self, id: &UploadId, entry: &UploadErrorEntry) -> Result<(), StoreError>;

    fn list_by_status(&self, status: UploadStatus) -> Result<Vec<Upload>, StoreError>;
}

pub trait BlobStore: Send + Sync {
    fn put(&self, bytes: &[u8], content_type: Option<&str>) -> Result<BlobHandle, StoreError>;

    fn get(&self, handle: &BlobHandle) -> Result<Vec<u8>, StoreError>;
}
