//! Upload intake, status, cancellation, re-enrichment and recovery.
//!
//! Parsing and normalization run synchronously inside `ingest`; enrichment
//! is handed to the dispatcher and `ingest` returns as soon as the Posts
//! are persisted in `raw` and their jobs are queued.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tracing::info_span;

use crate::dispatcher::Dispatcher;
use crate::error::{ParseError, Result, SocialensError, WriterError};
use crate::model::{
    EnrichmentState, Post, PostId, Upload, UploadErrorEntry, UploadId, UploadStatus,
};
use crate::normalizer::{MediaPayload, Normalized, Normalizer};
use crate::parser;
use crate::sanitize::{preview, redact_filename};
use crate::store::{BlobStore, PostFilter, PostStore, StateCounts, UploadStore, UpsertOutcome};
use crate::writer::ResultWriter;

/// Returned by `ingest` before enrichment starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    pub upload_id: UploadId,
    pub filename: String,
    /// Records found by the parse pass, skipped ones included.
    pub total_posts: u64,
    pub persisted_posts: u64,
    pub skipped_records: u64,
    pub status: UploadStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadStatusReport {
    pub upload_id: UploadId,
    pub filename: String,
    pub status: UploadStatus,
    pub total_posts: u64,
    pub persisted_posts: u64,
    pub skipped_records: u64,
    pub failed_posts: u64,
    pub states: StateCounts,
    pub errors: Vec<UploadErrorEntry>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReenrichSummary {
    pub reset: usize,
    pub dispatched: usize,
    /// Posts mid-attempt; left alone.
    pub in_flight: Vec<PostId>,
    pub not_found: Vec<PostId>,
    /// Uploads that went back to `processing`.
    pub uploads: Vec<UploadId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoverySummary {
    pub uploads: Vec<UploadId>,
    pub dispatched: usize,
    /// Uploads interrupted before any Post was stored.
    pub abandoned: usize,
}

pub struct Ingestor {
    posts: Arc<dyn PostStore>,
    uploads: Arc<dyn UploadStore>,
    blobs: Arc<dyn BlobStore>,
    writer: Arc<ResultWriter>,
    dispatcher: Arc<Dispatcher>,
    max_upload_bytes: u64,
}

impl Ingestor {
    pub fn new(
        posts: Arc<dyn PostStore>,
        uploads: Arc<dyn UploadStore>,
        blobs: Arc<dyn BlobStore>,
        writer: Arc<ResultWriter>,
        dispatcher: Arc<Dispatcher>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            posts,
            uploads,
            blobs,
            writer,
            dispatcher,
            max_upload_bytes,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Accepts one upload.
    ///
    /// File-level problems (size, format, structure) fail the call and leave
    /// no Posts behind. Record-level problems are counted on the Upload.
    pub fn ingest(
        &self,
        filename: &str,
        declared_mime: Option<&str>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Result<UploadReceipt> {
        let bytes: Arc<[u8]> = bytes.into();
        let limit = self.max_upload_bytes as usize;
        if bytes.len() > limit {
            warn!("Rejected upload of {} bytes (limit {})", bytes.len(), limit);
            return Err(ParseError::PayloadTooLarge {
                size: bytes.len(),
                limit,
            }
            .into());
        }

        let upload = Upload::new(redact_filename(filename));
        self.uploads.create(&upload)?;
        let _span = info_span!("ingest", upload_id = %upload.id, filename = %upload.filename).entered();

        let parsed = parser::parse(filename, declared_mime, bytes, self.max_upload_bytes);
        let archive = match parsed {
            Ok(archive) => archive,
            Err(e) => {
                warn!("Upload {} rejected: {}", upload.id, e);
                self.fail_upload(&upload.id, UploadErrorEntry::new(e.kind(), e.to_string()));
                return Err(e.into());
            }
        };

        let total = archive.record_count() as u64;
        let normalizer = Normalizer::new(upload.id.clone(), Utc::now());
        let mut persisted: HashSet<PostId> = HashSet::new();
        let mut to_dispatch: Vec<PostId> = Vec::new();
        let mut skipped = 0u64;

        for record in archive.records() {
            match normalizer.normalize(record) {
                Normalized::Skipped(skip) => {
                    debug!("Skipped record {}: {}", skip.index, skip.reason.as_str());
                    skipped += 1;
                    let entry =
                        UploadErrorEntry::new(skip.reason.as_str(), skip.detail).at_record(skip.index);
                    self.uploads.append_error(&upload.id, &entry)?;
                }
                Normalized::Post(normalized) => {
                    let mut post = normalized.post;
                    self.store_media(&upload.id, &mut post, normalized.payloads)?;

                    let outcome = match self.posts.upsert_source(&post) {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!("Could not store post {}: {}", post.id, e);
                            self.fail_upload(
                                &upload.id,
                                UploadErrorEntry::new("store_failed", e.to_string())
                                    .for_post(post.id.as_str()),
                            );
                            return Err(e.into());
                        }
                    };
                    debug!("Stored post {} ({})", post.id, preview(&post.raw_text));

                    let fresh = persisted.insert(post.id.clone());
                    match outcome {
                        UpsertOutcome::Inserted => to_dispatch.push(post.id),
                        // A live job for an unfinished Post is adopted by
                        // this Upload rather than run again.
                        UpsertOutcome::Updated {
                            state: EnrichmentState::Raw | EnrichmentState::Cleaning,
                        } if fresh => to_dispatch.push(post.id),
                        UpsertOutcome::Updated { state } => {
                            debug!("Post {} already {}, not re-dispatched", post.id, state);
                        }
                    }
                }
            }
        }

        let persisted = persisted.len() as u64;
        self.uploads
            .update_counts(&upload.id, total, persisted, skipped)?;

        // A cancel that arrived while records were being stored wins.
        let cancelled = self
            .uploads
            .get(&upload.id)?
            .is_some_and(|u| u.status == UploadStatus::Cancelled);
        if !cancelled {
            self.uploads.set_status(&upload.id, UploadStatus::Processing)?;
            self.dispatcher.dispatch(&upload.id, &to_dispatch)?;
        }

        info!(
            "Accepted upload {}: {} records, {} posts stored, {} skipped",
            upload.id, total, persisted, skipped
        );

        let status = self
            .uploads
            .get(&upload.id)?
            .map_or(UploadStatus::Processing, |u| u.status);
        Ok(UploadReceipt {
            upload_id: upload.id,
            filename: upload.filename,
            total_posts: total,
            persisted_posts: persisted,
            skipped_records: skipped,
            status,
        })
    }

    /// Puts attachment bytes in the blob store. A blob that cannot be stored
    /// leaves its media reference marked missing.
    fn store_media(&self, upload_id: &UploadId, post: &mut Post, payloads: Vec<MediaPayload>) -> Result<()> {
        for payload in payloads {
            let Some(media) = post.media.get_mut(payload.media_index) else {
                continue;
            };
            match self.blobs.put(&payload.bytes, Some(&payload.content_type)) {
                Ok(handle) => media.blob = Some(handle),
                Err(e) => {
                    warn!("Could not store media {} of post {}: {}", media.source, post.id, e);
                    media.missing = true;
                    post.missing_media = true;
                    let entry = UploadErrorEntry::new("media_store_failed", e.to_string())
                        .for_post(post.id.as_str());
                    self.uploads.append_error(upload_id, &entry)?;
                }
            }
        }
        Ok(())
    }

    fn fail_upload(&self, upload_id: &UploadId, entry: UploadErrorEntry) {
        let result = self
            .uploads
            .append_error(upload_id, &entry)
            .and_then(|_| self.uploads.finish(upload_id, UploadStatus::Failed, 0));
        if let Err(e) = result {
            error!("Could not mark upload {} failed: {}", upload_id, e);
        }
    }

    pub fn status(&self, upload_id: &UploadId) -> Result<UploadStatusReport> {
        let upload = self
            .uploads
            .get(upload_id)?
            .ok_or_else(|| SocialensError::UploadNotFound(upload_id.to_string()))?;
        let states = self.posts.count_by_state(upload_id)?;
        Ok(UploadStatusReport {
            upload_id: upload.id,
            filename: upload.filename,
            status: upload.status,
            total_posts: upload.total_posts,
            persisted_posts: upload.persisted_posts,
            skipped_records: upload.skipped_records,
            failed_posts: upload.failed_posts,
            states,
            errors: upload.errors,
            created_at: upload.created_at,
            completed_at: upload.completed_at,
        })
    }

    /// Cancels an unfinished Upload. Finished Uploads are left as they are.
    pub fn cancel(&self, upload_id: &UploadId) -> Result<UploadStatusReport> {
        let upload = self
            .uploads
            .get(upload_id)?
            .ok_or_else(|| SocialensError::UploadNotFound(upload_id.to_string()))?;
        if upload.status.is_finished() {
            info!("Upload {} already {}, nothing to cancel", upload_id, upload.status);
        } else {
            self.dispatcher.cancel_upload(upload_id)?;
        }
        self.status(upload_id)
    }

    /// Blocks until the Upload's enrichment settles or `timeout` passes,
    /// then reports its status.
    pub fn wait_for_upload(&self, upload_id: &UploadId, timeout: Duration) -> Result<UploadStatusReport> {
        if !self.dispatcher.wait_for_upload(upload_id, timeout)? {
            debug!("Timed out waiting for upload {}", upload_id);
        }
        self.status(upload_id)
    }

    /// Clears the enrichment of the given Posts and enriches them again
    /// under their Uploads.
    pub fn reenrich(&self, post_ids: &[PostId]) -> Result<ReenrichSummary> {
        let mut summary = ReenrichSummary::default();
        let mut by_upload: BTreeMap<UploadId, Vec<PostId>> = BTreeMap::new();

        for post_id in post_ids {
            match self.writer.reset_for_reenrichment(post_id) {
                Ok(post) => {
                    summary.reset += 1;
                    by_upload.entry(post.upload_id).or_default().push(post.id);
                }
                Err(WriterError::PostNotFound(_)) => summary.not_found.push(post_id.clone()),
                Err(WriterError::InvalidTransition { .. }) => {
                    summary.in_flight.push(post_id.clone())
                }
                Err(e) => return Err(e.into()),
            }
        }

        for (upload_id, ids) in by_upload {
            self.uploads.set_status(&upload_id, UploadStatus::Processing)?;
            summary.dispatched += self.dispatcher.dispatch(&upload_id, &ids)?;
            summary.uploads.push(upload_id);
        }
        info!(
            "Re-enrichment requested for {} posts: {} reset, {} dispatched",
            post_ids.len(),
            summary.reset,
            summary.dispatched
        );
        Ok(summary)
    }

    /// Picks up Uploads a previous process left unfinished: their `raw` and
    /// `cleaning` Posts are dispatched again.
    pub fn recover(&self) -> Result<RecoverySummary> {
        let mut summary = RecoverySummary::default();
        let mut interrupted = self.uploads.list_by_status(UploadStatus::Pending)?;
        interrupted.extend(self.uploads.list_by_status(UploadStatus::Processing)?);

        for upload in interrupted {
            let filter = PostFilter {
                upload_id: Some(upload.id.clone()),
                states: vec![EnrichmentState::Raw, EnrichmentState::Cleaning],
                ..PostFilter::default()
            };
            let pending: Vec<PostId> = self.posts.query(&filter)?.into_iter().map(|p| p.id).collect();

            if upload.status == UploadStatus::Pending && self.posts.count_by_state(&upload.id)?.total() == 0 {
                warn!("Upload {} was interrupted before any post was stored", upload.id);
                self.fail_upload(
                    &upload.id,
                    UploadErrorEntry::new("ingest_interrupted", "upload interrupted before parsing finished"),
                );
                summary.abandoned += 1;
                continue;
            }

            info!(
                "Recovering upload {}: {} posts left to enrich",
                upload.id,
                pending.len()
            );
            self.uploads.set_status(&upload.id, UploadStatus::Processing)?;
            summary.dispatched += self.dispatcher.dispatch(&upload.id, &pending)?;
            summary.uploads.push(upload.id);
        }
        Ok(summary)
    }
}
