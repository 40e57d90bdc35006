//! `PostStore` and `UploadStore` on top of the SQLite repositories.

use chrono::Utc;

use super::{PostFilter, PostStore, StateCounts, UploadStore, UpsertOutcome};
use crate::db::post_repo::{self, PostRow, PostRowFilter};
use crate::db::upload_repo::{self, UploadRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::error::StoreError;
use crate::model::{
    EnrichmentState, MediaRef, Platform, Post, PostId, Sentiment, StageName, Upload,
    UploadErrorEntry, UploadId, UploadStatus,
};

/// How many times an upsert re-reads after losing a version race.
const UPSERT_ATTEMPTS: usize = 8;

fn invalid(column: &'static str, value: &str) -> DatabaseError {
    DatabaseError::InvalidValue {
        column,
        value: value.to_string(),
    }
}

fn to_row(post: &Post) -> Result<PostRow, DatabaseError> {
    Ok(PostRow {
        id: post.id.as_str().to_string(),
        upload_id: post.upload_id.as_str().to_string(),
        platform: post.platform.as_str().to_string(),
        source_id: post.source_id.clone(),
        user_id: post.user_id.clone(),
        raw_text: post.raw_text.clone(),
        cleaned_text: post.cleaned_text.clone(),
        language: post.language.clone(),
        sentiment: post.sentiment.map(|s| s.as_str().to_string()),
        entities: serde_json::to_string(&post.entities)?,
        media: serde_json::to_string(&post.media)?,
        has_media: post.has_media(),
        timestamp: format_timestamp(&post.timestamp),
        timestamp_inferred: post.timestamp_inferred,
        missing_media: post.missing_media,
        metadata: serde_json::to_string(&post.metadata)?,
        enrichment_state: post.enrichment_state.as_str().to_string(),
        failed_stage: post.failed_stage.map(|s| s.as_str().to_string()),
        last_error: post.last_error.clone(),
        version: post.version,
        created_at: format_timestamp(&post.created_at),
        updated_at: format_timestamp(&post.updated_at),
    })
}

fn from_row(row: PostRow) -> Result<Post, DatabaseError> {
    let platform =
        Platform::parse(&row.platform).ok_or_else(|| invalid("platform", &row.platform))?;
    let sentiment = match row.sentiment.as_deref() {
        Some(tag) => Some(Sentiment::parse(tag).ok_or_else(|| invalid("sentiment", tag))?),
        None => None,
    };
    let enrichment_state = EnrichmentState::parse(&row.enrichment_state)
        .ok_or_else(|| invalid("enrichment_state", &row.enrichment_state))?;
    let failed_stage = match row.failed_stage.as_deref() {
        Some(tag) => Some(StageName::parse(tag).ok_or_else(|| invalid("failed_stage", tag))?),
        None => None,
    };

    Ok(Post {
        id: PostId::from_string(row.id),
        upload_id: UploadId::from_string(row.upload_id),
        platform,
        source_id: row.source_id,
        user_id: row.user_id,
        raw_text: row.raw_text,
        cleaned_text: row.cleaned_text,
        language: row.language,
        sentiment,
        entities: serde_json::from_str(&row.entities)?,
        media: serde_json::from_str(&row.media)?,
        timestamp: parse_timestamp("timestamp", &row.timestamp)?,
        timestamp_inferred: row.timestamp_inferred,
        missing_media: row.missing_media,
        metadata: serde_json::from_str(&row.metadata)?,
        enrichment_state,
        failed_stage,
        last_error: row.last_error,
        version: row.version,
        created_at: parse_timestamp("created_at", &row.created_at)?,
        updated_at: parse_timestamp("updated_at", &row.updated_at)?,
    })
}

/// Refreshes the source-owned fields of `existing` from a re-ingested copy.
/// Media keeps its enrichment annotations when the reference is unchanged.
fn refresh_source_fields(existing: &Post, incoming: &Post) -> Post {
    let media = incoming
        .media
        .iter()
        .map(|fresh| {
            let mut merged: MediaRef = fresh.clone();
            if let Some(old) = existing.media.iter().find(|m| m.source == fresh.source) {
                merged.tags = old.tags.clone();
                merged.caption = old.caption.clone();
            }
            merged
        })
        .collect();

    Post {
        upload_id: incoming.upload_id.clone(),
        platform: incoming.platform,
        source_id: incoming.source_id.clone(),
        user_id: incoming.user_id.clone(),
        raw_text: incoming.raw_text.clone(),
        media,
        timestamp: incoming.timestamp,
        timestamp_inferred: incoming.timestamp_inferred,
        missing_media: incoming.missing_media,
        metadata: incoming.metadata.clone(),
        updated_at: Utc::now(),
        ..existing.clone()
    }
}

fn to_row_filter(filter: &PostFilter) -> PostRowFilter {
    PostRowFilter {
        platform: filter.platform.map(|p| p.as_str().to_string()),
        sentiment: filter.sentiment.map(|s| s.as_str().to_string()),
        language: filter.language.clone(),
        has_media: filter.has_media,
        upload_id: filter.upload_id.as_ref().map(|u| u.as_str().to_string()),
        states: filter
            .states
            .iter()
            .map(|s| s.as_str().to_string())
            .collect(),
        timestamp_from: filter.timestamp_from.as_ref().map(format_timestamp),
        timestamp_before: filter.timestamp_before.as_ref().map(format_timestamp),
        search_text: filter.search_text.clone(),
        limit: filter.limit,
        offset: filter.offset,
    }
}

impl PostStore for Database {
    fn upsert_source(&self, post: &Post) -> Result<UpsertOutcome, StoreError> {
        for _ in 0..UPSERT_ATTEMPTS {
            match post_repo::find_by_id(self, post.id.as_str())? {
                None => {
                    if post_repo::insert_if_absent(self, &to_row(post)?)? {
                        return Ok(UpsertOutcome::Inserted);
                    }
                }
                Some(row) => {
                    let existing = from_row(row)?;
                    let refreshed = refresh_source_fields(&existing, post);
                    if post_repo::update_if_version(self, &to_row(&refreshed)?, existing.version)? {
                        return Ok(UpsertOutcome::Updated {
                            state: existing.enrichment_state,
                        });
                    }
                }
            }
            log::debug!("Upsert of post {} lost a version race, retrying", post.id);
        }
        Err(StoreError::Conflict(post.id.to_string()))
    }

    fn get(&self, id: &PostId) -> Result<Option<Post>, StoreError> {
        match post_repo::find_by_id(self, id.as_str())? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    }

    fn compare_and_swap(&self, post: &Post, expected_version: i64) -> Result<bool, StoreError> {
        Ok(post_repo::update_if_version(
            self,
            &to_row(post)?,
            expected_version,
        )?)
    }

    fn query(&self, filter: &PostFilter) -> Result<Vec<Post>, StoreError> {
        let rows = post_repo::query(self, &to_row_filter(filter))?;
        rows.into_iter()
            .map(|row| from_row(row).map_err(StoreError::from))
            .collect()
    }

    fn count_by_state(&self, upload_id: &UploadId) -> Result<StateCounts, StoreError> {
        let mut counts = StateCounts::default();
        for (tag, count) in post_repo::count_by_state(self, upload_id.as_str())? {
            let state =
                EnrichmentState::parse(&tag).ok_or_else(|| invalid("enrichment_state", &tag))?;
            counts.add(state, count);
        }
        Ok(counts)
    }
}

fn upload_to_row(upload: &Upload) -> Result<UploadRow, DatabaseError> {
    Ok(UploadRow {
        id: upload.id.as_str().to_string(),
        filename: upload.filename.clone(),
        total_posts: upload.total_posts,
        persisted_posts: upload.persisted_posts,
        skipped_records: upload.skipped_records,
        failed_posts: upload.failed_posts,
        status: upload.status.as_str().to_string(),
        errors: serde_json::to_string(&upload.errors)?,
        created_at: format_timestamp(&upload.created_at),
        completed_at: upload.completed_at.as_ref().map(format_timestamp),
    })
}

fn upload_from_row(row: UploadRow) -> Result<Upload, DatabaseError> {
    let status = UploadStatus::parse(&row.status).ok_or_else(|| invalid("status", &row.status))?;
    let completed_at = match row.completed_at.as_deref() {
        Some(value) => Some(parse_timestamp("completed_at", value)?),
        None => None,
    };
    Ok(Upload {
        id: UploadId::from_string(row.id),
        filename: row.filename,
        total_posts: row.total_posts,
        persisted_posts: row.persisted_posts,
        skipped_records: row.skipped_records,
        failed_posts: row.failed_posts,
        status,
        errors: serde_json::from_str(&row.errors)?,
        created_at: parse_timestamp("created_at", &row.created_at)?,
        completed_at,
    })
}

fn require(found: bool, id: &UploadId) -> Result<(), StoreError> {
    if found {
        Ok(())
    } else {
        Err(StoreError::NotFound {
            kind: "upload",
            id: id.to_string(),
        })
    }
}

impl UploadStore for Database {
    fn create(&self, upload: &Upload) -> Result<(), StoreError> {
        upload_repo::insert(self, &upload_to_row(upload)?)?;
        Ok(())
    }

    fn get(&self, id: &UploadId) -> Result<Option<Upload>, StoreError> {
        match upload_repo::find_by_id(self, id.as_str())? {
            Some(row) => Ok(Some(upload_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn set_status(&self, id: &UploadId, status: UploadStatus) -> Result<(), StoreError> {
        require(
            upload_repo::update_status(self, id.as_str(), status.as_str())?,
            id,
        )
    }

    fn update_counts(
        &self,
        id: &UploadId,
        total_posts: u64,
        persisted_posts: u64,
        skipped_records: u64,
    ) -> Result<(), StoreError> {
        require(
            upload_repo::update_counts(
                self,
                id.as_str(),
                total_posts,
                persisted_posts,
                skipped_records,
            )?,
            id,
        )
    }

    fn finish(
        &self,
        id: &UploadId,
        status: UploadStatus,
        failed_posts: u64,
    ) -> Result<(), StoreError> {
        let completed_at = format_timestamp(&Utc::now());
        require(
            upload_repo::finish(self, id.as_str(), status.as_str(), failed_posts, &completed_at)?,
            id,
        )
    }

    fn append_error(&self, id: &UploadId, entry: &UploadErrorEntry) -> Result<(), StoreError> {
        let value = serde_json::to_value(entry).map_err(DatabaseError::from)?;
        require(upload_repo::append_error(self, id.as_str(), &value)?, id)
    }

    fn list_by_status(&self, status: UploadStatus) -> Result<Vec<Upload>, StoreError> {
        upload_repo::list_by_status(self, status.as_str())?
            .into_iter()
            .map(|row| upload_from_row(row).map_err(StoreError::from))
            .collect()
    }
}
