use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(String);

impl UploadId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "pending" => Some(UploadStatus::Pending),
            "processing" => Some(UploadStatus::Processing),
            "completed" => Some(UploadStatus::Completed),
            "failed" => Some(UploadStatus::Failed),
            "cancelled" => Some(UploadStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Failed | UploadStatus::Cancelled
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an Upload's error list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadErrorEntry {
    /// Machine-readable kind, e.g. `malformed_archive`, `empty_record`,
    /// `enrichment_failed`.
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    /// Zero-based position of the record inside the archive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_index: Option<usize>,
}

impl UploadErrorEntry {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            post_id: None,
            record_index: None,
        }
    }

    pub fn for_post(mut self, post_id: impl Into<String>) -> Self {
        self.post_id = Some(post_id.into());
        self
    }

    pub fn at_record(mut self, index: usize) -> Self {
        self.record_index = Some(index);
        self
    }
}

/// One batch-ingestion unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub id: UploadId,
    pub filename: String,
    /// Number of records the parse pass found, skipped ones included.
    pub total_posts: u64,
    pub persisted_posts: u64,
    pub skipped_records: u64,
    pub failed_posts: u64,
    pub status: UploadStatus,
    pub errors: Vec<UploadErrorEntry>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Upload {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            id: UploadId::generate(),
            filename: filename.into(),
            total_posts: 0,
            persisted_posts: 0,
            skipped_records: 0,
            failed_posts: 0,
            status: UploadStatus::Pending,
            errors: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}
