use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::StageName;

#[derive(Error, Debug)]
pub enum SocialensError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Upload not found: {0}")]
    UploadNotFound(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// File-level failures. Any of these aborts the upload before a Post exists.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unsupported upload format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed archive: {0}")]
    MalformedArchive(String),

    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
}

impl ParseError {
    /// Short machine-readable kind recorded in the Upload error list.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::UnsupportedFormat(_) => "unsupported_format",
            ParseError::MalformedArchive(_) => "malformed_archive",
            ParseError::PayloadTooLarge { .. } => "payload_too_large",
        }
    }
}

/// Job-level failures raised while running an enrichment stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("Stage {} timed out after {after:?}", stage_label(.stage))]
    Timeout {
        stage: Option<StageName>,
        after: Duration,
    },

    #[error("Stage {} failed: {message}", stage_label(.stage))]
    Exception {
        stage: Option<StageName>,
        message: String,
    },
}

fn stage_label(stage: &Option<StageName>) -> &'static str {
    stage.map(|s| s.as_str()).unwrap_or("<none>")
}

impl StageError {
    pub fn exception(stage: StageName, message: impl Into<String>) -> Self {
        StageError::Exception {
            stage: Some(stage),
            message: message.into(),
        }
    }

    /// The stage that was running when the error occurred, if known.
    pub fn stage(&self) -> Option<StageName> {
        match self {
            StageError::Timeout { stage, .. } | StageError::Exception { stage, .. } => *stage,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Blob error: {0}")]
    Blob(#[from] BlobError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A versioned write kept losing to concurrent writers.
    #[error("Write conflict on {0}")]
    Conflict(String),
}

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Failed to write blob '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read blob '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob handle: {0}")]
    InvalidHandle(String),

    #[error("Blob store lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum WriterError {
    /// The Post changed between read and write. The writer re-reads and
    /// re-applies; this only escapes when the retry budget is exhausted.
    #[error("Stale write rejected for post {post_id}")]
    StaleWriteRejected { post_id: String },

    #[error("Post {post_id} cannot move from '{from}' to '{to}'")]
    InvalidTransition {
        post_id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Post not found: {0}")]
    PostNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Writer lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Job board lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Unknown export field: {0}")]
    UnknownField(String),

    #[error("CSV serialization failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SocialensError>;
