//! Core data model: Posts, Uploads, and the partial updates enrichment
//! stages produce.

pub mod post;
pub mod update;
pub mod upload;

pub use post::{
    BlobHandle, EnrichmentState, MediaKind, MediaRef, Platform, Post, PostId, Sentiment,
};
pub use update::{MediaAnnotation, PartialPostUpdate, StageName, StageOutput};
pub use upload::{Upload, UploadErrorEntry, UploadId, UploadStatus};
