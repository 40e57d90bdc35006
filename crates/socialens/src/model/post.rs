use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::update::StageName;
use super::upload::UploadId;

/// Namespace for deterministic post identifiers.
const POST_ID_NAMESPACE: uuid::Uuid = uuid::Uuid::from_u128(0x6f3c_1a52_8d44_4b0e_9a71_52c3_e0b8_d219);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    /// Derives the stable identifier for a source record. The same
    /// `(platform, source id)` pair always yields the same id, which is what
    /// makes re-ingesting an archive update rather than duplicate.
    pub fn derive(platform_key: &str, source_id: &str) -> Self {
        let name = format!("{}:{}", platform_key.trim().to_lowercase(), source_id.trim());
        Self(uuid::Uuid::new_v5(&POST_ID_NAMESPACE, name.as_bytes()).to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Instagram,
    Facebook,
    Youtube,
    Other,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Twitter,
        Platform::Instagram,
        Platform::Facebook,
        Platform::Youtube,
        Platform::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Instagram => "instagram",
            Platform::Facebook => "facebook",
            Platform::Youtube => "youtube",
            Platform::Other => "other",
        }
    }

    /// Maps a platform name as found in exports to the platform tag.
    /// Unrecognised names land in `Other`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "twitter" | "x" | "tweet" | "x.com" => Platform::Twitter,
            "instagram" | "ig" => Platform::Instagram,
            "facebook" | "fb" | "meta" => Platform::Facebook,
            "youtube" | "yt" => Platform::Youtube,
            _ => Platform::Other,
        }
    }

    /// Strict parse of a stored tag.
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == tag)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "positive" => Some(Sentiment::Positive),
            "negative" => Some(Sentiment::Negative),
            "neutral" => Some(Sentiment::Neutral),
            _ => None,
        }
    }
}

/// Enrichment lifecycle of a Post.
///
/// `raw -> cleaning -> {enriched, enrichment_failed}`. Moving forward is
/// always allowed; staying put is allowed so re-applied commits are
/// idempotent; going back requires [`crate::writer::ResultWriter::reset_for_reenrichment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentState {
    Raw,
    Cleaning,
    Enriched,
    EnrichmentFailed,
}

impl EnrichmentState {
    pub const ALL: [EnrichmentState; 4] = [
        EnrichmentState::Raw,
        EnrichmentState::Cleaning,
        EnrichmentState::Enriched,
        EnrichmentState::EnrichmentFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentState::Raw => "raw",
            EnrichmentState::Cleaning => "cleaning",
            EnrichmentState::Enriched => "enriched",
            EnrichmentState::EnrichmentFailed => "enrichment_failed",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == tag)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EnrichmentState::Enriched | EnrichmentState::EnrichmentFailed
        )
    }

    fn rank(&self) -> u8 {
        match self {
            EnrichmentState::Raw => 0,
            EnrichmentState::Cleaning => 1,
            EnrichmentState::Enriched | EnrichmentState::EnrichmentFailed => 2,
        }
    }

    pub fn can_transition_to(&self, next: EnrichmentState) -> bool {
        *self == next || next.rank() > self.rank()
    }
}

impl fmt::Display for EnrichmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Other,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Other => "other",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "image" | "photo" | "picture" | "gif" => MediaKind::Image,
            "video" | "clip" | "reel" => MediaKind::Video,
            "audio" | "sound" => MediaKind::Audio,
            _ => MediaKind::Other,
        }
    }

    pub fn from_content_type(content_type: &str) -> Self {
        match content_type.split('/').next().unwrap_or_default() {
            "image" => MediaKind::Image,
            "video" => MediaKind::Video,
            "audio" => MediaKind::Audio,
            _ => MediaKind::Other,
        }
    }
}

/// Handle returned by the blob store for an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobHandle(String);

impl BlobHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    /// Path or URL the source record used to reference the media.
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Set when the bytes were shipped inside the archive and stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<BlobHandle>,
    /// The record referenced an archive file that was not there.
    #[serde(default)]
    pub missing: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl MediaRef {
    pub fn new(kind: MediaKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            content_type: None,
            blob: None,
            missing: false,
            tags: Vec::new(),
            caption: None,
        }
    }
}

/// Canonical normalized representation of one social-media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    /// Non-owning back-reference to the Upload that last ingested this Post.
    pub upload_id: UploadId,
    pub platform: Platform,
    /// Identifier the source platform gave the post.
    pub source_id: String,
    pub user_id: Option<String>,
    pub raw_text: String,
    pub cleaned_text: Option<String>,
    pub language: Option<String>,
    pub sentiment: Option<Sentiment>,
    pub entities: Vec<String>,
    pub media: Vec<MediaRef>,
    pub timestamp: DateTime<Utc>,
    pub timestamp_inferred: bool,
    pub missing_media: bool,
    /// Source fields that have no canonical home.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub enrichment_state: EnrichmentState,
    pub failed_stage: Option<StageName>,
    pub last_error: Option<String>,
    /// Bumped by every successful store write; used for compare-and-swap.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }

    /// Clears every enrichment-owned field and returns the Post to `raw`.
    pub fn clear_enrichment(&mut self) {
        self.cleaned_text = None;
        self.language = None;
        self.sentiment = None;
        self.entities.clear();
        for media in &mut self.media {
            media.tags.clear();
            media.caption = None;
        }
        self.failed_stage = None;
        self.last_error = None;
        self.enrichment_state = EnrichmentState::Raw;
    }
}
