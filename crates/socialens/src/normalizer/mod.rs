//! Normalization: one raw record to one canonical Post, or a skip.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::model::{EnrichmentState, MediaKind, MediaRef, Platform, Post, PostId, UploadId};
use crate::parser::{Attachment, CanonicalField, RawRecord, RecordBody};

pub mod timestamp;

/// Separator used when text is assembled from title/description/caption.
const TEXT_FALLBACK_SEPARATOR: &str = " | ";

/// Metadata key holding the original platform name of `other` posts.
const SOURCE_PLATFORM_KEY: &str = "source_platform";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EmptyRecord,
    MissingRequiredField,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::EmptyRecord => "empty_record",
            SkipReason::MissingRequiredField => "missing_required_field",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: SkipReason,
    pub detail: String,
}

/// Attachment bytes that still need to go to the blob store. `media_index`
/// points into `Post::media`.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPayload {
    pub media_index: usize,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPost {
    pub post: Post,
    pub payloads: Vec<MediaPayload>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Post(Box<NormalizedPost>),
    Skipped(SkippedRecord),
}

/// Normalizes records of one upload.
#[derive(Debug, Clone)]
pub struct Normalizer {
    upload_id: UploadId,
    received_at: DateTime<Utc>,
}

/// Canonical fields pulled out of either record shape.
#[derive(Default)]
struct SourceFields {
    values: BTreeMap<CanonicalField, String>,
    metadata: Map<String, Value>,
    timestamp: Option<Value>,
}

impl SourceFields {
    fn text(&self, field: CanonicalField) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn alias_rank(field: CanonicalField, key: &str) -> usize {
    let key = key.trim().to_lowercase();
    field
        .aliases()
        .iter()
        .position(|alias| *alias == key)
        .unwrap_or(usize::MAX)
}

fn extract_json(map: &Map<String, Value>) -> SourceFields {
    let mut fields = SourceFields::default();
    // Winning key per field, so `post_id` beats `id` whatever the key order.
    let mut winners: BTreeMap<CanonicalField, (usize, &String)> = BTreeMap::new();

    for (key, value) in map {
        let Some(field) = CanonicalField::from_name(key) else {
            fields.metadata.insert(key.clone(), value.clone());
            continue;
        };
        if field == CanonicalField::Media || value.is_null() {
            continue;
        }

        let usable = field == CanonicalField::Timestamp || scalar_text(value).is_some();
        let rank = alias_rank(field, key);
        let beats_current = winners.get(&field).map_or(true, |(best, _)| rank < *best);
        if !usable || !beats_current {
            fields.metadata.insert(key.clone(), value.clone());
            continue;
        }

        if let Some((_, displaced)) = winners.insert(field, (rank, key)) {
            fields.metadata.insert(displaced.clone(), map[displaced.as_str()].clone());
        }
        if field == CanonicalField::Timestamp {
            fields.timestamp = Some(value.clone());
        } else if let Some(text) = scalar_text(value) {
            fields.values.insert(field, text);
        }
    }
    fields
}

fn extract_csv(row: &BTreeMap<CanonicalField, String>) -> SourceFields {
    let mut fields = SourceFields::default();
    for (field, cell) in row {
        match field {
            CanonicalField::Media => {}
            CanonicalField::Timestamp => fields.timestamp = Some(Value::String(cell.clone())),
            _ => {
                fields.values.insert(*field, cell.clone());
            }
        }
    }
    fields
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Normalizer {
    pub fn new(upload_id: UploadId, received_at: DateTime<Utc>) -> Self {
        Self {
            upload_id,
            received_at,
        }
    }

    pub fn normalize(&self, record: RawRecord) -> Normalized {
        let fields = match &record.body {
            RecordBody::Json(Value::Object(map)) => extract_json(map),
            RecordBody::Json(other) => {
                return skip(
                    record.index,
                    SkipReason::MissingRequiredField,
                    format!("record is a JSON {}, expected an object", json_kind(other)),
                );
            }
            RecordBody::Csv(row) => extract_csv(row),
        };

        let raw_text = fields
            .text(CanonicalField::RawText)
            .map(str::to_string)
            .unwrap_or_else(|| fallback_text(&fields));
        let locations = record.body.media_locations();

        if raw_text.is_empty() && locations.is_empty() {
            return skip(
                record.index,
                SkipReason::EmptyRecord,
                "record has neither text nor media".to_string(),
            );
        }

        let Some(platform_name) = fields.text(CanonicalField::Platform) else {
            return skip(
                record.index,
                SkipReason::MissingRequiredField,
                "missing platform".to_string(),
            );
        };
        let Some(source_id) = fields.text(CanonicalField::PostId) else {
            return skip(
                record.index,
                SkipReason::MissingRequiredField,
                "missing source post id".to_string(),
            );
        };

        let platform = Platform::from_name(platform_name);
        let mut metadata = fields.metadata.clone();
        // Unknown platforms keep their own namespace so that equal ids on
        // different networks do not collide.
        let platform_key = if platform == Platform::Other {
            let name = platform_name.trim().to_lowercase();
            metadata.insert(SOURCE_PLATFORM_KEY.to_string(), Value::String(name.clone()));
            name
        } else {
            platform.as_str().to_string()
        };

        let parsed_ts = fields.timestamp.as_ref().and_then(timestamp::parse);
        if parsed_ts.is_none() {
            if let Some(raw) = &fields.timestamp {
                log::debug!(
                    "Record {} has unparsable timestamp {}, using upload time",
                    record.index,
                    raw
                );
            }
        }

        let mut media = Vec::with_capacity(locations.len());
        let mut payloads = Vec::new();
        let mut missing_media = false;

        for location in locations {
            let guessed_type = mime_guess::from_path(&location.location)
                .first()
                .map(|m| m.to_string());
            let mut media_ref = MediaRef::new(MediaKind::Other, location.location.clone());

            match record.attachment(&location.location) {
                Some(Attachment::Embedded {
                    content_type,
                    bytes,
                    ..
                }) => {
                    media_ref.content_type = Some(content_type.clone());
                    payloads.push(MediaPayload {
                        media_index: media.len(),
                        content_type: content_type.clone(),
                        bytes: bytes.clone(),
                    });
                }
                Some(Attachment::Missing { .. }) => {
                    media_ref.missing = true;
                    media_ref.content_type = guessed_type;
                    missing_media = true;
                }
                None => media_ref.content_type = guessed_type,
            }

            media_ref.kind = match location.declared_kind.as_deref().map(MediaKind::from_name) {
                Some(kind) if kind != MediaKind::Other => kind,
                _ => media_ref
                    .content_type
                    .as_deref()
                    .map(MediaKind::from_content_type)
                    .unwrap_or(MediaKind::Other),
            };
            media.push(media_ref);
        }

        let post = Post {
            id: PostId::derive(&platform_key, source_id),
            upload_id: self.upload_id.clone(),
            platform,
            source_id: source_id.to_string(),
            user_id: fields.text(CanonicalField::UserId).map(str::to_string),
            raw_text,
            cleaned_text: None,
            language: None,
            sentiment: None,
            entities: Vec::new(),
            media,
            timestamp: parsed_ts.unwrap_or(self.received_at),
            timestamp_inferred: parsed_ts.is_none(),
            missing_media,
            metadata,
            enrichment_state: EnrichmentState::Raw,
            failed_stage: None,
            last_error: None,
            version: 0,
            created_at: self.received_at,
            updated_at: self.received_at,
        };

        Normalized::Post(Box::new(NormalizedPost { post, payloads }))
    }
}

fn fallback_text(fields: &SourceFields) -> String {
    [
        CanonicalField::Title,
        CanonicalField::Description,
        CanonicalField::Caption,
    ]
    .iter()
    .filter_map(|field| fields.text(*field))
    .collect::<Vec<_>>()
    .join(TEXT_FALLBACK_SEPARATOR)
}

fn skip(index: usize, reason: SkipReason, detail: String) -> Normalized {
    Normalized::Skipped(SkippedRecord {
        index,
        reason,
        detail,
    })
}
