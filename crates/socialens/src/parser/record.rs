//! Raw records as they come out of an archive, before normalization.

use std::collections::BTreeMap;

use serde_json::Value;

/// Canonical field a source column or key can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CanonicalField {
    Platform,
    PostId,
    RawText,
    Title,
    Description,
    Caption,
    Timestamp,
    UserId,
    Media,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 9] = [
        CanonicalField::Platform,
        CanonicalField::PostId,
        CanonicalField::RawText,
        CanonicalField::Title,
        CanonicalField::Description,
        CanonicalField::Caption,
        CanonicalField::Timestamp,
        CanonicalField::UserId,
        CanonicalField::Media,
    ];

    /// Source names accepted for this field, most specific first.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            CanonicalField::Platform => &["platform", "source", "network"],
            CanonicalField::PostId => &["post_id", "id", "tweet_id", "source_id"],
            CanonicalField::RawText => &["raw_text", "text", "content", "message", "body"],
            CanonicalField::Title => &["title"],
            CanonicalField::Description => &["description"],
            CanonicalField::Caption => &["caption"],
            CanonicalField::Timestamp => &["timestamp", "created_at", "date", "posted_at", "time"],
            CanonicalField::UserId => &["user_id", "author", "username", "user"],
            CanonicalField::Media => &["media", "images", "videos", "attachments"],
        }
    }

    /// Maps a header or key (case-insensitive) to its canonical field.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|field| field.aliases().contains(&name.as_str()))
    }

    pub fn as_str(&self) -> &'static str {
        self.aliases()[0]
    }
}

/// One media reference found in a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLocation {
    /// Relative archive path or URL, exactly as the record gave it.
    pub location: String,
    /// Kind the record declared, e.g. `photo` or `video`.
    pub declared_kind: Option<String>,
}

impl MediaLocation {
    pub fn is_remote(&self) -> bool {
        let lower = self.location.to_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }
}

/// Format-specific shape of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    /// One element of a JSON posts array. Not necessarily an object.
    Json(Value),
    /// One CSV row keyed by the canonical field of its column. Unknown
    /// columns are dropped, empty cells are absent.
    Csv(BTreeMap<CanonicalField, String>),
}

impl RecordBody {
    /// Every media reference the record carries, in source order.
    pub fn media_locations(&self) -> Vec<MediaLocation> {
        match self {
            RecordBody::Json(Value::Object(map)) => {
                let mut found = Vec::new();
                for (key, value) in map {
                    if CanonicalField::from_name(key) == Some(CanonicalField::Media) {
                        collect_json_media(value, &mut found);
                    }
                }
                found
            }
            RecordBody::Json(_) => Vec::new(),
            RecordBody::Csv(fields) => fields
                .get(&CanonicalField::Media)
                .map(|cell| split_media_cell(cell))
                .unwrap_or_default(),
        }
    }
}

fn split_media_cell(cell: &str) -> Vec<MediaLocation> {
    cell.split([';', '|'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| MediaLocation {
            location: part.to_string(),
            declared_kind: None,
        })
        .collect()
}

const MEDIA_LOCATION_KEYS: [&str; 5] = ["path", "file", "url", "src", "uri"];
const MEDIA_KIND_KEYS: [&str; 3] = ["type", "kind", "media_type"];

fn collect_json_media(value: &Value, found: &mut Vec<MediaLocation>) {
    match value {
        Value::String(cell) => found.extend(split_media_cell(cell)),
        Value::Array(items) => {
            for item in items {
                collect_json_media(item, found);
            }
        }
        Value::Object(map) => {
            let location = MEDIA_LOCATION_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .filter(|l| !l.is_empty());
            if let Some(location) = location {
                let declared_kind = MEDIA_KIND_KEYS
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str))
                    .map(str::to_string);
                found.push(MediaLocation {
                    location: location.to_string(),
                    declared_kind,
                });
            }
        }
        _ => {}
    }
}

/// Media bytes resolved from inside an archive.
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    Embedded {
        location: String,
        content_type: String,
        bytes: Vec<u8>,
    },
    /// Referenced by the record but absent from the archive.
    Missing { location: String },
}

impl Attachment {
    pub fn location(&self) -> &str {
        match self {
            Attachment::Embedded { location, .. } | Attachment::Missing { location } => location,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Zero-based position inside the archive.
    pub index: usize,
    pub body: RecordBody,
    /// Archive-local media, keyed by the location the record used.
    pub attachments: Vec<Attachment>,
}

impl RawRecord {
    pub fn new(index: usize, body: RecordBody) -> Self {
        Self {
            index,
            body,
            attachments: Vec::new(),
        }
    }

    pub fn attachment(&self, location: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.location() == location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_aliases() {
        assert_eq!(CanonicalField::from_name("Tweet_ID"), Some(CanonicalField::PostId));
        assert_eq!(CanonicalField::from_name(" created_at "), Some(CanonicalField::Timestamp));
        assert_eq!(CanonicalField::from_name("likes"), None);
        assert_eq!(CanonicalField::Media.as_str(), "media");
    }

    #[test]
    fn test_json_media_locations() {
        let body = RecordBody::Json(json!({
            "id": "1",
            "media": ["a.png", {"url": "https://cdn.example.com/v.mp4", "type": "video"}]
        }));

        let found = body.media_locations();
        let locations: Vec<&str> = found.iter().map(|m| m.location.as_str()).collect();
        assert_eq!(locations, vec!["a.png", "https://cdn.example.com/v.mp4"]);
        assert_eq!(found[1].declared_kind.as_deref(), Some("video"));
        assert!(found[1].is_remote());
        assert!(!found[0].is_remote());
    }

    #[test]
    fn test_json_media_string_is_split() {
        let body = RecordBody::Json(json!({ "images": "b.jpg;c.jpg" }));
        assert_eq!(body.media_locations().len(), 2);
    }

    #[test]
    fn test_csv_media_cell_split() {
        let mut fields = BTreeMap::new();
        fields.insert(CanonicalField::Media, "img1.png | img2.png;".to_string());
        let found = RecordBody::Csv(fields).media_locations();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].location, "img2.png");
    }

    #[test]
    fn test_non_object_json_has_no_media() {
        assert!(RecordBody::Json(json!(42)).media_locations().is_empty());
    }
}
