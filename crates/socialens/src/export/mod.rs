//! CSV and JSON rendering of Posts matching an aggregate query.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::SecondsFormat;
use serde_json::{Map, Value};

use crate::aggregator::AggregateQuery;
use crate::error::ExportError;
use crate::model::Post;
use crate::store::PostStore;

/// Separator for list fields in CSV cells.
const LIST_SEPARATOR: &str = ", ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "csv"),
            ExportFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportField {
    PostId,
    UploadId,
    Platform,
    SourceId,
    UserId,
    RawText,
    CleanedText,
    Language,
    Sentiment,
    Entities,
    Timestamp,
    TimestampInferred,
    MediaCount,
    MediaTags,
    MissingMedia,
    EnrichmentState,
    FailedStage,
}

/// Columns written when the caller does not choose.
pub const DEFAULT_FIELDS: [ExportField; 10] = [
    ExportField::PostId,
    ExportField::Platform,
    ExportField::RawText,
    ExportField::CleanedText,
    ExportField::Language,
    ExportField::Timestamp,
    ExportField::UserId,
    ExportField::Sentiment,
    ExportField::Entities,
    ExportField::MediaCount,
];

impl ExportField {
    pub const ALL: [ExportField; 17] = [
        ExportField::PostId,
        ExportField::UploadId,
        ExportField::Platform,
        ExportField::SourceId,
        ExportField::UserId,
        ExportField::RawText,
        ExportField::CleanedText,
        ExportField::Language,
        ExportField::Sentiment,
        ExportField::Entities,
        ExportField::Timestamp,
        ExportField::TimestampInferred,
        ExportField::MediaCount,
        ExportField::MediaTags,
        ExportField::MissingMedia,
        ExportField::EnrichmentState,
        ExportField::FailedStage,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ExportField::PostId => "post_id",
            ExportField::UploadId => "upload_id",
            ExportField::Platform => "platform",
            ExportField::SourceId => "source_id",
            ExportField::UserId => "user_id",
            ExportField::RawText => "raw_text",
            ExportField::CleanedText => "cleaned_text",
            ExportField::Language => "language",
            ExportField::Sentiment => "sentiment",
            ExportField::Entities => "entities",
            ExportField::Timestamp => "timestamp",
            ExportField::TimestampInferred => "timestamp_inferred",
            ExportField::MediaCount => "media_count",
            ExportField::MediaTags => "media_tags",
            ExportField::MissingMedia => "missing_media",
            ExportField::EnrichmentState => "enrichment_state",
            ExportField::FailedStage => "failed_stage",
        }
    }

    pub fn parse(name: &str) -> Result<Self, ExportError> {
        let wanted = name.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|field| field.name() == wanted)
            .ok_or_else(|| ExportError::UnknownField(name.to_string()))
    }

    /// Parses a caller-chosen field list; `None` or empty gives the defaults.
    pub fn parse_list(names: Option<&[String]>) -> Result<Vec<Self>, ExportError> {
        match names {
            Some(names) if !names.is_empty() => names.iter().map(|n| Self::parse(n)).collect(),
            _ => Ok(DEFAULT_FIELDS.to_vec()),
        }
    }

    fn media_tags(post: &Post) -> Vec<String> {
        post.media.iter().flat_map(|m| m.tags.iter().cloned()).collect()
    }

    fn json_value(&self, post: &Post) -> Value {
        let optional = |value: Option<&str>| value.map_or(Value::Null, |v| Value::String(v.to_string()));
        match self {
            ExportField::PostId => Value::String(post.id.to_string()),
            ExportField::UploadId => Value::String(post.upload_id.to_string()),
            ExportField::Platform => Value::String(post.platform.to_string()),
            ExportField::SourceId => Value::String(post.source_id.clone()),
            ExportField::UserId => optional(post.user_id.as_deref()),
            ExportField::RawText => Value::String(post.raw_text.clone()),
            ExportField::CleanedText => optional(post.cleaned_text.as_deref()),
            ExportField::Language => optional(post.language.as_deref()),
            ExportField::Sentiment => optional(post.sentiment.map(|s| s.as_str())),
            ExportField::Entities => Value::from(post.entities.clone()),
            ExportField::Timestamp => Value::String(timestamp(post)),
            ExportField::TimestampInferred => Value::Bool(post.timestamp_inferred),
            ExportField::MediaCount => Value::from(post.media.len()),
            ExportField::MediaTags => Value::from(Self::media_tags(post)),
            ExportField::MissingMedia => Value::Bool(post.missing_media),
            ExportField::EnrichmentState => Value::String(post.enrichment_state.to_string()),
            ExportField::FailedStage => optional(post.failed_stage.map(|s| s.as_str())),
        }
    }

    fn csv_cell(&self, post: &Post) -> String {
        match self.json_value(post) {
            Value::Null => String::new(),
            Value::String(s) => s,
            Value::Array(items) => items
                .iter()
                .filter_map(|item| item.as_str())
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR),
            other => other.to_string(),
        }
    }
}

fn timestamp(post: &Post) -> String {
    post.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Renders `posts` with the given columns, in order.
pub fn render(posts: &[Post], format: ExportFormat, fields: &[ExportField]) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer.write_record(fields.iter().map(|f| f.name()))?;
            for post in posts {
                writer.write_record(fields.iter().map(|f| f.csv_cell(post)))?;
            }
            writer
                .into_inner()
                .map_err(|e| ExportError::Csv(e.into_error().into()))
        }
        ExportFormat::Json => {
            let rows: Vec<Value> = posts
                .iter()
                .map(|post| {
                    let row: Map<String, Value> = fields
                        .iter()
                        .map(|f| (f.name().to_string(), f.json_value(post)))
                        .collect();
                    Value::Object(row)
                })
                .collect();
            Ok(serde_json::to_vec_pretty(&rows)?)
        }
    }
}

pub struct Exporter {
    posts: Arc<dyn PostStore>,
}

impl Exporter {
    pub fn new(posts: Arc<dyn PostStore>) -> Self {
        Self { posts }
    }

    /// Reads every Post matching `query` and renders it. Unknown field
    /// names fail before anything is read.
    pub fn export(
        &self,
        query: &AggregateQuery,
        format: ExportFormat,
        fields: Option<&[String]>,
    ) -> Result<Vec<u8>, ExportError> {
        let fields = ExportField::parse_list(fields)?;
        let posts = self.posts.query(&query.to_filter())?;
        log::info!("Exporting {} posts as {}", posts.len(), format);
        render(&posts, format, &fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::testing::sample_post;
    use crate::model::Sentiment;

    fn enriched() -> Post {
        let mut post = sample_post("Loving the #rust meetup");
        post.cleaned_text = Some("Loving the rust meetup".to_string());
        post.sentiment = Some(Sentiment::Positive);
        post.entities = vec!["rust".to_string(), "Meetup Group".to_string()];
        post
    }

    #[test]
    fn test_csv_default_fields() {
        let bytes = render(&[enriched()], ExportFormat::Csv, &DEFAULT_FIELDS).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next().unwrap(),
            "post_id,platform,raw_text,cleaned_text,language,timestamp,user_id,sentiment,entities,media_count"
        );
        let row = lines.next().unwrap();
        assert!(row.contains("twitter"));
        assert!(row.contains("\"rust, Meetup Group\""));
        assert!(row.ends_with(",positive,\"rust, Meetup Group\",0"));
    }

    #[test]
    fn test_csv_without_matches_has_only_header() {
        let bytes = render(&[], ExportFormat::Csv, &[ExportField::PostId, ExportField::Platform]).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "post_id,platform\n");
    }

    #[test]
    fn test_json_uses_native_types() {
        let bytes = render(&[enriched()], ExportFormat::Json, &DEFAULT_FIELDS).unwrap();
        let rows: Vec<Value> = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["entities"], serde_json::json!(["rust", "Meetup Group"]));
        assert_eq!(rows[0]["media_count"], 0);
        assert_eq!(rows[0]["language"], Value::Null);
    }

    #[test]
    fn test_json_without_matches_is_empty_array() {
        let bytes = render(&[], ExportFormat::Json, &DEFAULT_FIELDS).unwrap();
        let rows: Vec<Value> = serde_json::from_slice(&bytes).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_field_selection() {
        let names = vec!["post_id".to_string(), "Sentiment".to_string()];
        let fields = ExportField::parse_list(Some(&names)).unwrap();
        assert_eq!(fields, vec![ExportField::PostId, ExportField::Sentiment]);

        let bad = vec!["password".to_string()];
        assert!(matches!(
            ExportField::parse_list(Some(&bad)),
            Err(ExportError::UnknownField(name)) if name == "password"
        ));
        assert_eq!(ExportField::parse_list(None).unwrap(), DEFAULT_FIELDS.to_vec());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
