//! Format parsing: uploaded bytes to a restartable sequence of raw records.
//!
//! Structural problems with the file as a whole surface as [`ParseError`]
//! before any record is produced. Problems with individual records are left
//! for the normalizer to classify.

use std::sync::Arc;

use serde_json::Value;

use crate::error::ParseError;

mod csv;
mod json;
pub mod record;
mod zip;

pub use record::{Attachment, CanonicalField, MediaLocation, RawRecord, RecordBody};

use self::csv::CsvLayout;
use self::zip::ZipBundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Json,
    Csv,
    Zip,
}

impl ArchiveFormat {
    /// Picks the format from the declared MIME type, falling back to the
    /// file extension when the MIME type is absent or generic.
    pub fn detect(filename: &str, declared_mime: Option<&str>) -> Result<Self, ParseError> {
        if let Some(mime) = declared_mime {
            let essence = mime
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_lowercase();
            match essence.as_str() {
                "application/json" | "text/json" => return Ok(ArchiveFormat::Json),
                "text/csv" | "application/csv" | "text/comma-separated-values" => {
                    return Ok(ArchiveFormat::Csv)
                }
                "application/zip" | "application/x-zip-compressed" | "multipart/x-zip" => {
                    return Ok(ArchiveFormat::Zip)
                }
                "" | "application/octet-stream" => {}
                other => return Err(ParseError::UnsupportedFormat(other.to_string())),
            }
        }

        let ext = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        match ext.as_deref() {
            Some("json") => Ok(ArchiveFormat::Json),
            Some("csv") => Ok(ArchiveFormat::Csv),
            Some("zip") => Ok(ArchiveFormat::Zip),
            _ => Err(ParseError::UnsupportedFormat(format!(
                "{} ({})",
                filename,
                declared_mime.unwrap_or("no content type")
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveFormat::Json => "json",
            ArchiveFormat::Csv => "csv",
            ArchiveFormat::Zip => "zip",
        }
    }
}

#[derive(Debug, Clone)]
enum Content {
    Json(Vec<Value>),
    Csv { bytes: Arc<[u8]>, layout: CsvLayout },
    Zip(ZipBundle),
}

/// A structurally valid upload. Iterate it with [`ParsedArchive::records`]
/// as many times as needed.
#[derive(Debug, Clone)]
pub struct ParsedArchive {
    format: ArchiveFormat,
    content: Content,
}

impl ParsedArchive {
    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Number of records the parse pass found.
    pub fn record_count(&self) -> usize {
        match &self.content {
            Content::Json(items) => items.len(),
            Content::Csv { layout, .. } => layout.rows(),
            Content::Zip(bundle) => bundle.record_count(),
        }
    }

    /// A fresh pass over the records, in archive order.
    pub fn records(&self) -> Box<dyn Iterator<Item = RawRecord> + '_> {
        match &self.content {
            Content::Json(items) => Box::new(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| RawRecord::new(index, RecordBody::Json(item.clone()))),
            ),
            Content::Csv { bytes, layout } => Box::new(self::csv::records(bytes, layout)),
            Content::Zip(bundle) => bundle.records(),
        }
    }
}

/// Validates the upload structurally and prepares it for iteration.
///
/// `max_entry_bytes` caps how far any single ZIP entry may expand.
pub fn parse(
    filename: &str,
    declared_mime: Option<&str>,
    bytes: Arc<[u8]>,
    max_entry_bytes: u64,
) -> Result<ParsedArchive, ParseError> {
    let format = ArchiveFormat::detect(filename, declared_mime)?;
    let content = match format {
        ArchiveFormat::Json => Content::Json(json::load(&bytes)?),
        ArchiveFormat::Csv => {
            let layout = self::csv::inspect(&bytes)?;
            Content::Csv { bytes, layout }
        }
        ArchiveFormat::Zip => Content::Zip(ZipBundle::open(bytes, max_entry_bytes)?),
    };

    let archive = ParsedArchive { format, content };
    log::debug!(
        "Parsed {} upload with {} records",
        format.as_str(),
        archive.record_count()
    );
    Ok(archive)
}
