//! ZIP bundles: one JSON or CSV manifest plus sibling media files.

use std::io::{self, Cursor, Read};
use std::sync::Arc;

use serde_json::Value;
use zip::result::ZipError;
use zip::ZipArchive;

use super::csv::{self, CsvLayout};
use super::json;
use super::record::{Attachment, RawRecord, RecordBody};
use crate::error::ParseError;

type Archive = ZipArchive<Cursor<Arc<[u8]>>>;

/// Manifest names preferred when a bundle carries more than one candidate.
const PREFERRED_MANIFESTS: [&str; 2] = ["manifest", "posts"];

#[derive(Debug, Clone)]
enum Manifest {
    Json(Vec<Value>),
    Csv { bytes: Vec<u8>, layout: CsvLayout },
}

#[derive(Debug, Clone)]
pub(crate) struct ZipBundle {
    archive: Archive,
    manifest: Manifest,
    /// Directory of the manifest inside the archive, with trailing `/`.
    base_dir: String,
    max_entry_bytes: u64,
}

fn is_ignored(name: &str) -> bool {
    name.starts_with("__MACOSX/")
        || name.ends_with('/')
        || name
            .rsplit('/')
            .next()
            .map(|file| file.starts_with('.'))
            .unwrap_or(true)
}

fn extension(name: &str) -> Option<String> {
    let file = name.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    Some(ext.to_lowercase())
}

fn stem(name: &str) -> String {
    let file = name.rsplit('/').next().unwrap_or(name);
    file.rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file)
        .to_lowercase()
}

fn pick_manifest(names: &[String]) -> Result<String, ParseError> {
    let candidates: Vec<&String> = names
        .iter()
        .filter(|name| !is_ignored(name))
        .filter(|name| matches!(extension(name).as_deref(), Some("json") | Some("csv")))
        .collect();

    match candidates.as_slice() {
        [] => Err(ParseError::MalformedArchive(
            "ZIP archive contains no JSON or CSV manifest".to_string(),
        )),
        [only] => Ok((*only).clone()),
        several => {
            let preferred: Vec<&&String> = several
                .iter()
                .filter(|name| PREFERRED_MANIFESTS.contains(&stem(name).as_str()))
                .collect();
            match preferred.as_slice() {
                [only] => Ok((**only).clone()),
                _ => Err(ParseError::MalformedArchive(format!(
                    "ZIP archive has {} candidate manifests; expected exactly one",
                    several.len()
                ))),
            }
        }
    }
}

/// Reads one entry, refusing to inflate it past `limit` bytes whatever size
/// the archive declares.
fn read_entry(
    archive: &mut Archive,
    name: &str,
    limit: u64,
) -> Result<Option<Vec<u8>>, ZipError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut bytes = Vec::with_capacity(entry.size().min(limit) as usize);
    (&mut entry).take(limit.saturating_add(1)).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > limit {
        return Err(ZipError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("entry expands beyond {} bytes", limit),
        )));
    }
    Ok(Some(bytes))
}

/// Joins a record's relative media path onto the manifest directory.
/// Returns `None` for paths that would escape the archive root.
fn resolve(base_dir: &str, location: &str) -> Option<String> {
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for part in location.trim_start_matches('/').split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

impl ZipBundle {
    pub(crate) fn open(bytes: Arc<[u8]>, max_entry_bytes: u64) -> Result<Self, ParseError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ParseError::MalformedArchive(format!("Invalid ZIP archive: {}", e)))?;

        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        let manifest_name = pick_manifest(&names)?;
        let manifest_bytes = read_entry(&mut archive, &manifest_name, max_entry_bytes)
            .map_err(|e| ParseError::MalformedArchive(format!("Unreadable manifest: {}", e)))?
            .ok_or_else(|| {
                ParseError::MalformedArchive(format!("Manifest {} vanished", manifest_name))
            })?;

        let manifest = match extension(&manifest_name).as_deref() {
            Some("csv") => {
                let layout = csv::inspect(&manifest_bytes)?;
                Manifest::Csv {
                    bytes: manifest_bytes,
                    layout,
                }
            }
            _ => Manifest::Json(json::load(&manifest_bytes)?),
        };

        let base_dir = manifest_name
            .rsplit_once('/')
            .map(|(dir, _)| format!("{}/", dir))
            .unwrap_or_default();

        log::debug!(
            "ZIP manifest {} selected out of {} entries",
            manifest_name,
            names.len()
        );

        Ok(Self {
            archive,
            manifest,
            base_dir,
            max_entry_bytes,
        })
    }

    pub(crate) fn record_count(&self) -> usize {
        match &self.manifest {
            Manifest::Json(items) => items.len(),
            Manifest::Csv { layout, .. } => layout.rows(),
        }
    }

    pub(crate) fn records(&self) -> Box<dyn Iterator<Item = RawRecord> + '_> {
        let mut archive = self.archive.clone();
        let base_dir = self.base_dir.as_str();
        let limit = self.max_entry_bytes;
        let inner: Box<dyn Iterator<Item = RawRecord> + '_> = match &self.manifest {
            Manifest::Json(items) => Box::new(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| RawRecord::new(index, RecordBody::Json(item.clone()))),
            ),
            Manifest::Csv { bytes, layout } => Box::new(csv::records(bytes, layout)),
        };

        Box::new(inner.map(move |mut record| {
            attach_media(&mut archive, base_dir, limit, &mut record);
            record
        }))
    }
}

fn attach_media(archive: &mut Archive, base_dir: &str, limit: u64, record: &mut RawRecord) {
    for media in record.body.media_locations() {
        if media.is_remote() || record.attachment(&media.location).is_some() {
            continue;
        }

        let found = resolve(base_dir, &media.location).and_then(|path| {
            match read_entry(archive, &path, limit) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("Unreadable archive entry {}: {}", path, e);
                    None
                }
            }
        });

        let attachment = match found {
            Some(bytes) => Attachment::Embedded {
                content_type: mime_guess::from_path(&media.location)
                    .first_or_octet_stream()
                    .to_string(),
                location: media.location,
                bytes,
            },
            None => Attachment::Missing {
                location: media.location,
            },
        };
        record.attachments.push(attachment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    const LIMIT: u64 = 1024 * 1024;

    fn build_zip(entries: &[(&str, &[u8])]) -> Arc<[u8]> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner().into()
    }

    #[test]
    fn test_resolve_relative_paths() {
        assert_eq!(resolve("export/", "img/1.png").as_deref(), Some("export/img/1.png"));
        assert_eq!(resolve("export/", "./1.png").as_deref(), Some("export/1.png"));
        assert_eq!(resolve("", "../1.png"), None);
        assert_eq!(resolve("export/", "../1.png").as_deref(), Some("1.png"));
    }

    #[test]
    fn test_embedded_and_missing_media() {
        let manifest = br#"[
            {"platform": "instagram", "id": "1", "text": "sunset", "media": ["img1.png"]},
            {"platform": "instagram", "id": "2", "text": "beach", "media": ["img2.png"]}
        ]"#;
        let bytes = build_zip(&[
            ("export/posts.json", manifest),
            ("export/img2.png", b"not really a png"),
        ]);

        let bundle = ZipBundle::open(bytes, LIMIT).unwrap();
        assert_eq!(bundle.record_count(), 2);

        let records: Vec<RawRecord> = bundle.records().collect();
        assert!(matches!(
            records[0].attachment("img1.png"),
            Some(Attachment::Missing { .. })
        ));
        match records[1].attachment("img2.png") {
            Some(Attachment::Embedded {
                content_type,
                bytes,
                ..
            }) => {
                assert_eq!(content_type, "image/png");
                assert_eq!(bytes.as_slice(), b"not really a png");
            }
            other => panic!("unexpected attachment: {other:?}"),
        }
    }

    #[test]
    fn test_csv_manifest() {
        let bytes = build_zip(&[
            ("posts.csv", b"platform,id,text,media\ntwitter,9,hi,a.jpg\n"),
            ("a.jpg", b"jpeg"),
        ]);
        let bundle = ZipBundle::open(bytes, LIMIT).unwrap();
        let records: Vec<RawRecord> = bundle.records().collect();
        assert_eq!(records.len(), 1);
        assert!(matches!(
            records[0].attachment("a.jpg"),
            Some(Attachment::Embedded { .. })
        ));
    }

    #[test]
    fn test_manifest_selection() {
        let hidden_ignored = build_zip(&[
            ("__MACOSX/._posts.json", b"junk"),
            (".meta.json", b"{}"),
            ("data.json", b"[]"),
        ]);
        assert!(ZipBundle::open(hidden_ignored, LIMIT).is_ok());

        let preferred = build_zip(&[("manifest.json", b"[]"), ("other.csv", b"a,b\n")]);
        assert!(ZipBundle::open(preferred, LIMIT).is_ok());

        let ambiguous = build_zip(&[("a.json", b"[]"), ("b.json", b"[]")]);
        assert!(matches!(
            ZipBundle::open(ambiguous, LIMIT),
            Err(ParseError::MalformedArchive(_))
        ));

        let none = build_zip(&[("img.png", b"png")]);
        assert!(matches!(
            ZipBundle::open(none, LIMIT),
            Err(ParseError::MalformedArchive(_))
        ));
    }

    #[test]
    fn test_not_a_zip() {
        let bytes: Arc<[u8]> = Arc::from(b"plain text".as_slice());
        assert!(matches!(
            ZipBundle::open(bytes, LIMIT),
            Err(ParseError::MalformedArchive(_))
        ));
    }

    #[test]
    fn test_manifest_expanding_past_limit_is_rejected() {
        let mut manifest = br#"[{"platform": "twitter", "id": "1", "text": ""#.to_vec();
        manifest.extend(std::iter::repeat(b'a').take(4096));
        manifest.extend_from_slice(br#""}]"#);
        let bytes = build_zip(&[("posts.json", manifest.as_slice())]);

        match ZipBundle::open(bytes, 1024) {
            Err(ParseError::MalformedArchive(message)) => {
                assert!(message.contains("expands beyond 1024 bytes"), "{message}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_media_expanding_past_limit_is_missing() {
        let manifest = br#"[{"platform": "instagram", "id": "1", "text": "hi", "media": ["big.png"]}]"#;
        let big = vec![0u8; 64 * 1024];
        let bytes = build_zip(&[("posts.json", manifest.as_slice()), ("big.png", big.as_slice())]);

        let bundle = ZipBundle::open(bytes, 1024).unwrap();
        let records: Vec<RawRecord> = bundle.records().collect();
        assert!(matches!(
            records[0].attachment("big.png"),
            Some(Attachment::Missing { .. })
        ));
    }
}
