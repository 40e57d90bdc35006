//! CSV manifests: one header row, one post per row.

use std::collections::BTreeMap;

use super::record::{CanonicalField, RawRecord, RecordBody};
use crate::error::ParseError;

/// Columns without which a CSV cannot describe a post.
const REQUIRED_COLUMNS: [CanonicalField; 2] = [CanonicalField::Platform, CanonicalField::PostId];

/// Header mapping and row count established by the validation pass.
#[derive(Debug, Clone)]
pub(crate) struct CsvLayout {
    /// Canonical field of each column position. Unknown columns are `None`.
    columns: Vec<Option<CanonicalField>>,
    rows: usize,
}

impl CsvLayout {
    pub(crate) fn rows(&self) -> usize {
        self.rows
    }
}

fn reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes)
}

/// Validates the whole file structurally without keeping the rows.
pub(crate) fn inspect(bytes: &[u8]) -> Result<CsvLayout, ParseError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(bytes);
    let mut rdr = reader(bytes);

    let headers = rdr
        .headers()
        .map_err(|e| ParseError::MalformedArchive(format!("Unreadable CSV header: {}", e)))?
        .clone();

    let mut columns = Vec::with_capacity(headers.len());
    for header in headers.iter() {
        let field = CanonicalField::from_name(header);
        // A repeated canonical column keeps its first position.
        if field.is_some() && columns.contains(&field) {
            columns.push(None);
        } else {
            columns.push(field);
        }
    }

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .filter(|required| !columns.contains(&Some(**required)))
        .map(|required| required.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(ParseError::MalformedArchive(format!(
            "CSV header is missing required column(s): {}",
            missing.join(", ")
        )));
    }

    let mut rows = 0;
    for result in rdr.records() {
        result.map_err(|e| ParseError::MalformedArchive(format!("Invalid CSV row: {}", e)))?;
        rows += 1;
    }

    Ok(CsvLayout { columns, rows })
}

/// Re-reads the rows lazily. Only call on bytes that passed [`inspect`].
pub(crate) fn records<'a>(
    bytes: &'a [u8],
    layout: &'a CsvLayout,
) -> impl Iterator<Item = RawRecord> + 'a {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(bytes);
    reader(bytes)
        .into_records()
        .enumerate()
        .filter_map(move |(index, result)| match result {
            Ok(row) => {
                let mut fields = BTreeMap::new();
                for (column, cell) in layout.columns.iter().zip(row.iter()) {
                    if let Some(field) = column {
                        if !cell.is_empty() {
                            fields.insert(*field, cell.to_string());
                        }
                    }
                }
                Some(RawRecord::new(index, RecordBody::Csv(fields)))
            }
            Err(e) => {
                log::warn!("Skipping unreadable CSV row {}: {}", index, e);
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_maps_aliases_and_counts_rows() {
        let data = b"Platform,tweet_id,text,likes\ntwitter,1,hello,3\ntwitter,2,,0\n";
        let layout = inspect(data).unwrap();
        assert_eq!(layout.rows(), 2);

        let rows: Vec<RawRecord> = records(data, &layout).collect();
        assert_eq!(rows.len(), 2);
        let RecordBody::Csv(first) = &rows[0].body else {
            panic!("expected a CSV body");
        };
        assert_eq!(first.get(&CanonicalField::RawText).map(String::as_str), Some("hello"));
        assert_eq!(first.len(), 3);

        let RecordBody::Csv(second) = &rows[1].body else {
            panic!("expected a CSV body");
        };
        assert!(!second.contains_key(&CanonicalField::RawText));
        assert_eq!(rows[1].index, 1);
    }

    #[test]
    fn test_missing_platform_column_is_malformed() {
        let err = inspect(b"id,text\n1,hello\n").unwrap_err();
        match err {
            ParseError::MalformedArchive(message) => assert!(message.contains("platform")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_ragged_row_is_malformed() {
        let result = inspect(b"platform,id,text\ntwitter,1\n");
        assert!(matches!(result, Err(ParseError::MalformedArchive(_))));
    }

    #[test]
    fn test_records_are_restartable() {
        let data = b"platform,id\nx,1\nx,2\n";
        let layout = inspect(data).unwrap();
        assert_eq!(records(data, &layout).count(), 2);
        assert_eq!(records(data, &layout).count(), 2);
    }
}
