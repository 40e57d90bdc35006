use serde_json::Value;

use crate::error::ParseError;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Reads a JSON document that is either an array of posts or an object
/// with a `posts` array.
pub(crate) fn load(bytes: &[u8]) -> Result<Vec<Value>, ParseError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let document: Value = serde_json::from_slice(bytes)
        .map_err(|e| ParseError::MalformedArchive(format!("Invalid JSON: {}", e)))?;

    match document {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("posts") {
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(ParseError::MalformedArchive(
                "`posts` field is not an array".to_string(),
            )),
            None => Err(ParseError::MalformedArchive(
                "JSON object has no `posts` array".to_string(),
            )),
        },
        _ => Err(ParseError::MalformedArchive(
            "Expected a JSON array or an object with a `posts` array".to_string(),
        )),
    }
}
