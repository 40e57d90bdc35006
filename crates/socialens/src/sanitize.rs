//! Helpers for keeping upload content out of logs and span attributes.
//!
//! Uploaded archives carry other people's posts; logs get the shape of the
//! data, not the data.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Characters of post text allowed into a log line.
pub const PREVIEW_CHARS: usize = 40;

/// Returns only the final component of a client-supplied filename, with
/// either path separator.
pub fn redact_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if last.is_empty() || last == "." || last == ".." {
        return "<unnamed>".to_string();
    }
    Path::new(last)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unnamed>")
        .to_string()
}

/// First [`PREVIEW_CHARS`] characters of `text` on one line, with an
/// ellipsis when cut.
pub fn preview(text: &str) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    cut.push('…');
    cut
}

/// Short deterministic hash of an author id, for correlating log lines
/// without printing the id.
pub fn hash_user(user_id: &str) -> String {
    let mut hasher = DefaultHasher::new();
    user_id.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
