use std::sync::LazyLock;

use regex::Regex;

use super::EnrichmentStage;
use crate::error::StageError;
use crate::model::{PartialPostUpdate, Post, StageName, StageOutput};

static RE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").unwrap());
static RE_MENTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@\w+").unwrap());
static RE_HASHTAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\w+)").unwrap());
static RE_EMOJI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        "[",
        r"\x{1F1E6}-\x{1F1FF}",
        r"\x{1F300}-\x{1F5FF}",
        r"\x{1F600}-\x{1F64F}",
        r"\x{1F680}-\x{1F6FF}",
        r"\x{1F900}-\x{1FAFF}",
        r"\x{2600}-\x{27BF}",
        r"\x{FE0F}\x{200D}",
        "]+"
    ))
    .unwrap()
});
static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Strips URLs, mentions, hashtag marks and emoji, then collapses whitespace.
pub fn clean_text(text: &str) -> String {
    let text = RE_URL.replace_all(text, " ");
    let text = RE_MENTION.replace_all(&text, " ");
    let text = RE_HASHTAG.replace_all(&text, "$1");
    let text = RE_EMOJI.replace_all(&text, " ");
    RE_WHITESPACE.replace_all(&text, " ").trim().to_string()
}

#[derive(Debug, Default)]
pub struct TextCleaner;

impl EnrichmentStage for TextCleaner {
    fn name(&self) -> StageName {
        StageName::TextCleaning
    }

    fn enrich(&self, post: &Post) -> Result<PartialPostUpdate, StageError> {
        Ok(PartialPostUpdate::single(StageOutput::CleanedText(
            clean_text(&post.raw_text),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_urls_mentions_and_emoji() {
        assert_eq!(
            clean_text("Check this 🚀 https://example.com/x?y=1 @bob   now!"),
            "Check this now!"
        );
    }

    #[test]
    fn test_keeps_hashtag_words() {
        assert_eq!(clean_text("Loving #RustLang today"), "Loving RustLang today");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(clean_text("  a\n\n b\t c  "), "a b c");
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn test_keeps_non_latin_text() {
        assert_eq!(clean_text("こんにちは 世界"), "こんにちは 世界");
        assert_eq!(clean_text("café crème"), "café crème");
    }
}
