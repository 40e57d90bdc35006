use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::EnrichmentStage;
use crate::error::StageError;
use crate::model::{PartialPostUpdate, Post, StageName, StageOutput};

static RE_HASHTAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\w{2,})").unwrap());

/// Pulls hashtags, capitalized names and configured topic keywords.
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    keywords: Vec<String>,
}

impl EntityExtractor {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn extract(&self, raw_text: &str, text: &str) -> Vec<String> {
        let mut found = Vec::new();

        for caps in RE_HASHTAG.captures_iter(raw_text) {
            found.push(caps[1].to_string());
        }
        found.extend(capitalized_spans(raw_text));

        let words: HashSet<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        for keyword in &self.keywords {
            if words.contains(keyword) {
                found.push(keyword.clone());
            }
        }

        dedup_case_insensitive(found)
    }
}

/// Hashtags, mentions and links end a name run and never join one.
fn is_span_break(token: &str) -> bool {
    token.starts_with(['#', '@'])
        || token.contains("://")
        || token.to_ascii_lowercase().starts_with("www.")
}

/// Runs of capitalized words in the raw text. A lone capitalized word that
/// opens a sentence is ordinary sentence case and is left out.
fn capitalized_spans(text: &str) -> Vec<String> {
    let mut spans = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut run_at_sentence_start = false;
    let mut sentence_start = true;

    let mut flush = |current: &mut Vec<&str>, at_start: bool| {
        let keep = current.len() >= 2 || (current.len() == 1 && !at_start);
        if keep {
            spans.push(current.join(" "));
        }
        current.clear();
    };

    for raw in text.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
        let capitalized = !is_span_break(raw)
            && word.chars().count() > 1
            && word.chars().next().is_some_and(char::is_uppercase);

        if capitalized {
            if current.is_empty() {
                run_at_sentence_start = sentence_start;
            }
            current.push(word);
        } else {
            flush(&mut current, run_at_sentence_start);
        }

        let ends_sentence = raw.ends_with(['.', '!', '?']);
        if ends_sentence || raw.ends_with([',', ';', ':']) {
            flush(&mut current, run_at_sentence_start);
        }
        sentence_start = ends_sentence;
    }
    flush(&mut current, run_at_sentence_start);

    spans
}

fn dedup_case_insensitive(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.to_lowercase()))
        .collect()
}

impl EnrichmentStage for EntityExtractor {
    fn name(&self) -> StageName {
        StageName::EntityExtraction
    }

    fn enrich(&self, post: &Post) -> Result<PartialPostUpdate, StageError> {
        let text = post.cleaned_text.as_deref().unwrap_or(&post.raw_text);
        Ok(PartialPostUpdate::single(StageOutput::Entities(
            self.extract(&post.raw_text, text),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> EntityExtractor {
        EntityExtractor::new(&["tech".to_string(), "Travel".to_string()])
    }

    #[test]
    fn test_hashtags_names_and_keywords() {
        let raw = "Flying to New York with Jane Doe next week #travel #RustConf";
        let clean = "Flying to New York with Jane Doe next week travel RustConf";
        assert_eq!(
            extractor().extract(raw, clean),
            vec!["travel", "RustConf", "New York", "Jane Doe"]
        );
    }

    #[test]
    fn test_sentence_initial_word_is_not_a_name() {
        let text = "Today was fine. Tomorrow we visit Berlin.";
        assert_eq!(extractor().extract(text, text), vec!["Berlin"]);
    }

    #[test]
    fn test_multi_word_name_at_sentence_start() {
        let text = "San Francisco is foggy";
        assert_eq!(extractor().extract(text, text), vec!["San Francisco"]);
    }

    #[test]
    fn test_dedup_is_case_insensitive() {
        let raw = "#Tech news: big tech day";
        assert_eq!(extractor().extract(raw, raw), vec!["Tech"]);
    }

    #[test]
    fn test_hashtag_does_not_join_preceding_name() {
        let raw = "Meetup with Ada Lovelace #RustConf";
        let clean = "Meetup with Ada Lovelace RustConf";
        assert_eq!(
            extractor().extract(raw, clean),
            vec!["RustConf", "Ada Lovelace"]
        );
    }

    #[test]
    fn test_mentions_and_links_split_names() {
        let raw = "We thank Grace Hopper @Navy https://Example.com and Alan Turing today";
        assert_eq!(
            extractor().extract(raw, raw),
            vec!["Grace Hopper", "Alan Turing"]
        );
    }

    #[test]
    fn test_empty_text() {
        assert!(extractor().extract("", "").is_empty());
    }
}
