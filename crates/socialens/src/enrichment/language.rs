use std::collections::HashSet;
use std::sync::LazyLock;

use super::EnrichmentStage;
use crate::error::StageError;
use crate::model::{PartialPostUpdate, Post, StageName, StageOutput};

/// Minimum stop-word hits before a language is reported.
const MIN_SCORE: usize = 2;

const STOPWORDS: [(&str, &[&str]); 6] = [
    (
        "en",
        &[
            "the", "and", "is", "are", "was", "this", "that", "with", "for", "you", "not", "have",
            "it", "of", "to", "in", "my", "on", "so", "just",
        ],
    ),
    (
        "es",
        &[
            "el", "la", "los", "las", "que", "y", "es", "con", "por", "para", "una", "un", "del",
            "muy", "pero", "como", "está", "mi",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "et", "est", "des", "une", "un", "que", "pour", "avec", "pas",
            "dans", "ce", "je", "très", "mais", "du",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "und", "ist", "nicht", "mit", "ein", "eine", "ich", "auf", "für",
            "sehr", "aber", "zu", "den",
        ],
    ),
    (
        "pt",
        &[
            "o", "os", "as", "que", "e", "é", "com", "não", "uma", "um", "para", "muito", "mas",
            "do", "da", "em",
        ],
    ),
    (
        "it",
        &[
            "il", "lo", "gli", "che", "e", "è", "con", "non", "una", "un", "per", "molto", "ma",
            "del", "della", "sono",
        ],
    ),
];

static STOPWORD_SETS: LazyLock<Vec<(&'static str, HashSet<&'static str>)>> = LazyLock::new(|| {
    STOPWORDS
        .iter()
        .map(|(code, words)| (*code, words.iter().copied().collect()))
        .collect()
});

/// Scores text against per-language stop words. Returns `None` unless one
/// language clearly wins.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();

    let mut scores: Vec<(&'static str, usize)> = STOPWORD_SETS
        .iter()
        .map(|(code, set)| {
            let hits = words.iter().filter(|w| set.contains(w.as_str())).count();
            (*code, hits)
        })
        .collect();
    // Stable: equal scores keep table order.
    scores.sort_by(|a, b| b.1.cmp(&a.1));

    match scores.as_slice() {
        [(code, best), (_, runner_up), ..] if *best >= MIN_SCORE && best > runner_up => {
            Some(*code)
        }
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct LanguageDetector;

impl EnrichmentStage for LanguageDetector {
    fn name(&self) -> StageName {
        StageName::LanguageDetection
    }

    fn enrich(&self, post: &Post) -> Result<PartialPostUpdate, StageError> {
        let text = post.cleaned_text.as_deref().unwrap_or(&post.raw_text);
        Ok(PartialPostUpdate::single(StageOutput::Language(
            detect_language(text).map(str::to_string),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_common_languages() {
        assert_eq!(
            detect_language("This is the best day and I love it"),
            Some("en")
        );
        assert_eq!(
            detect_language("El concierto de anoche fue muy bueno para los fans"),
            Some("es")
        );
        assert_eq!(
            detect_language("Je suis très content avec les résultats"),
            Some("fr")
        );
        assert_eq!(
            detect_language("Das Wetter ist heute nicht sehr gut"),
            Some("de")
        );
    }

    #[test]
    fn test_no_confident_match() {
        assert_eq!(detect_language(""), None);
        assert_eq!(detect_language("Rust 1.80 released"), None);
    }
}
