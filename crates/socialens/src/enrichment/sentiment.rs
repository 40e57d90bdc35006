use super::EnrichmentStage;
use crate::error::StageError;
use crate::model::{PartialPostUpdate, Post, Sentiment, StageName, StageOutput};

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "awesome", "love", "loved", "loving", "happy", "excellent", "amazing",
    "fantastic", "wonderful", "best", "nice", "beautiful", "enjoy", "enjoyed", "fun", "glad",
    "perfect", "recommend", "thanks", "cool", "delicious", "brilliant",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "hate", "hated", "awful", "sad", "disappointing", "disappointed", "worst",
    "horrible", "poor", "angry", "broken", "boring", "ugly", "annoying", "fail", "failed",
    "useless", "sucks", "waste", "slow", "wrong", "sick",
];

/// Tokens that flip the polarity of a sentiment word shortly after them.
/// Contractions arrive split, so `don't` shows up as `don`.
const NEGATORS: &[&str] = &[
    "not", "no", "never", "nothing", "cannot", "don", "doesn", "didn", "isn", "wasn", "aren",
    "won", "can",
];

/// How many tokens a negator reaches.
const NEGATION_WINDOW: usize = 3;

pub fn classify(text: &str) -> Sentiment {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect();

    let mut positive = 0usize;
    let mut negative = 0usize;
    let mut negated_until: Option<usize> = None;

    for (i, token) in tokens.iter().enumerate() {
        let token = token.as_str();
        // `can` and `won` only negate as part of `can't` and `won't`.
        let is_negator = NEGATORS.contains(&token)
            && (!matches!(token, "can" | "won")
                || tokens.get(i + 1).map(String::as_str) == Some("t"));
        if is_negator {
            negated_until = Some(i + NEGATION_WINDOW);
            continue;
        }

        let negated = negated_until.is_some_and(|end| i <= end);
        let polarity = if POSITIVE_WORDS.contains(&token) {
            Some(true)
        } else if NEGATIVE_WORDS.contains(&token) {
            Some(false)
        } else {
            None
        };

        match polarity.map(|p| p != negated) {
            Some(true) => positive += 1,
            Some(false) => negative += 1,
            None => {}
        }
        if polarity.is_some() {
            negated_until = None;
        }
    }

    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}

#[derive(Debug, Default)]
pub struct SentimentClassifier;

impl EnrichmentStage for SentimentClassifier {
    fn name(&self) -> StageName {
        StageName::Sentiment
    }

    fn enrich(&self, post: &Post) -> Result<PartialPostUpdate, StageError> {
        let text = post.cleaned_text.as_deref().unwrap_or(&post.raw_text);
        Ok(PartialPostUpdate::single(StageOutput::Sentiment(classify(
            text,
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polarity() {
        assert_eq!(classify("I love this, it is awesome"), Sentiment::Positive);
        assert_eq!(classify("Worst service, terrible food"), Sentiment::Negative);
        assert_eq!(classify("The train leaves at noon"), Sentiment::Neutral);
        assert_eq!(classify(""), Sentiment::Neutral);
    }

    #[test]
    fn test_mixed_text_is_neutral() {
        assert_eq!(classify("good start but bad ending"), Sentiment::Neutral);
    }

    #[test]
    fn test_negation_flips() {
        assert_eq!(classify("This is not good"), Sentiment::Negative);
        assert_eq!(classify("I don't hate it"), Sentiment::Positive);
        assert_eq!(classify("can't complain, not bad at all"), Sentiment::Positive);
    }

    #[test]
    fn test_won_negates_only_as_contraction() {
        assert_eq!(classify("I won, great day"), Sentiment::Positive);
        assert_eq!(classify("We won the final, best team ever"), Sentiment::Positive);
        assert_eq!(classify("I won't enjoy this"), Sentiment::Negative);
    }

    #[test]
    fn test_whole_words_only() {
        // `badge` must not count as `bad`.
        assert_eq!(classify("Got my badge"), Sentiment::Neutral);
    }
}
