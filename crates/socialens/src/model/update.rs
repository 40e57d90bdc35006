use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::post::{Post, Sentiment};

/// Enrichment stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    TextCleaning,
    LanguageDetection,
    Sentiment,
    EntityExtraction,
    MediaTagging,
}

impl StageName {
    pub const ALL: [StageName; 5] = [
        StageName::TextCleaning,
        StageName::LanguageDetection,
        StageName::Sentiment,
        StageName::EntityExtraction,
        StageName::MediaTagging,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::TextCleaning => "text_cleaning",
            StageName::LanguageDetection => "language_detection",
            StageName::Sentiment => "sentiment",
            StageName::EntityExtraction => "entity_extraction",
            StageName::MediaTagging => "media_tagging",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == tag)
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tags and caption produced for one media reference, addressed by its
/// position in `Post::media`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAnnotation {
    pub index: usize,
    pub tags: Vec<String>,
    pub caption: Option<String>,
}

/// The fields a single stage owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "value", rename_all = "snake_case")]
pub enum StageOutput {
    CleanedText(String),
    Language(Option<String>),
    Sentiment(Sentiment),
    Entities(Vec<String>),
    Media(Vec<MediaAnnotation>),
}

impl StageOutput {
    /// The only stage allowed to produce this output.
    pub fn owner(&self) -> StageName {
        match self {
            StageOutput::CleanedText(_) => StageName::TextCleaning,
            StageOutput::Language(_) => StageName::LanguageDetection,
            StageOutput::Sentiment(_) => StageName::Sentiment,
            StageOutput::Entities(_) => StageName::EntityExtraction,
            StageOutput::Media(_) => StageName::MediaTagging,
        }
    }

    fn apply_to(&self, post: &mut Post) {
        match self {
            StageOutput::CleanedText(text) => post.cleaned_text = Some(text.clone()),
            StageOutput::Language(language) => post.language = language.clone(),
            StageOutput::Sentiment(sentiment) => post.sentiment = Some(*sentiment),
            StageOutput::Entities(entities) => post.entities = entities.clone(),
            StageOutput::Media(annotations) => {
                for annotation in annotations {
                    if let Some(media) = post.media.get_mut(annotation.index) {
                        media.tags = annotation.tags.clone();
                        media.caption = annotation.caption.clone();
                    }
                }
            }
        }
    }
}

/// The subset of Post fields produced by one or more stages.
///
/// Outputs are keyed by stage, so merging or re-applying an update
/// overwrites each stage's fields instead of appending to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialPostUpdate {
    outputs: BTreeMap<StageName, StageOutput>,
}

impl PartialPostUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(output: StageOutput) -> Self {
        let mut update = Self::default();
        update.set(output);
        update
    }

    pub fn set(&mut self, output: StageOutput) {
        self.outputs.insert(output.owner(), output);
    }

    pub fn merge(&mut self, other: PartialPostUpdate) {
        self.outputs.extend(other.outputs);
    }

    pub fn get(&self, stage: StageName) -> Option<&StageOutput> {
        self.outputs.get(&stage)
    }

    pub fn stages(&self) -> impl Iterator<Item = StageName> + '_ {
        self.outputs.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Applies every output to `post`, in pipeline order.
    pub fn apply_to(&self, post: &mut Post) {
        for output in self.outputs.values() {
            output.apply_to(post);
        }
    }
}
