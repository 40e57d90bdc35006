//! Enrichment stages and their composition into a pipeline.
//!
//! A stage reads the Post it is given and returns only the fields it owns
//! as a [`PartialPostUpdate`]. Stages never touch the store; committing is
//! the result writer's job.

use std::sync::Arc;

use crate::config::EnrichmentConfig;
use crate::error::StageError;
use crate::model::{PartialPostUpdate, Post, StageName};
use crate::store::BlobStore;

pub mod cleaning;
pub mod entities;
pub mod language;
pub mod media;
pub mod pipeline;
pub mod sentiment;

pub use cleaning::TextCleaner;
pub use entities::EntityExtractor;
pub use language::LanguageDetector;
pub use media::MediaTagger;
pub use pipeline::{EnrichmentPipeline, PipelineOutcome, StageEvent};
pub use sentiment::SentimentClassifier;

pub trait EnrichmentStage: Send + Sync {
    fn name(&self) -> StageName;

    /// Whether the stage has anything to do for this Post.
    fn applies_to(&self, _post: &Post) -> bool {
        true
    }

    fn enrich(&self, post: &Post) -> Result<PartialPostUpdate, StageError>;
}

/// Builds the standard pipeline:
/// cleaning, language, sentiment, entities, then media tagging.
pub fn default_pipeline(config: &EnrichmentConfig, blobs: Arc<dyn BlobStore>) -> EnrichmentPipeline {
    let mut stages: Vec<Arc<dyn EnrichmentStage>> = vec![
        Arc::new(TextCleaner),
        Arc::new(LanguageDetector),
        Arc::new(SentimentClassifier),
        Arc::new(EntityExtractor::new(&config.entity_keywords)),
    ];
    if config.media_tagging {
        stages.push(Arc::new(MediaTagger::new(blobs)));
    }
    EnrichmentPipeline::new(stages)
}
