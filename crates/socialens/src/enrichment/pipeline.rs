use std::sync::Arc;

use tracing::{debug, info_span, warn};

use super::EnrichmentStage;
use crate::error::StageError;
use crate::model::{PartialPostUpdate, Post, StageName};

/// What the pipeline reports while it runs, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    Started(StageName),
    Completed(StageName, PartialPostUpdate),
    Failed(StageError),
}

/// Accumulated update of one run, plus the failure that stopped it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOutcome {
    pub update: PartialPostUpdate,
    pub failure: Option<StageError>,
}

impl PipelineOutcome {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Ordered composition of enrichment stages.
#[derive(Clone, Default)]
pub struct EnrichmentPipeline {
    stages: Vec<Arc<dyn EnrichmentStage>>,
}

impl EnrichmentPipeline {
    pub fn new(stages: Vec<Arc<dyn EnrichmentStage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn run(&self, post: &Post) -> PipelineOutcome {
        self.run_with(post, &mut |_| {})
    }

    /// Runs every applicable stage in order, stopping at the first failure.
    ///
    /// Each stage sees the Post with the outputs of earlier stages applied.
    /// `sink` receives every event as it happens, so a caller that gives up
    /// waiting still knows what finished before.
    pub fn run_with(&self, post: &Post, sink: &mut dyn FnMut(StageEvent)) -> PipelineOutcome {
        let _pipeline_span = info_span!("enrichment", post_id = %post.id).entered();

        let mut working = post.clone();
        let mut outcome = PipelineOutcome::default();

        for stage in &self.stages {
            let name = stage.name();
            if !stage.applies_to(&working) {
                debug!("Stage {} does not apply to post {}", name, post.id);
                continue;
            }

            let _stage_span = info_span!("stage", stage = %name).entered();
            sink(StageEvent::Started(name));

            let result = stage.enrich(&working).and_then(|update| {
                let foreign = update.stages().find(|owner| *owner != name);
                match foreign {
                    Some(foreign) => Err(StageError::exception(
                        name,
                        format!("stage produced output owned by {}", foreign),
                    )),
                    None => Ok(update),
                }
            });

            match result {
                Ok(update) => {
                    update.apply_to(&mut working);
                    outcome.update.merge(update.clone());
                    sink(StageEvent::Completed(name, update));
                }
                Err(err) => {
                    let err = with_stage(err, name);
                    warn!("Stage {} failed for post {}: {}", name, post.id, err);
                    sink(StageEvent::Failed(err.clone()));
                    outcome.failure = Some(err);
                    break;
                }
            }
        }

        outcome
    }
}

fn with_stage(err: StageError, name: StageName) -> StageError {
    match err {
        StageError::Timeout { stage: None, after } => StageError::Timeout {
            stage: Some(name),
            after,
        },
        StageError::Exception {
            stage: None,
            message,
        } => StageError::Exception {
            stage: Some(name),
            message,
        },
        other => other,
    }
}
