//! Enrichment progress events for status subscribers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{PostId, StageName, UploadId, UploadStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentPhase {
    Queued,
    Running,
    StageCompleted,
    Retrying,
    Enriched,
    Failed,
    Skipped,
    UploadFinished,
}

impl std::fmt::Display for EnrichmentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrichmentPhase::Queued => write!(f, "Queued"),
            EnrichmentPhase::Running => write!(f, "Running"),
            EnrichmentPhase::StageCompleted => write!(f, "Stage completed"),
            EnrichmentPhase::Retrying => write!(f, "Retrying"),
            EnrichmentPhase::Enriched => write!(f, "Enriched"),
            EnrichmentPhase::Failed => write!(f, "Failed"),
            EnrichmentPhase::Skipped => write!(f, "Skipped"),
            EnrichmentPhase::UploadFinished => write!(f, "Upload finished"),
        }
    }
}

/// Progress event for one Enrichment Job, or for the Upload as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentEvent {
    pub upload_id: UploadId,
    /// Unset for upload-level events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<PostId>,
    pub phase: EnrichmentPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageName>,
    /// Attempt number, starting at 1. Zero for events outside an attempt.
    pub attempt: u32,
    pub message: String,
    /// Final status, set on `UploadFinished`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_status: Option<UploadStatus>,
    pub timestamp: DateTime<Utc>,
}

impl EnrichmentEvent {
    pub fn for_post(upload_id: &UploadId, post_id: &PostId, phase: EnrichmentPhase) -> Self {
        Self {
            upload_id: upload_id.clone(),
            post_id: Some(post_id.clone()),
            phase,
            stage: None,
            attempt: 0,
            message: phase.to_string(),
            upload_status: None,
            timestamp: Utc::now(),
        }
    }

    pub fn upload_finished(upload_id: &UploadId, status: UploadStatus, message: &str) -> Self {
        Self {
            upload_id: upload_id.clone(),
            post_id: None,
            phase: EnrichmentPhase::UploadFinished,
            stage: None,
            attempt: 0,
            message: message.to_string(),
            upload_status: Some(status),
            timestamp: Utc::now(),
        }
    }

    pub fn with_stage(mut self, stage: Option<StageName>) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: EnrichmentEvent);
}

/// Discards every event.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: EnrichmentEvent) {}
}

/// Fans events out to any number of subscribers.
#[derive(Clone)]
pub struct BroadcastProgress {
    sender: Arc<broadcast::Sender<EnrichmentEvent>>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EnrichmentEvent> {
        self.sender.subscribe()
    }

    pub fn sender(&self) -> Arc<broadcast::Sender<EnrichmentEvent>> {
        Arc::clone(&self.sender)
    }
}

impl Default for BroadcastProgress {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: EnrichmentEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_reaches_subscribers() {
        let progress = BroadcastProgress::new(8);
        let mut rx = progress.subscribe();
        let upload = UploadId::from_string("u1");
        let post = PostId::from_string("p1");

        progress.report(
            EnrichmentEvent::for_post(&upload, &post, EnrichmentPhase::Running).with_attempt(2),
        );

        let event = rx.try_recv().unwrap();
        assert_eq!(event.phase, EnrichmentPhase::Running);
        assert_eq!(event.attempt, 2);
        assert_eq!(event.post_id, Some(post));
    }

    #[test]
    fn test_report_without_subscribers_is_silent() {
        let progress = BroadcastProgress::default();
        progress.report(EnrichmentEvent::upload_finished(
            &UploadId::from_string("u1"),
            UploadStatus::Completed,
            "done",
        ));
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = EnrichmentEvent::for_post(
            &UploadId::from_string("u1"),
            &PostId::from_string("p1"),
            EnrichmentPhase::StageCompleted,
        )
        .with_stage(Some(StageName::Sentiment));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["uploadId"], "u1");
        assert_eq!(json["phase"], "stage_completed");
        assert_eq!(json["stage"], "sentiment");
        assert!(json.get("uploadStatus").is_none());
    }
}
