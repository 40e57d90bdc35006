//! Isolated pipeline for integration tests: in-memory SQLite, in-memory
//! blobs and a dispatcher tuned for fast retries.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use socialens::config::{DispatcherConfig, EnrichmentConfig};
use socialens::model::{Post, PostId, UploadId};
use socialens::{
    default_pipeline, BroadcastProgress, Database, Dispatcher, EnrichmentEvent,
    EnrichmentPipeline, EnrichmentStage, Ingestor, MemoryBlobStore, PostFilter, PostStore,
    ResultWriter, UploadReceipt, UploadStatusReport,
};

pub const WAIT: Duration = Duration::from_secs(10);

pub fn fast_config() -> DispatcherConfig {
    DispatcherConfig {
        worker_count: 2,
        attempt_timeout_ms: 2_000,
        max_retries: 3,
        backoff_base_ms: 5,
        backoff_max_ms: 20,
        lease_ms: 5_000,
        reaper_interval_ms: 10,
    }
}

pub struct TestHarness {
    pub db: Arc<Database>,
    pub blobs: Arc<MemoryBlobStore>,
    pub progress: Arc<BroadcastProgress>,
    pub ingestor: Ingestor,
}

impl TestHarness {
    /// Harness running the standard enrichment stages.
    pub fn new() -> Self {
        let blobs = Arc::new(MemoryBlobStore::new());
        let pipeline = default_pipeline(&EnrichmentConfig::default(), blobs.clone());
        Self::build(pipeline, fast_config(), blobs, u64::MAX)
    }

    pub fn with_stages(stages: Vec<Arc<dyn EnrichmentStage>>, config: DispatcherConfig) -> Self {
        Self::build(
            EnrichmentPipeline::new(stages),
            config,
            Arc::new(MemoryBlobStore::new()),
            u64::MAX,
        )
    }

    pub fn with_upload_limit(max_upload_bytes: u64) -> Self {
        let blobs = Arc::new(MemoryBlobStore::new());
        let pipeline = default_pipeline(&EnrichmentConfig::default(), blobs.clone());
        Self::build(pipeline, fast_config(), blobs, max_upload_bytes)
    }

    fn build(
        pipeline: EnrichmentPipeline,
        config: DispatcherConfig,
        blobs: Arc<MemoryBlobStore>,
        max_upload_bytes: u64,
    ) -> Self {
        let db = Arc::new(Database::open_in_memory().expect("in-memory database"));
        let writer = Arc::new(ResultWriter::new(db.clone()));
        let progress = Arc::new(BroadcastProgress::new(1024));
        let dispatcher = Dispatcher::start(
            config,
            db.clone(),
            db.clone(),
            writer.clone(),
            Arc::new(pipeline),
            progress.clone(),
        )
        .expect("dispatcher starts");
        let ingestor = Ingestor::new(
            db.clone(),
            db.clone(),
            blobs.clone(),
            writer,
            Arc::new(dispatcher),
            max_upload_bytes,
        );
        Self {
            db,
            blobs,
            progress,
            ingestor,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EnrichmentEvent> {
        self.progress.subscribe()
    }

    pub fn ingest(&self, filename: &str, bytes: Vec<u8>) -> UploadReceipt {
        self.ingestor
            .ingest(filename, None, bytes)
            .expect("upload accepted")
    }

    /// Ingests and waits for enrichment to settle.
    pub fn ingest_and_wait(&self, filename: &str, bytes: Vec<u8>) -> UploadStatusReport {
        let receipt = self.ingest(filename, bytes);
        self.wait(&receipt.upload_id)
    }

    pub fn wait(&self, upload_id: &UploadId) -> UploadStatusReport {
        let report = self
            .ingestor
            .wait_for_upload(upload_id, WAIT)
            .expect("status readable");
        assert!(
            report.status.is_finished(),
            "upload {} still {} after {:?}",
            upload_id,
            report.status,
            WAIT
        );
        report
    }

    pub fn post(&self, id: &PostId) -> Post {
        PostStore::get(&*self.db, id).unwrap().expect("post exists")
    }

    pub fn posts_of(&self, upload_id: &UploadId) -> Vec<Post> {
        self.db
            .query(&PostFilter {
                upload_id: Some(upload_id.clone()),
                ..PostFilter::default()
            })
            .unwrap()
    }

    pub fn all_posts(&self) -> Vec<Post> {
        self.db.query(&PostFilter::default()).unwrap()
    }

    /// Drains every event published so far.
    pub fn drain(receiver: &mut broadcast::Receiver<EnrichmentEvent>) -> Vec<EnrichmentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }
}
