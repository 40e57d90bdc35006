pub mod aggregator;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod enrichment;
pub mod error;
pub mod export;
pub mod ingest;
pub mod model;
pub mod normalizer;
pub mod parser;
pub mod progress;
pub mod sanitize;
pub mod store;
pub mod writer;

pub use aggregator::{
    AggregateQuery, Aggregator, AnalyticsSummary, PopularContent, SentimentTrends,
};
pub use config::{load_config, Config};
pub use db::Database;
pub use dispatcher::{Dispatcher, RetryPolicy};
pub use enrichment::{default_pipeline, EnrichmentPipeline, EnrichmentStage};
pub use error::{
    ConfigError, ExportError, ParseError, Result, SocialensError, StageError, StoreError,
    WorkerError, WriterError,
};
pub use export::{ExportFormat, Exporter};
pub use ingest::{Ingestor, UploadReceipt, UploadStatusReport};
pub use progress::{BroadcastProgress, EnrichmentEvent, NoopProgress, ProgressReporter};
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore, PostFilter, PostStore, UploadStore};
pub use writer::ResultWriter;
