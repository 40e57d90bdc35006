use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 100 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_blob_directory")]
    pub blob_directory: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

fn default_database_path() -> String {
    "socialens.db".to_string()
}

fn default_blob_directory() -> String {
    "blobs".to_string()
}

fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: default_database_path(),
            blob_directory: default_blob_directory(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            dispatcher: DispatcherConfig::default(),
            enrichment: EnrichmentConfig::default(),
            aggregator: AggregatorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Wall-clock budget for one attempt of the whole pipeline.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// A lease not completed within this window is reclaimed.
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,
    #[serde(default = "default_reaper_interval_ms")]
    pub reaper_interval_ms: u64,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_attempt_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_lease_ms() -> u64 {
    120_000
}

fn default_reaper_interval_ms() -> u64 {
    1_000
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            lease_ms: default_lease_ms(),
            reaper_interval_ms: default_reaper_interval_ms(),
        }
    }
}

impl DispatcherConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Run the media tagging stage for posts with attachments.
    #[serde(default = "default_true")]
    pub media_tagging: bool,
    /// Topic keywords the entity extractor reports when they occur.
    #[serde(default = "default_entity_keywords")]
    pub entity_keywords: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_entity_keywords() -> Vec<String> {
    ["tech", "food", "travel", "music", "sport", "news"]
        .iter()
        .map(|k| k.to_string())
        .collect()
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            media_tagging: true,
            entity_keywords: default_entity_keywords(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Keep only the most recent N days in the daily series.
    #[serde(default)]
    pub daily_limit: Option<usize>,
}

fn default_top_n() -> usize {
    10
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            daily_limit: None,
        }
    }
}
