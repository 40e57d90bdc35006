//! Archive and stage builders for integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use zip::write::SimpleFileOptions;

use socialens::model::{
    EnrichmentState, PartialPostUpdate, Platform, Post, PostId, StageName, StageOutput, UploadId,
};
use socialens::{EnrichmentStage, StageError};

/// Serializes `posts` as a top-level JSON array.
pub fn json_archive(posts: &[Value]) -> Vec<u8> {
    serde_json::to_vec(&Value::Array(posts.to_vec())).unwrap()
}

/// A text post as a JSON export would carry it.
pub fn text_record(platform: &str, id: &str, text: &str) -> Value {
    json!({
        "platform": platform,
        "id": id,
        "text": text,
        "timestamp": "2026-03-01T12:00:00Z",
        "author": "user-1",
    })
}

pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 30, 30]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// A Post ready to go straight into a store, already enriched.
pub fn stored_post(
    upload_id: &UploadId,
    source_id: &str,
    platform: Platform,
    timestamp: DateTime<Utc>,
) -> Post {
    Post {
        id: PostId::derive(platform.as_str(), source_id),
        upload_id: upload_id.clone(),
        platform,
        source_id: source_id.to_string(),
        user_id: Some("user-1".to_string()),
        raw_text: format!("post {}", source_id),
        cleaned_text: Some(format!("post {}", source_id)),
        language: Some("en".to_string()),
        sentiment: None,
        entities: Vec::new(),
        media: Vec::new(),
        timestamp,
        timestamp_inferred: false,
        missing_media: false,
        metadata: serde_json::Map::new(),
        enrichment_state: EnrichmentState::Enriched,
        failed_stage: None,
        last_error: None,
        version: 0,
        created_at: timestamp,
        updated_at: timestamp,
    }
}

pub fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

/// Always returns the same output.
pub struct FixedStage(pub StageOutput);

impl EnrichmentStage for FixedStage {
    fn name(&self) -> StageName {
        self.0.owner()
    }

    fn enrich(&self, _post: &Post) -> Result<PartialPostUpdate, StageError> {
        Ok(PartialPostUpdate::single(self.0.clone()))
    }
}

/// Fails its first `failures` calls, then returns `output`.
pub struct FlakyStage {
    pub output: StageOutput,
    pub failures: usize,
    pub calls: AtomicUsize,
}

impl FlakyStage {
    pub fn new(output: StageOutput, failures: usize) -> Self {
        Self {
            output,
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EnrichmentStage for FlakyStage {
    fn name(&self) -> StageName {
        self.output.owner()
    }

    fn enrich(&self, _post: &Post) -> Result<PartialPostUpdate, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(StageError::exception(self.name(), format!("flaky failure {}", call + 1)))
        } else {
            Ok(PartialPostUpdate::single(self.output.clone()))
        }
    }
}

/// Sleeps before answering. `first_only` limits the delay to the first call.
pub struct SlowStage {
    pub output: StageOutput,
    pub delay: Duration,
    pub first_only: bool,
    pub calls: AtomicUsize,
}

impl SlowStage {
    pub fn new(output: StageOutput, delay: Duration) -> Self {
        Self {
            output,
            delay,
            first_only: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn first_call_only(mut self) -> Self {
        self.first_only = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EnrichmentStage for SlowStage {
    fn name(&self) -> StageName {
        self.output.owner()
    }

    fn enrich(&self, _post: &Post) -> Result<PartialPostUpdate, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.first_only || call == 0 {
            std::thread::sleep(self.delay);
        }
        Ok(PartialPostUpdate::single(self.output.clone()))
    }
}
