use std::sync::Arc;

use image::GenericImageView;

use super::EnrichmentStage;
use crate::error::StageError;
use crate::model::{
    MediaAnnotation, MediaKind, MediaRef, PartialPostUpdate, Post, StageName, StageOutput,
};
use crate::store::BlobStore;

/// Tags stored media: kind, and for decodable images the format and
/// orientation plus a short caption.
pub struct MediaTagger {
    blobs: Arc<dyn BlobStore>,
}

impl MediaTagger {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    fn annotate(
        &self,
        index: usize,
        media: &MediaRef,
    ) -> Result<Option<MediaAnnotation>, StageError> {
        if media.missing {
            return Ok(None);
        }
        let Some(handle) = &media.blob else {
            // Remote references are never fetched.
            return Ok(Some(MediaAnnotation {
                index,
                tags: vec![media.kind.as_str().to_string()],
                caption: None,
            }));
        };

        let bytes = self
            .blobs
            .get(handle)
            .map_err(|e| StageError::exception(StageName::MediaTagging, e.to_string()))?;

        let (tags, caption) = describe(media.kind, &bytes);
        Ok(Some(MediaAnnotation {
            index,
            tags,
            caption,
        }))
    }
}

fn orientation(width: u32, height: u32) -> &'static str {
    match width.cmp(&height) {
        std::cmp::Ordering::Greater => "landscape",
        std::cmp::Ordering::Less => "portrait",
        std::cmp::Ordering::Equal => "square",
    }
}

/// Tags and caption for one blob.
pub fn describe(kind: MediaKind, bytes: &[u8]) -> (Vec<String>, Option<String>) {
    let format = image::guess_format(bytes).ok();
    if kind != MediaKind::Image && format.is_none() {
        return (vec![kind.as_str().to_string()], None);
    }

    let mut tags = vec![MediaKind::Image.as_str().to_string()];
    let decoded = format.and_then(|f| {
        image::load_from_memory_with_format(bytes, f)
            .ok()
            .map(|img| (f, img))
    });
    match decoded {
        Some((format, img)) => {
            let (width, height) = img.dimensions();
            let format_name = format
                .extensions_str()
                .first()
                .copied()
                .unwrap_or("unknown");
            let orientation = orientation(width, height);
            tags.push(format_name.to_string());
            tags.push(orientation.to_string());
            let caption = format!("{} {} image, {}x{}", orientation, format_name, width, height);
            (tags, Some(caption))
        }
        None => {
            tags.push("undecodable".to_string());
            (tags, None)
        }
    }
}

impl EnrichmentStage for MediaTagger {
    fn name(&self) -> StageName {
        StageName::MediaTagging
    }

    fn applies_to(&self, post: &Post) -> bool {
        post.has_media()
    }

    fn enrich(&self, post: &Post) -> Result<PartialPostUpdate, StageError> {
        let mut annotations = Vec::new();
        for (index, media) in post.media.iter().enumerate() {
            if let Some(annotation) = self.annotate(index, media)? {
                annotations.push(annotation);
            }
        }
        Ok(PartialPostUpdate::single(StageOutput::Media(annotations)))
    }
}
