//! Media blob stores.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use super::BlobStore;
use crate::error::{BlobError, StoreError};
use crate::model::BlobHandle;

const HANDLE_PREFIX: &str = "cas:sha256:";

fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Content-addressed store on the local filesystem.
///
/// Blobs live at `<root>/sha256/<aa>/<bb>/<digest>`; writing the same bytes
/// twice yields the same handle and a single file.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, digest: &str) -> PathBuf {
        self.root
            .join("sha256")
            .join(&digest[0..2])
            .join(&digest[2..4])
            .join(digest)
    }
}

fn parse_handle(handle: &BlobHandle) -> Result<&str, BlobError> {
    let digest = handle
        .as_str()
        .strip_prefix(HANDLE_PREFIX)
        .ok_or_else(|| BlobError::InvalidHandle(handle.to_string()))?;
    if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(BlobError::InvalidHandle(handle.to_string()));
    }
    Ok(digest)
}

impl BlobStore for FsBlobStore {
    fn put(&self, bytes: &[u8], content_type: Option<&str>) -> Result<BlobHandle, StoreError> {
        let digest = digest_hex(bytes);
        let path = self.path_for(&digest);

        if !path.exists() {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).map_err(|e| BlobError::Write {
                    path: dir.to_path_buf(),
                    source: e,
                })?;
            }
            // Write under a temporary name first so a reader never sees a
            // partially written blob.
            let tmp = path.with_extension("partial");
            fs::write(&tmp, bytes).map_err(|e| BlobError::Write {
                path: tmp.clone(),
                source: e,
            })?;
            fs::rename(&tmp, &path).map_err(|e| BlobError::Write {
                path: path.clone(),
                source: e,
            })?;
            log::debug!(
                "Stored blob {} ({} bytes, {})",
                digest,
                bytes.len(),
                content_type.unwrap_or("unknown type")
            );
        }

        Ok(BlobHandle::new(format!("{HANDLE_PREFIX}{digest}")))
    }

    fn get(&self, handle: &BlobHandle) -> Result<Vec<u8>, StoreError> {
        let digest = parse_handle(handle)?;
        let path = self.path_for(digest);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(handle.to_string()).into())
            }
            Err(e) => Err(BlobError::Read { path, source: e }.into()),
        }
    }
}

/// In-memory blob store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, bytes: &[u8], _content_type: Option<&str>) -> Result<BlobHandle, StoreError> {
        let handle = format!("{HANDLE_PREFIX}{}", digest_hex(bytes));
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| BlobError::LockPoisoned)?;
        blobs.entry(handle.clone()).or_insert_with(|| bytes.to_vec());
        Ok(BlobHandle::new(handle))
    }

    fn get(&self, handle: &BlobHandle) -> Result<Vec<u8>, StoreError> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| BlobError::LockPoisoned)?;
        blobs
            .get(handle.as_str())
            .cloned()
            .ok_or_else(|| BlobError::NotFound(handle.to_string()).into())
    }
}
