//! Blob storage the pipeline writes into.
//!
//! The pipeline only needs four things from storage: write a blob, check a
//! key, delete a key (for rollback), and turn a key into a public URL. That
//! is the [`BlobStore`] trait. Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: a map behind a mutex, for tests and embedders that
//!   want to move the bytes elsewhere themselves.
//! - [`FsStore`]: a directory on disk. Each blob is written to a sibling
//!   temp file and renamed into place, so a reader never sees half a file.
//!
//! The store is assumed to be shared with unrelated requests. It is never
//! locked; unique key generation keeps requests apart.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage I/O failed")]
    Io(#[from] io::Error),
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
    #[error("key already exists: {0}")]
    AlreadyExists(String),
    #[error("store rejected {key}: {reason}")]
    Rejected { key: String, reason: String },
}

/// Injected storage capability.
pub trait BlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    fn exists(&self, key: &str) -> bool;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Public URL for read-side consumers. Not used by the pipeline.
    fn url(&self, key: &str) -> String;
}

fn join_url(base_url: &str, key: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.is_empty() {
        format!("/{key}")
    } else {
        format!("{base}/{key}")
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    base_url: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            blobs: Mutex::new(BTreeMap::new()),
            base_url: base_url.into(),
        }
    }

    fn blobs(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs().get(key).cloned()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.blobs().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.blobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs().is_empty()
    }
}

impl BlobStore for MemoryStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        self.blobs().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.blobs().contains_key(key)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.blobs().remove(key);
        Ok(())
    }

    fn url(&self, key: &str) -> String {
        join_url(&self.base_url, key)
    }
}

/// Directory-backed store.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    base_url: String,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path under the root.
    ///
    /// Only plain relative components are accepted: no absolute paths, no
    /// `..`, no `.`. Keys always use `/` as separator.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FsStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        std::fs::create_dir_all(parent)?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        let tmp = parent.join(format!(
            ".{file_name}.{}.tmp",
            uuid::Uuid::new_v4().simple()
        ));

        if let Err(e) = std::fs::write(&tmp, bytes).and_then(|()| std::fs::rename(&tmp, &path)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.path_for(key).is_ok_and(|p| p.is_file())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn url(&self, key: &str) -> String {
        join_url(&self.base_url, key)
    }
}
