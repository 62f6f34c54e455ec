//! Object store seam for snapshot export.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ObjectStoreError;

pub type ObjectFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ObjectStoreError>> + Send + 'a>>;

/// Blob storage. Only `put` is needed by the core.
pub trait ObjectStore: Send + Sync {
    fn put<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> ObjectFuture<'a, ()>;
}

/// Keys are relative, `/`-separated, and never climb out of their root.
pub fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Task-scoped key for the `seq`-th snapshot, taken after `cursor` commands.
pub fn snapshot_key(task_id: &str, seq: usize, cursor: usize) -> String {
    format!("builds/{task_id}/snapshot-{seq:03}-cmd{cursor:05}.tar")
}

/// Task-scoped key for the snapshot taken when the build stops.
pub fn final_key(task_id: &str) -> String {
    format!("builds/{task_id}/final.tar")
}

// ── Filesystem ────────────────────────────────────────────────────

/// Stores objects as files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |path, part| path.join(part))
    }
}

impl ObjectStore for LocalObjectStore {
    fn put<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> ObjectFuture<'a, ()> {
        Box::pin(async move {
            validate_key(key)?;
            let path = self.path_for(key);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let len = bytes.len();
            tokio::fs::write(&path, bytes).await?;
            debug!(%key, bytes = len, path = %path.display(), "object stored");
            Ok(())
        })
    }
}

// ── In-memory ─────────────────────────────────────────────────────

/// Keeps objects in a map. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(key).cloned()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> ObjectFuture<'a, ()> {
        Box::pin(async move {
            validate_key(key)?;
            self.objects.lock().await.insert(key.to_string(), bytes);
            Ok(())
        })
    }
}
