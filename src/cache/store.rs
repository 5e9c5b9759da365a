//! Cache store backends

use crate::cache::{CacheError, CacheStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// One blob file per key under a root directory.
///
/// Writes go to a temporary file that is then renamed over the target, so
/// readers never observe a partial blob and concurrent saves of one key are
/// last-writer-wins.
pub struct DirectoryCacheStore {
    root: PathBuf,
}

impl DirectoryCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under the platform cache directory
    pub fn with_default_path() -> Self {
        let base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join("checkrun"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, CacheError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(CacheError::InvalidPath(key.to_string()));
        }
        Ok(self.root.join(format!("{}.blob", key)))
    }
}

#[async_trait]
impl CacheStore for DirectoryCacheStore {
    async fn fetch(&self, key: &str, dest: &Path) -> Result<bool, CacheError> {
        let path = self.blob_path(key)?;
        match tokio::fs::copy(&path, dest).await {
            Ok(bytes) => {
                debug!(key = %key, bytes, "Cache archive read");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    async fn put(&self, key: &str, archive: &Path) -> Result<(), CacheError> {
        let path = self.blob_path(key)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CacheError::io(&self.root, e))?;

        let temp = self
            .root
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4().simple()));
        let bytes = match tokio::fs::copy(archive, &temp).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(CacheError::io(archive, e));
            }
        };
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(CacheError::io(&path, e));
        }

        debug!(key = %key, bytes, "Cache archive written");
        Ok(())
    }
}

/// In-memory store (for testing or ephemeral use)
pub struct InMemoryCacheStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Raw archive bytes stored under `key`
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.read().await.get(key).cloned()
    }

    /// Put raw bytes under `key`
    pub async fn insert(&self, key: &str, blob: Vec<u8>) {
        self.blobs.write().await.insert(key.to_string(), blob);
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.blobs.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn fetch(&self, key: &str, dest: &Path) -> Result<bool, CacheError> {
        let Some(blob) = self.get(key).await else {
            return Ok(false);
        };
        tokio::fs::write(dest, blob)
            .await
            .map_err(|e| CacheError::io(dest, e))?;
        Ok(true)
    }

    async fn put(&self, key: &str, archive: &Path) -> Result<(), CacheError> {
        let blob = tokio::fs::read(archive)
            .await
            .map_err(|e| CacheError::io(archive, e))?;
        self.insert(key, blob).await;
        Ok(())
    }
}
