//! Dependency cache
//!
//! The cache is keyed by a [`Fingerprint`] of the dependency manifest and the
//! toolchain it was built with. Restoring happens before the first step and
//! saving after the last one; neither ever changes the outcome of a run.

pub mod snapshot;
pub mod store;

pub use snapshot::{file_digest, Snapshot};
pub use store::{DirectoryCacheStore, InMemoryCacheStore};

use crate::core::{config::CacheConfig, ExecutionContext, ToolchainInfo};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Context metadata key holding the digest of the restored snapshot
pub const RESTORED_DIGEST_KEY: &str = "cache.restored_digest";

/// Error types for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),

    #[error("Invalid cache path: {0}")]
    InvalidPath(String),

    #[error("Cache task failed: {0}")]
    Task(String),
}

impl CacheError {
    pub(crate) fn io(path: &Path, error: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            message: error.to_string(),
        }
    }
}

/// Non-manifest inputs to a fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintInputs {
    pub prefix: String,
    pub os: String,
    pub channel: String,
    pub toolchain_version: Option<String>,
}

impl FingerprintInputs {
    pub fn new(prefix: impl Into<String>, toolchain: &ToolchainInfo) -> Self {
        Self {
            prefix: prefix.into(),
            os: std::env::consts::OS.to_string(),
            channel: toolchain.channel.clone(),
            toolchain_version: toolchain.version.clone(),
        }
    }
}

/// Deterministic cache key derived from manifest contents
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    digest: String,
    key: String,
}

impl Fingerprint {
    /// Digest `manifest` together with `inputs`.
    ///
    /// Every field is length-prefixed before hashing so that moving bytes
    /// between adjacent fields changes the digest.
    pub fn compute(manifest: &[u8], inputs: &FingerprintInputs) -> Self {
        let mut hasher = Sha256::new();
        let version = inputs.toolchain_version.as_deref().unwrap_or("");
        for field in [
            inputs.prefix.as_bytes(),
            inputs.os.as_bytes(),
            inputs.channel.as_bytes(),
            version.as_bytes(),
            manifest,
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field);
        }

        let digest = hex::encode(hasher.finalize());
        let key = format!("{}-{}-{}-{}", inputs.prefix, inputs.os, inputs.channel, digest);
        Self { digest, key }
    }

    /// Store key: `<prefix>-<os>-<channel>-<digest>`
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// A restored cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,

    /// Hex SHA-256 of the archive
    pub digest: String,

    /// Archive size in bytes
    pub size: u64,
}

/// Result of a restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(CacheEntry),
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

/// Result of a save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new archive was written
    Saved { bytes: u64 },
    /// The dependency state matches what was restored
    Unchanged,
}

/// Trait for cache backends - a key/archive store.
///
/// Archives move through files so that a multi-gigabyte `target/` is never
/// held in memory.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Copy the archive for `key` into `dest`. Returns `false` when there is none.
    async fn fetch(&self, key: &str, dest: &Path) -> Result<bool, CacheError>;

    /// Store the archive at `archive` under `key`, replacing any previous one
    async fn put(&self, key: &str, archive: &Path) -> Result<(), CacheError>;
}

/// Restores and persists the dependency state of a workspace
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl CacheManager {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Fingerprint the workspace's manifest.
    ///
    /// Returns `None` when the manifest does not exist.
    pub async fn fingerprint(
        &self,
        context: &ExecutionContext,
    ) -> Result<Option<Fingerprint>, CacheError> {
        let manifest_path = context.path(&self.config.manifest);
        let manifest = match tokio::fs::read(&manifest_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(manifest = %manifest_path.display(), "Manifest not found, caching disabled for this run");
                return Ok(None);
            }
            Err(e) => return Err(CacheError::io(&manifest_path, e)),
        };

        let inputs = FingerprintInputs::new(self.config.key_prefix.clone(), &context.toolchain);
        Ok(Some(Fingerprint::compute(&manifest, &inputs)))
    }

    /// Unpack the entry for `fingerprint` into the workspace, if one exists
    pub async fn restore(
        &self,
        fingerprint: &Fingerprint,
        context: &mut ExecutionContext,
    ) -> Result<CacheLookup, CacheError> {
        let scratch = scratch_archive()?;
        if !self.store.fetch(fingerprint.key(), scratch.path()).await? {
            info!(key = %fingerprint, "Cache miss");
            return Ok(CacheLookup::Miss);
        }

        let workspace = context.workspace.clone();
        let snapshot = tokio::task::spawn_blocking(move || Snapshot::restore(scratch.path(), &workspace))
            .await
            .map_err(|e| CacheError::Task(e.to_string()))??;

        context
            .metadata
            .insert(RESTORED_DIGEST_KEY.to_string(), snapshot.digest.clone());
        info!(key = %fingerprint, entries = snapshot.entries, bytes = snapshot.size, "Cache restored");

        Ok(CacheLookup::Hit(CacheEntry {
            key: fingerprint.key().to_string(),
            digest: snapshot.digest,
            size: snapshot.size,
        }))
    }

    /// Pack the workspace's cached paths and store them under `fingerprint`.
    ///
    /// Nothing is written when the packed state equals what was restored.
    pub async fn save(
        &self,
        fingerprint: &Fingerprint,
        context: &ExecutionContext,
    ) -> Result<SaveOutcome, CacheError> {
        let scratch = scratch_archive()?;
        let archive = scratch.path().to_path_buf();
        let workspace = context.workspace.clone();
        let paths = self.config.paths.clone();
        let snapshot = tokio::task::spawn_blocking(move || Snapshot::capture(&workspace, &paths, &archive))
            .await
            .map_err(|e| CacheError::Task(e.to_string()))??;

        if context.metadata.get(RESTORED_DIGEST_KEY) == Some(&snapshot.digest) {
            debug!(key = %fingerprint, "Dependency state unchanged, skipping save");
            return Ok(SaveOutcome::Unchanged);
        }

        self.store.put(fingerprint.key(), scratch.path()).await?;
        info!(key = %fingerprint, entries = snapshot.entries, bytes = snapshot.size, "Cache saved");
        Ok(SaveOutcome::Saved { bytes: snapshot.size })
    }
}

/// A temporary archive file, removed on drop
fn scratch_archive() -> Result<tempfile::NamedTempFile, CacheError> {
    tempfile::Builder::new()
        .prefix("checkrun-cache-")
        .suffix(".tar.gz")
        .tempfile()
        .map_err(|e| CacheError::io(&std::env::temp_dir(), e))
}
