//! Content-addressed job cache
//!
//! A job declaring `cache:` is keyed by its inputs; a hit short-circuits the
//! job as a success without running it. Every cache failure degrades to a
//! miss.

pub mod keys;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

pub use keys::{sanitize_key, CacheKey, CacheKeyResolver};

/// Error types for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache input {0} does not exist")]
    MissingInput(PathBuf),

    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt cache entry {key}: {message}")]
    Corrupt { key: String, message: String },
}

/// What a cache entry points at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub key: CacheKey,

    /// Instance that produced the entry
    pub instance_id: String,

    /// Log of the producing run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_ref: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Look up an entry by exact key.
    async fn lookup(&self, key: &CacheKey) -> Result<Option<ArtifactRef>, CacheError>;

    /// Store an entry, replacing any existing one.
    async fn store(&self, key: &CacheKey, artifact: &ArtifactRef) -> Result<(), CacheError>;
}

/// Process-local cache, shared between clones
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<CacheKey, ArtifactRef>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<ArtifactRef>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(&self, key: &CacheKey, artifact: &ArtifactRef) -> Result<(), CacheError> {
        self.entries
            .write()
            .await
            .insert(key.clone(), artifact.clone());
        Ok(())
    }
}

/// Filesystem-based cache, one JSON file per key
#[derive(Debug, Clone)]
pub struct FsCache {
    root_dir: PathBuf,
}

impl FsCache {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    fn key_path(&self, key: &CacheKey) -> PathBuf {
        self.root_dir
            .join(format!("{}.json", sanitize_key(key.as_str())))
    }
}

#[async_trait]
impl CacheBackend for FsCache {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<ArtifactRef>, CacheError> {
        let path = self.key_path(key);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        let artifact: ArtifactRef =
            serde_json::from_str(&contents).map_err(|e| CacheError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        debug!("Cache entry found at {}", path.display());
        Ok(Some(artifact))
    }

    async fn store(&self, key: &CacheKey, artifact: &ArtifactRef) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.root_dir)
            .await
            .map_err(|source| CacheError::Io {
                path: self.root_dir.clone(),
                source,
            })?;

        let path = self.key_path(key);
        let json = serde_json::to_string_pretty(artifact).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        // Write then rename so readers never see a partial entry
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|source| CacheError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| CacheError::Io { path, source })?;
        Ok(())
    }
}
