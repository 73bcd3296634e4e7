//! Storage backend abstraction for object storage (S3, GCS, local).
//!
//! This module defines the storage contract every backend must implement.
//! Lifecycle messages, inputs, outputs and control records all live in one
//! bucket, so the contract is deliberately small:
//! - Whole-object reads that fail with [`Error::NotFound`]
//! - Unconditional writes (last write wins)
//! - Idempotent deletes
//! - Prefix listing
//! - Server-side rename (`move`) for relocating an object under a new key
//!
//! The version token is an opaque `String` so backends can expose S3 `ETag`s
//! or GCS generations without leaking either into the message layer.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object path (key).
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// Opaque object version token.
    pub version: String,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend trait for object storage.
///
/// All storage backends (S3, GCS, memory) implement this trait.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads entire object.
    ///
    /// Returns `Error::NotFound` if object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes an object, replacing whatever was stored at `path`.
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Deletes an object.
    ///
    /// Succeeds even if object doesn't exist (idempotent).
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects with the given prefix.
    ///
    /// Returns empty vec if no objects match.
    ///
    /// **Ordering**: Results are returned in arbitrary order that may vary between
    /// backends and invocations. Callers requiring deterministic order should sort.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if object doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;

    /// Moves an object to a new key.
    ///
    /// Returns `Error::NotFound` if `from` doesn't exist. The default
    /// implementation copies then deletes; backends with a native move or
    /// server-side copy should override it.
    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let data = self.get(from).await?;
        self.put(to, data).await?;
        self.delete(from).await
    }
}

/// In-memory storage backend for testing.
///
/// Thread-safe via `RwLock`. Not suitable for production.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: i64,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, path: &str) -> ObjectMeta {
        ObjectMeta {
            path: path.to_string(),
            size: self.data.len() as u64,
            version: self.version.to_string(),
            last_modified: Some(self.last_modified),
        }
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::Internal {
        message: "lock poisoned".into(),
    }
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored objects.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.objects.read().map_err(poisoned)?.len())
    }

    /// Returns every stored path, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn paths(&self) -> Result<Vec<String>> {
        let mut paths: Vec<String> = self.objects.read().map_err(poisoned)?.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }

    /// Returns true when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(poisoned)?;

        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let mut objects = self.objects.write().map_err(poisoned)?;
        let version = objects.get(path).map_or(1, |o| o.version + 1);
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                version,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.write().map_err(poisoned)?.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(poisoned)?;

        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(path, obj)| obj.meta(path))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(poisoned)?;
        Ok(objects.get(path).map(|obj| obj.meta(path)))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut objects = self.objects.write().map_err(poisoned)?;
        let Some(mut obj) = objects.remove(from) else {
            return Err(Error::NotFound(format!("object not found: {from}")));
        };
        obj.version = objects.get(to).map_or(1, |o| o.version + 1);
        obj.last_modified = Utc::now();
        objects.insert(to.to_string(), obj);
        Ok(())
    }
}
