//! Test storage with operation tracing and failure injection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use sluice_core::error::{Error, Result};
use sluice_core::storage::{MemoryBackend, ObjectMeta, StorageBackend};

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Get operation.
    Get {
        /// Path that was read.
        path: String,
    },
    /// Head operation (existence probe).
    Head {
        /// Path that was checked.
        path: String,
    },
    /// Put operation.
    Put {
        /// Path that was written.
        path: String,
        /// Size of data written.
        size: usize,
    },
    /// Delete operation.
    Delete {
        /// Path that was deleted.
        path: String,
    },
    /// List operation.
    List {
        /// Prefix that was listed.
        prefix: String,
    },
    /// Rename operation.
    Rename {
        /// Source path.
        from: String,
        /// Destination path.
        to: String,
    },
}

impl StorageOp {
    /// Returns true for delete operations.
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }
}

/// Memory backend that records every call.
///
/// Storage semantics come from [`MemoryBackend`]. Paths under an injected
/// failure prefix fail before reaching it, and are not recorded.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryBackend {
    inner: MemoryBackend,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_paths: Arc<Mutex<Vec<String>>>,
    latency: Option<Duration>,
}

impl TracingMemoryBackend {
    /// Creates a new empty tracing storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage that sleeps before every call.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Makes every call touching `prefix` fail.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_paths.lock().expect("lock").push(prefix.into());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_paths.lock().expect("lock").clear();
    }

    /// Returns all stored paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.inner.paths().expect("paths")
    }

    async fn enter(&self, paths: &[&str], op: StorageOp) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let fail_paths = self.fail_paths.lock().expect("lock").clone();
        if let Some(path) = paths
            .iter()
            .find(|path| fail_paths.iter().any(|prefix| path.starts_with(prefix.as_str())))
        {
            return Err(Error::storage(format!("injected failure for path: {path}")));
        }
        self.operations.lock().expect("lock").push(op);
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageBackend for TracingMemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.enter(&[path], StorageOp::Get { path: path.into() }).await?;
        self.inner.get(path).await
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        self.enter(&[path], StorageOp::Head { path: path.into() }).await?;
        self.inner.head(path).await
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let op = StorageOp::Put {
            path: path.into(),
            size: data.len(),
        };
        self.enter(&[path], op).await?;
        self.inner.put(path, data).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.enter(&[path], StorageOp::Delete { path: path.into() }).await?;
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let op = StorageOp::List {
            prefix: prefix.into(),
        };
        self.enter(&[prefix], op).await?;
        self.inner.list(prefix).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let op = StorageOp::Rename {
            from: from.into(),
            to: to.into(),
        };
        self.enter(&[from, to], op).await?;
        self.inner.rename(from, to).await
    }
}
