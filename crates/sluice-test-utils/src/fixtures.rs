//! Pre-built fixtures for common test scenarios.

use std::sync::Arc;

use bytes::Bytes;
use sluice_core::storage::StorageBackend;
use sluice_core::WorkItemId;

use crate::storage::TracingMemoryBackend;

/// Test context with a traced storage backend and a deployment root.
pub struct TestContext {
    /// Shared storage backend.
    pub storage: Arc<TracingMemoryBackend>,
    /// Deployment root used by the test.
    pub root: String,
}

impl TestContext {
    /// Creates a context rooted at `hst-processing-test`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root("hst-processing-test")
    }

    /// Creates a context with a specific root.
    #[must_use]
    pub fn with_root(root: impl Into<String>) -> Self {
        Self {
            storage: Arc::new(TracingMemoryBackend::new()),
            root: root.into(),
        }
    }

    /// Returns the storage as a trait object for constructors.
    #[must_use]
    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        self.storage.clone()
    }

    /// Returns the backend path for a root-relative path.
    #[must_use]
    pub fn path(&self, relative: &str) -> String {
        format!("{}/{relative}", self.root)
    }

    /// Writes an object at a root-relative path.
    pub async fn seed(&self, relative: &str, data: impl Into<Bytes>) {
        self.storage
            .put(&self.path(relative), data.into())
            .await
            .expect("seed write");
    }

    /// Seeds every branch for one item: an input archive, an output file,
    /// a control file, a metadata record and a `processed` message.
    pub async fn seed_item(&self, id: &WorkItemId) {
        self.seed(&format!("inputs/{id}.tar.gz"), Bytes::from_static(b"tgz"))
            .await;
        self.seed(&format!("outputs/{id}/{id}_drz.fits"), Bytes::from_static(b"fits"))
            .await;
        self.seed(&format!("control/{id}/env"), Bytes::from_static(b"env"))
            .await;
        self.seed(&format!("metadata/{id}.json"), Bytes::from_static(b"{}"))
            .await;
        self.seed(&format!("messages/processed-{id}.trigger"), Bytes::new())
            .await;
    }

    /// Returns stored paths under this root, root-relative and sorted.
    #[must_use]
    pub fn relative_paths(&self) -> Vec<String> {
        let prefix = format!("{}/", self.root);
        self.storage
            .paths()
            .into_iter()
            .filter_map(|p| p.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns `n` distinct work item ids in domain shape.
#[must_use]
pub fn work_item_ids(n: usize) -> Vec<WorkItemId> {
    (0..n)
        .map(|i| WorkItemId::new(format!("iacs{i:05}q")).expect("valid id"))
        .collect()
}

/// Parses one work item id.
#[must_use]
pub fn work_item_id(id: &str) -> WorkItemId {
    WorkItemId::new(id).expect("valid id")
}
