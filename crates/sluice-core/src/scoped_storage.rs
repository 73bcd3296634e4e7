//! Deployment-rooted storage with a fixed branch layout.
//!
//! Every object a deployment touches lives under `{root}/`. The root is fixed
//! when the wrapper is built; callers only ever pass root-relative paths.
//!
//! # Security
//!
//! This module enforces strict path isolation:
//! - All paths are prefixed with the deployment root
//! - Path traversal attempts (`..`) are rejected
//! - The root is validated at construction

use bytes::Bytes;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::storage::{ObjectMeta, StorageBackend};

/// Deployment-rooted storage wrapper.
///
/// Prefixes all paths with `{root}/`. Two wrappers over the same backend with
/// different roots never observe each other's objects.
#[derive(Clone)]
pub struct ScopedStorage {
    backend: Arc<dyn StorageBackend>,
    root: String,
}

impl std::fmt::Debug for ScopedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedStorage")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl ScopedStorage {
    /// Creates a new rooted storage wrapper.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` is invalid. Roots must be non-empty ASCII
    /// lowercase alphanumerics plus `-`, `_` and `.`, and must not be a
    /// relative path component.
    pub fn new(backend: Arc<dyn StorageBackend>, root: impl Into<String>) -> Result<Self> {
        let root = root.into();
        Self::validate_root(&root)?;
        Ok(Self { backend, root })
    }

    fn validate_root(root: &str) -> Result<()> {
        if root.is_empty() {
            return Err(Error::InvalidId {
                message: "storage root cannot be empty".into(),
            });
        }

        if root == "." || root == ".." {
            return Err(Error::InvalidId {
                message: format!("storage root cannot be '{root}'"),
            });
        }

        if !root.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')
        }) {
            return Err(Error::InvalidId {
                message: format!(
                    "storage root '{root}' contains invalid characters (allowed: a-z, 0-9, '-', '_', '.')"
                ),
            });
        }

        Ok(())
    }

    /// Validates a relative path for path traversal attacks.
    fn validate_path(path: &str) -> Result<()> {
        if path.starts_with('/') || path.starts_with('\\') {
            return Err(Error::InvalidInput(format!(
                "absolute paths not allowed: {path}"
            )));
        }

        if path.contains('\\') {
            return Err(Error::InvalidInput(format!(
                "backslashes not allowed in paths: {path}"
            )));
        }

        if path.contains('%') {
            return Err(Error::InvalidInput(format!(
                "percent-encoding not allowed in paths: {path}"
            )));
        }

        if path.contains('\n') || path.contains('\r') || path.contains('\0') {
            return Err(Error::InvalidInput(format!(
                "control characters not allowed in paths: {path}"
            )));
        }

        for segment in path.split('/') {
            if segment == "." || segment == ".." {
                return Err(Error::InvalidInput(format!(
                    "path traversal not allowed: {path}"
                )));
            }
        }

        Ok(())
    }

    /// Returns the deployment root.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Returns the backend for advanced operations.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Returns the backend path for a root-relative path.
    #[must_use]
    pub fn full_path(&self, path: &str) -> String {
        format!("{}/{}", self.root, path)
    }

    /// Reads data at a root-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path contains traversal sequences or the object is not found.
    pub async fn get_raw(&self, path: &str) -> Result<Bytes> {
        Self::validate_path(path)?;
        self.backend.get(&self.full_path(path)).await
    }

    /// Writes data at a root-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path contains traversal sequences.
    pub async fn put_raw(&self, path: &str, data: Bytes) -> Result<()> {
        Self::validate_path(path)?;
        self.backend.put(&self.full_path(path), data).await
    }

    /// Deletes data at a root-relative path. Missing objects are a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the path contains traversal sequences.
    pub async fn delete(&self, path: &str) -> Result<()> {
        Self::validate_path(path)?;
        self.backend.delete(&self.full_path(path)).await
    }

    /// Lists objects at a root-relative path prefix.
    ///
    /// Returns relative paths (without the root prefix).
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix contains traversal sequences.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ScopedPath>> {
        Self::validate_path(prefix)?;
        let full_prefix = self.full_path(prefix);
        let root_prefix = format!("{}/", self.root);

        let metas = self.backend.list(&full_prefix).await?;

        Ok(metas
            .into_iter()
            .filter_map(|m| {
                m.path
                    .strip_prefix(&root_prefix)
                    .map(|p| ScopedPath(p.to_string()))
            })
            .collect())
    }

    /// Gets metadata at a root-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path contains traversal sequences.
    pub async fn head_raw(&self, path: &str) -> Result<Option<ObjectMeta>> {
        Self::validate_path(path)?;
        self.backend.head(&self.full_path(path)).await
    }

    /// Moves an object between two root-relative paths.
    ///
    /// # Errors
    ///
    /// Returns an error if either path contains traversal sequences or the
    /// source object does not exist.
    pub async fn rename_raw(&self, from: &str, to: &str) -> Result<()> {
        Self::validate_path(from)?;
        Self::validate_path(to)?;
        self.backend
            .rename(&self.full_path(from), &self.full_path(to))
            .await
    }
}

/// A path relative to the deployment root, as returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopedPath(String);

impl ScopedPath {
    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the path, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ScopedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    #[test]
    fn test_full_path_is_rooted() {
        let backend = Arc::new(MemoryBackend::new());
        let storage = ScopedStorage::new(backend, "hst-processing-dev").unwrap();

        assert_eq!(
            storage.full_path("messages/placed-iacs01t4q"),
            "hst-processing-dev/messages/placed-iacs01t4q"
        );
        assert_eq!(storage.root(), "hst-processing-dev");
    }

    #[tokio::test]
    async fn test_root_isolation() {
        let backend = Arc::new(MemoryBackend::new());

        let dev = ScopedStorage::new(backend.clone(), "dev").unwrap();
        let ops = ScopedStorage::new(backend.clone(), "ops").unwrap();

        dev.put_raw("inputs/a.tar.gz", Bytes::from("dev"))
            .await
            .expect("put");
        ops.put_raw("inputs/a.tar.gz", Bytes::from("ops"))
            .await
            .expect("put");

        assert_eq!(dev.get_raw("inputs/a.tar.gz").await.unwrap(), Bytes::from("dev"));
        assert_eq!(ops.get_raw("inputs/a.tar.gz").await.unwrap(), Bytes::from("ops"));
        assert_eq!(dev.list("").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_strips_root() {
        let backend = Arc::new(MemoryBackend::new());
        let storage = ScopedStorage::new(backend, "dev").unwrap();

        storage
            .put_raw("outputs/abc/log.txt", Bytes::from("x"))
            .await
            .unwrap();

        let listed = storage.list("outputs/").await.unwrap();
        assert_eq!(listed, vec![ScopedPath("outputs/abc/log.txt".into())]);
    }

    #[tokio::test]
    async fn test_path_traversal_prevention() {
        let backend = Arc::new(MemoryBackend::new());
        let storage = ScopedStorage::new(backend, "dev").unwrap();

        let traversal_paths = [
            "../ops/messages/cancel-abc",
            "messages/../../escape.txt",
            "messages/%2e%2e/secret",
            "/absolute/path",
        ];

        for path in &traversal_paths {
            let result = storage
                .put_raw(path, Bytes::from("attack"))
                .await;
            assert!(result.is_err(), "path traversal must be rejected: {path}");
            assert!(storage.get_raw(path).await.is_err());
        }
    }

    #[tokio::test]
    async fn test_rename_within_root() {
        let backend = Arc::new(MemoryBackend::new());
        let storage = ScopedStorage::new(backend, "dev").unwrap();

        storage
            .put_raw("messages/error-a", Bytes::from("p"))
            .await
            .unwrap();
        storage
            .rename_raw("messages/error-a", "messages/rescue-a")
            .await
            .unwrap();

        assert!(storage.head_raw("messages/error-a").await.unwrap().is_none());
        assert!(storage.head_raw("messages/rescue-a").await.unwrap().is_some());
    }

    #[test]
    fn test_invalid_roots_rejected() {
        for root in ["", "..", "Upper", "with/slash", "with space"] {
            let backend = Arc::new(MemoryBackend::new());
            assert!(ScopedStorage::new(backend, root).is_err(), "root {root:?}");
        }
    }
}
