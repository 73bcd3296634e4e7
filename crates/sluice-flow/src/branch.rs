//! Storage branches and key-prefixed blob stores.
//!
//! A deployment root holds five branches:
//!
//! ```text
//! {root}/
//! ├── messages/{type}-{id}[suffix]
//! ├── inputs/{id}.tar.gz
//! ├── outputs/{id}/...
//! ├── control/{id}/...
//! └── metadata/{id}{ext}
//! ```
//!
//! Inputs, outputs and control share the same mechanics: objects are keyed
//! by a leading work item id followed by `/` or `.`, and ids are recovered
//! from listings by reading that leading segment.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use sluice_core::id::ALL;
use sluice_core::{ScopedPath, ScopedStorage, WorkItemId};

use crate::error::{Error, Result};

/// One of the five storage branches under a deployment root.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    /// Lifecycle messages.
    Messages,
    /// Input archives.
    Inputs,
    /// Job outputs.
    Outputs,
    /// Free-form control inputs.
    Control,
    /// Control-metadata records.
    Metadata,
}

impl Branch {
    /// Every branch, in listing order.
    pub const ALL: [Self; 5] = [
        Self::Messages,
        Self::Inputs,
        Self::Outputs,
        Self::Control,
        Self::Metadata,
    ];

    /// Returns the branch name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Inputs => "inputs",
            Self::Outputs => "outputs",
            Self::Control => "control",
            Self::Metadata => "metadata",
        }
    }

    /// Returns the root-relative prefix, including the trailing `/`.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Messages => "messages/",
            Self::Inputs => "inputs/",
            Self::Outputs => "outputs/",
            Self::Control => "control/",
            Self::Metadata => "metadata/",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Branch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown branch '{s}'")))
    }
}

/// Selects which branches an operation spans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BranchSelector {
    /// Every branch.
    #[default]
    All,
    /// A single branch.
    Only(Branch),
}

impl BranchSelector {
    /// Returns the selected branches.
    #[must_use]
    pub fn branches(self) -> Vec<Branch> {
        match self {
            Self::All => Branch::ALL.to_vec(),
            Self::Only(branch) => vec![branch],
        }
    }
}

impl From<Branch> for BranchSelector {
    fn from(branch: Branch) -> Self {
        Self::Only(branch)
    }
}

impl FromStr for BranchSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == ALL {
            Ok(Self::All)
        } else {
            s.parse().map(Self::Only)
        }
    }
}

/// Selects which work items an operation spans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IdSelector {
    /// Every id present in the branch.
    #[default]
    All,
    /// An explicit set of ids.
    Ids(Vec<WorkItemId>),
}

impl IdSelector {
    /// Selects one id.
    #[must_use]
    pub fn one(id: WorkItemId) -> Self {
        Self::Ids(vec![id])
    }

    /// Returns true if the id is selected.
    #[must_use]
    pub fn matches(&self, id: &WorkItemId) -> bool {
        match self {
            Self::All => true,
            Self::Ids(ids) => ids.contains(id),
        }
    }
}

impl From<WorkItemId> for IdSelector {
    fn from(id: WorkItemId) -> Self {
        Self::one(id)
    }
}

impl From<Vec<WorkItemId>> for IdSelector {
    fn from(ids: Vec<WorkItemId>) -> Self {
        Self::Ids(ids)
    }
}

/// Recovers the leading work item id from a branch-relative object name.
///
/// The id runs up to the first `/` or `.`. Returns `None` when that segment
/// is not a valid id.
#[must_use]
pub fn leading_id(name: &str) -> Option<WorkItemId> {
    let end = name.find(['/', '.']).unwrap_or(name.len());
    WorkItemId::new(&name[..end]).ok()
}

/// A key-prefixed blob store for one branch.
#[derive(Debug, Clone)]
pub struct BlobBranch {
    storage: ScopedStorage,
    branch: Branch,
}

impl BlobBranch {
    /// Creates a store over one branch of the deployment root.
    #[must_use]
    pub const fn new(storage: ScopedStorage, branch: Branch) -> Self {
        Self { storage, branch }
    }

    /// Returns the branch this store covers.
    #[must_use]
    pub const fn branch(&self) -> Branch {
        self.branch
    }

    fn path(&self, name: &str) -> String {
        format!("{}{name}", self.branch.prefix())
    }

    /// Returns the conventional input archive name for an id.
    #[must_use]
    pub fn archive_name(id: &WorkItemId) -> String {
        format!("{id}.tar.gz")
    }

    /// Writes an object under this branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the write fails.
    pub async fn put(&self, name: &str, data: Bytes) -> Result<()> {
        self.storage.put_raw(&self.path(name), data).await?;
        Ok(())
    }

    /// Reads an object from this branch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the object does not exist.
    pub async fn get(&self, name: &str) -> Result<Bytes> {
        Ok(self.storage.get_raw(&self.path(name)).await?)
    }

    /// Lists objects belonging to the selected ids, as root-relative paths.
    ///
    /// # Errors
    ///
    /// Returns an error if a storage listing fails.
    pub async fn list(&self, ids: &IdSelector) -> Result<Vec<ScopedPath>> {
        let prefix = self.branch.prefix();
        let mut paths = Vec::new();
        match ids {
            IdSelector::All => paths.extend(self.storage.list(prefix).await?),
            IdSelector::Ids(ids) => {
                for id in ids {
                    let candidates = self.storage.list(&self.path(id.as_str())).await?;
                    // `abc` must not pick up `abcd/...`.
                    paths.extend(candidates.into_iter().filter(|p| {
                        p.as_str()
                            .strip_prefix(prefix)
                            .and_then(leading_id)
                            .is_some_and(|found| &found == id)
                    }));
                }
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Deletes every object belonging to the selected ids.
    ///
    /// Returns the number of delete requests issued, one per listed object.
    ///
    /// # Errors
    ///
    /// Returns an error if a listing or delete fails.
    #[tracing::instrument(skip(self), fields(branch = %self.branch))]
    pub async fn delete(&self, ids: &IdSelector) -> Result<usize> {
        let paths = self.list(ids).await?;
        for path in &paths {
            self.storage.delete(path.as_str()).await?;
        }
        tracing::debug!(deleted = paths.len(), "branch objects deleted");
        Ok(paths.len())
    }

    /// Returns the ids with at least one object in this branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage listing fails.
    pub async fn ids(&self) -> Result<BTreeSet<WorkItemId>> {
        let prefix = self.branch.prefix();
        Ok(self
            .storage
            .list(prefix)
            .await?
            .iter()
            .filter_map(|p| p.as_str().strip_prefix(prefix).and_then(leading_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sluice_core::MemoryBackend;

    fn branch(kind: Branch) -> BlobBranch {
        let storage = ScopedStorage::new(Arc::new(MemoryBackend::new()), "dev").unwrap();
        BlobBranch::new(storage, kind)
    }

    fn id(s: &str) -> WorkItemId {
        WorkItemId::new(s).unwrap()
    }

    #[test]
    fn leading_id_stops_at_separator() {
        assert_eq!(leading_id("abc.tar.gz"), Some(id("abc")));
        assert_eq!(leading_id("abc/x/y.fits"), Some(id("abc")));
        assert_eq!(leading_id("abc"), Some(id("abc")));
        assert_eq!(leading_id(".hidden"), None);
    }

    #[test]
    fn branch_selector_parses() {
        assert_eq!("all".parse::<BranchSelector>().unwrap(), BranchSelector::All);
        assert_eq!(
            "outputs".parse::<BranchSelector>().unwrap(),
            BranchSelector::Only(Branch::Outputs)
        );
        assert!("nowhere".parse::<BranchSelector>().is_err());
        assert_eq!(BranchSelector::All.branches().len(), 5);
    }

    #[tokio::test]
    async fn list_by_id_does_not_match_longer_ids() {
        let outputs = branch(Branch::Outputs);
        outputs.put("abc/a.fits", Bytes::from("1")).await.unwrap();
        outputs.put("abcd/b.fits", Bytes::from("2")).await.unwrap();

        let listed = outputs.list(&IdSelector::one(id("abc"))).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].as_str(), "outputs/abc/a.fits");
    }

    #[tokio::test]
    async fn ids_reads_archive_names() {
        let inputs = branch(Branch::Inputs);
        for name in ["a.tar.gz", "b.tar.gz"] {
            inputs.put(name, Bytes::from_static(b"tgz")).await.unwrap();
        }
        let ids: Vec<_> = inputs.ids().await.unwrap().into_iter().collect();
        assert_eq!(ids, vec![id("a"), id("b")]);
        assert_eq!(BlobBranch::archive_name(&id("a")), "a.tar.gz");
    }

    #[tokio::test]
    async fn delete_removes_only_selected_ids() {
        let control = branch(Branch::Control);
        control.put("a/env", Bytes::from("x")).await.unwrap();
        control.put("a/memory", Bytes::from("y")).await.unwrap();
        control.put("b/env", Bytes::from("z")).await.unwrap();

        assert_eq!(control.delete(&IdSelector::one(id("a"))).await.unwrap(), 2);
        assert_eq!(
            control.ids().await.unwrap().into_iter().collect::<Vec<_>>(),
            vec![id("b")]
        );
        assert_eq!(control.delete(&IdSelector::All).await.unwrap(), 1);
        assert!(control.ids().await.unwrap().is_empty());
    }
}
