//! The IO bundle: every branch of one deployment root behind one handle.
//!
//! Handlers build an [`IoBundle`] per invocation. Construction refuses to
//! operate on a root other than the deployment's own, so a trigger routed to
//! the wrong deployment fails before touching anything.
//!
//! ## Reset and clean
//!
//! | operation | messages | outputs | metadata | control | inputs |
//! |---|---|---|---|---|---|
//! | `reset` | deleted | deleted | deleted | kept | kept |
//! | `clean` | deleted | deleted | deleted | deleted | deleted |
//!
//! Each branch is cleared independently. A failure in one branch is logged,
//! counted and reported in the [`CleanupReport`]; the remaining branches are
//! still cleared.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;

use sluice_core::{ScopedStorage, StorageBackend, WorkItemId};

use crate::branch::{BlobBranch, Branch, BranchSelector, IdSelector};
use crate::broadcast::BroadcastCoordinator;
use crate::config::SluiceConfig;
use crate::error::{Error, Result};
use crate::escalation::EscalationPolicy;
use crate::lifecycle::check_transition;
use crate::messages::{MessageKey, MessagePrefix, MessageStore, MessageType};
use crate::metadata::MetadataStore;
use crate::metrics::SluiceMetrics;
use crate::planner::Planner;

/// One branch that failed during reset or clean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchFailure {
    /// The branch that failed.
    pub branch: Branch,
    /// The error, rendered.
    pub error: String,
}

/// Outcome of a reset or clean.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Delete requests issued per branch that succeeded.
    ///
    /// Objects that were already gone still count unless an existence check
    /// skipped them, so this is an upper bound on what was removed.
    pub delete_calls: BTreeMap<Branch, usize>,
    /// Branches that failed.
    pub failures: Vec<BranchFailure>,
}

impl CleanupReport {
    /// Returns true if every branch was cleared.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total delete requests issued.
    #[must_use]
    pub fn total_delete_calls(&self) -> usize {
        self.delete_calls.values().sum()
    }
}

/// All branches of one deployment root.
#[derive(Debug, Clone)]
pub struct IoBundle {
    storage: ScopedStorage,
    messages: MessageStore,
    inputs: BlobBranch,
    outputs: BlobBranch,
    control: BlobBranch,
    metadata: MetadataStore,
    broadcaster: BroadcastCoordinator,
    planner: Planner,
    escalation: EscalationPolicy,
    metrics: SluiceMetrics,
}

impl IoBundle {
    /// Builds a bundle over the deployment's own root.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_config(backend: Arc<dyn StorageBackend>, config: &SluiceConfig) -> Result<Self> {
        Self::new(backend, &config.deployment_root, config)
    }

    /// Builds a bundle over `root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CrossEnvironment`] if `root` is not the configured
    /// deployment root, or a configuration error for invalid settings.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        root: &str,
        config: &SluiceConfig,
    ) -> Result<Self> {
        if root != config.deployment_root {
            tracing::error!(
                root,
                expected = %config.deployment_root,
                "refusing cross-environment bundle"
            );
            return Err(Error::CrossEnvironment {
                expected: config.deployment_root.clone(),
                actual: root.to_string(),
            });
        }

        let storage = ScopedStorage::new(backend, root)?;
        let metrics = SluiceMetrics::new();
        let codec = config.codec.build();

        let messages = MessageStore::new(storage.clone())
            .with_codec(Arc::clone(&codec))
            .with_encoding(config.encoding.clone())
            .with_delete_probe(config.check_exists_before_delete)
            .with_metrics(metrics.clone());
        let metadata = MetadataStore::new(storage.clone())
            .with_codec(codec)
            .with_metrics(metrics.clone());
        let broadcaster = BroadcastCoordinator::new(messages.clone(), config.broadcast.clone())?
            .with_metrics(metrics.clone());
        let planner =
            Planner::new(root, config.planner.clone())?.with_metrics(metrics.clone());

        Ok(Self {
            inputs: BlobBranch::new(storage.clone(), Branch::Inputs),
            outputs: BlobBranch::new(storage.clone(), Branch::Outputs),
            control: BlobBranch::new(storage.clone(), Branch::Control),
            storage,
            messages,
            metadata,
            broadcaster,
            planner,
            escalation: config.escalation.clone(),
            metrics,
        })
    }

    /// Returns the storage root.
    #[must_use]
    pub fn root(&self) -> &str {
        self.storage.root()
    }

    /// Returns the message store.
    #[must_use]
    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// Returns the inputs branch.
    #[must_use]
    pub fn inputs(&self) -> &BlobBranch {
        &self.inputs
    }

    /// Returns the outputs branch.
    #[must_use]
    pub fn outputs(&self) -> &BlobBranch {
        &self.outputs
    }

    /// Returns the control branch.
    #[must_use]
    pub fn control(&self) -> &BlobBranch {
        &self.control
    }

    /// Returns the control-metadata store.
    #[must_use]
    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Returns the broadcast coordinator sharing this bundle's message store.
    #[must_use]
    pub fn broadcaster(&self) -> &BroadcastCoordinator {
        &self.broadcaster
    }

    /// Returns the planner for this root.
    #[must_use]
    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Returns the escalation policy.
    #[must_use]
    pub fn escalation(&self) -> &EscalationPolicy {
        &self.escalation
    }

    pub(crate) fn metrics(&self) -> &SluiceMetrics {
        &self.metrics
    }

    fn blob_branch(&self, branch: Branch) -> BlobBranch {
        match branch {
            Branch::Inputs => self.inputs.clone(),
            Branch::Outputs => self.outputs.clone(),
            Branch::Control => self.control.clone(),
            Branch::Messages | Branch::Metadata => BlobBranch::new(self.storage.clone(), branch),
        }
    }

    /// Returns ids visible in the selected branches.
    ///
    /// Broadcast envelopes are carriers, not work items, and are excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if a listing fails.
    pub async fn ids(&self, selector: BranchSelector) -> Result<BTreeSet<WorkItemId>> {
        let mut ids = BTreeSet::new();
        for branch in selector.branches() {
            match branch {
                Branch::Messages => {
                    let lifecycle: Vec<MessageType> = MessageType::ALL
                        .into_iter()
                        .filter(|kind| *kind != MessageType::Broadcast)
                        .collect();
                    ids.extend(self.messages.ids(&lifecycle).await?);
                }
                Branch::Metadata => ids.extend(self.metadata.ids().await?),
                other => ids.extend(self.blob_branch(other).ids().await?),
            }
        }
        Ok(ids)
    }

    /// Deletes outputs, lifecycle messages and metadata for the selected ids.
    ///
    /// Inputs and control files are kept, so the items can be resubmitted.
    pub async fn reset(&self, ids: &IdSelector) -> CleanupReport {
        let _timer = self.metrics.time_operation("reset");
        let mut report = CleanupReport::default();
        for branch in [Branch::Outputs, Branch::Messages, Branch::Metadata] {
            self.clear_branch(branch, ids, &mut report).await;
        }
        tracing::info!(
            delete_calls = report.total_delete_calls(),
            failures = report.failures.len(),
            "reset complete"
        );
        report
    }

    /// Deletes everything stored for the selected ids.
    pub async fn clean(&self, ids: &IdSelector) -> CleanupReport {
        let _timer = self.metrics.time_operation("clean");
        let mut report = self.reset(ids).await;
        for branch in [Branch::Control, Branch::Inputs] {
            self.clear_branch(branch, ids, &mut report).await;
        }
        tracing::info!(
            delete_calls = report.total_delete_calls(),
            failures = report.failures.len(),
            "clean complete"
        );
        report
    }

    async fn clear_branch(&self, branch: Branch, ids: &IdSelector, report: &mut CleanupReport) {
        match self.delete_branch(branch, ids).await {
            Ok(count) => {
                report.delete_calls.insert(branch, count);
            }
            Err(e) => {
                tracing::warn!(branch = %branch, error = %e, "branch cleanup failed, continuing");
                self.metrics.record_cleanup_failure(branch.as_str());
                report.failures.push(BranchFailure {
                    branch,
                    error: e.to_string(),
                });
            }
        }
    }

    async fn delete_branch(&self, branch: Branch, ids: &IdSelector) -> Result<usize> {
        match (branch, ids) {
            (Branch::Messages, IdSelector::All) => self.messages.delete(&MessagePrefix::All).await,
            (Branch::Messages, IdSelector::Ids(ids)) => {
                let mut calls = 0;
                for id in ids {
                    calls += self
                        .messages
                        .delete(&MessagePrefix::AllFor(id.clone()))
                        .await?;
                }
                Ok(calls)
            }
            (Branch::Metadata, _) => {
                let targets: Vec<WorkItemId> = match ids {
                    IdSelector::All => self.metadata.ids().await?.into_iter().collect(),
                    IdSelector::Ids(ids) => ids.clone(),
                };
                for id in &targets {
                    self.metadata.delete(id).await?;
                }
                Ok(targets.len())
            }
            (other, ids) => self.blob_branch(other).delete(ids).await,
        }
    }

    /// Writes one signal message of `kind` per selected id.
    ///
    /// `All` resolves to the ids that have inputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for `broadcast`, whose messages are
    /// envelopes written by the broadcast coordinator. Otherwise returns the
    /// first write error; earlier messages stay written.
    pub async fn send(&self, kind: MessageType, ids: &IdSelector) -> Result<Vec<MessageKey>> {
        if kind == MessageType::Broadcast {
            return Err(Error::validation(
                "broadcast messages are envelopes and cannot be sent as signals",
            ));
        }
        let targets: Vec<WorkItemId> = match ids {
            IdSelector::All => self.inputs.ids().await?.into_iter().collect(),
            IdSelector::Ids(ids) => ids.clone(),
        };
        let keys: Vec<MessageKey> = targets
            .into_iter()
            .map(|id| MessageKey::new(kind, id))
            .collect();
        for key in &keys {
            self.messages.signal(key).await?;
        }
        tracing::info!(kind = %kind, count = keys.len(), "messages sent");
        Ok(keys)
    }

    /// Lists every object of the selected ids across all branches.
    ///
    /// Messages are listed by key, without encoding suffixes.
    ///
    /// # Errors
    ///
    /// Returns an error if any listing fails.
    pub async fn list_all(&self, ids: &IdSelector) -> Result<Vec<String>> {
        let mut listing = Vec::new();
        let message_prefixes: Vec<MessagePrefix> = match ids {
            IdSelector::All => vec![MessagePrefix::All],
            IdSelector::Ids(ids) => ids.iter().cloned().map(MessagePrefix::AllFor).collect(),
        };
        for prefix in &message_prefixes {
            listing.extend(
                self.messages
                    .list(prefix)
                    .await?
                    .into_iter()
                    .map(|key| format!("{}{key}", Branch::Messages.prefix())),
            );
        }
        for branch in [Branch::Inputs, Branch::Outputs, Branch::Control, Branch::Metadata] {
            listing.extend(
                self.blob_branch(branch)
                    .list(ids)
                    .await?
                    .into_iter()
                    .map(sluice_core::ScopedPath::into_string),
            );
        }
        Ok(listing)
    }

    /// Moves an item from one lifecycle state to the next.
    ///
    /// Writes `to` with the payload, then consumes `from`. A missing `from`
    /// message is tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] for moves the state machine
    /// does not allow, or any storage error.
    #[tracing::instrument(skip(self, payload), fields(work_item_id = %id, from = %from, to = %to))]
    pub async fn transition(
        &self,
        id: &WorkItemId,
        from: MessageType,
        to: MessageType,
        payload: &Value,
    ) -> Result<()> {
        check_transition(from, to)?;
        self.messages
            .put_one(&MessageKey::new(to, id.clone()), payload)
            .await?;
        self.messages
            .delete(&MessagePrefix::Exact(MessageKey::new(from, id.clone())))
            .await?;
        Ok(())
    }
}
