//! Fan-out of large signal batches.
//!
//! Writing thousands of lifecycle messages one after another from a single
//! handler is slow. A broadcast instead writes one envelope holding the full
//! message list. Each envelope is processed by its own trigger invocation,
//! which either delivers the messages (small batches) or splits the batch in
//! two new envelopes (large batches). Fan-out is therefore a binary tree of
//! depth `log2(n / threshold)`.
//!
//! ## Kill signal
//!
//! A dedicated message key (default `broadcast-kill`) stops fan-out
//! cooperatively. It is checked before processing an envelope and every
//! `kill_check_interval` deliveries. Envelopes already written keep existing
//! until processed; they abort when they see the signal.
//!
//! Delivery is at-most-once per envelope only in the weak sense: a trigger
//! that fires twice for the same envelope may deliver twice.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sluice_core::{EnvelopeId, WorkItemId};

use crate::error::{Error, Result};
use crate::messages::{MessageKey, MessagePrefix, MessageStore, MessageType};
use crate::metrics::SluiceMetrics;

/// Default envelope size above which processing bisects.
pub const DEFAULT_BIFURCATION_THRESHOLD: usize = 100;
/// Default number of deliveries between kill-signal checks.
pub const DEFAULT_KILL_CHECK_INTERVAL: usize = 10;
/// Default exclusive upper bound on ids per broadcast.
pub const DEFAULT_MAX_IDS: usize = 1_000_000;
/// Default id of the kill-signal message.
pub const DEFAULT_KILL_ID: &str = "kill";

/// Broadcast tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Envelopes with more messages than this are bisected.
    pub bifurcation_threshold: usize,
    /// Deliveries between kill-signal checks.
    pub kill_check_interval: usize,
    /// Broadcasts must carry fewer ids than this.
    pub max_ids: usize,
    /// Id of the `broadcast-<id>` kill-signal message.
    pub kill_id: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            bifurcation_threshold: DEFAULT_BIFURCATION_THRESHOLD,
            kill_check_interval: DEFAULT_KILL_CHECK_INTERVAL,
            max_ids: DEFAULT_MAX_IDS,
            kill_id: DEFAULT_KILL_ID.into(),
        }
    }
}

/// Batch of lifecycle messages sharing one payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    /// Concrete message keys to deliver.
    pub messages: Vec<MessageKey>,
    /// Payload written to every message.
    pub payload: Value,
}

/// What processing one envelope did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// The kill signal was present; nothing was delivered.
    Killed,
    /// The envelope was split into two child envelopes.
    Bifurcated {
        /// Envelope holding the first half.
        first: EnvelopeId,
        /// Envelope holding the remainder.
        second: EnvelopeId,
    },
    /// Every message was delivered.
    Delivered {
        /// Number of messages written.
        count: usize,
    },
    /// The kill signal appeared mid-delivery.
    Interrupted {
        /// Messages written before the signal was seen.
        delivered: usize,
        /// Messages left undelivered.
        remaining: usize,
    },
    /// The key was the kill signal itself.
    Ignored,
}

impl BroadcastOutcome {
    /// Returns the outcome name used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Killed => "killed",
            Self::Bifurcated { .. } => "bifurcated",
            Self::Delivered { .. } => "delivered",
            Self::Interrupted { .. } => "interrupted",
            Self::Ignored => "ignored",
        }
    }
}

/// Writes and processes broadcast envelopes.
#[derive(Debug, Clone)]
pub struct BroadcastCoordinator {
    messages: MessageStore,
    config: BroadcastConfig,
    kill_key: MessageKey,
    metrics: SluiceMetrics,
}

impl BroadcastCoordinator {
    /// Creates a coordinator over a message store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the kill id is not a valid id or
    /// the threshold or check interval is zero.
    pub fn new(messages: MessageStore, config: BroadcastConfig) -> Result<Self> {
        if config.bifurcation_threshold == 0 || config.kill_check_interval == 0 {
            return Err(Error::configuration(
                "broadcast threshold and kill check interval must be positive",
            ));
        }
        let kill_id = WorkItemId::new(config.kill_id.as_str())
            .map_err(|e| Error::configuration(format!("invalid broadcast kill id: {e}")))?;
        Ok(Self {
            messages,
            kill_key: MessageKey::new(MessageType::Broadcast, kill_id),
            config,
            metrics: SluiceMetrics::new(),
        })
    }

    /// Sets the metrics recorder.
    #[must_use]
    pub fn with_metrics(mut self, metrics: SluiceMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Returns the kill-signal message key.
    #[must_use]
    pub fn kill_key(&self) -> &MessageKey {
        &self.kill_key
    }

    /// Writes one envelope carrying `kind-id` for every id.
    ///
    /// The reserved selector `all` can never appear in `ids`; it is rejected
    /// when the ids are parsed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `kind` is `broadcast` or the batch
    /// reaches `max_ids`.
    #[tracing::instrument(skip(self, ids, payload), fields(kind = %kind, count = ids.len()))]
    pub async fn broadcast(
        &self,
        kind: MessageType,
        ids: &[WorkItemId],
        payload: &Value,
    ) -> Result<EnvelopeId> {
        if kind == MessageType::Broadcast {
            return Err(Error::validation("cannot broadcast broadcast messages"));
        }
        if ids.len() >= self.config.max_ids {
            return Err(Error::validation(format!(
                "broadcast of {} ids reaches the limit of {}",
                ids.len(),
                self.config.max_ids
            )));
        }
        let messages = ids
            .iter()
            .map(|id| MessageKey::new(kind, id.clone()))
            .collect();
        let envelope_id = self.write_envelope(messages, payload.clone()).await?;
        tracing::info!(envelope = %envelope_id, "broadcast envelope written");
        Ok(envelope_id)
    }

    async fn write_envelope(&self, messages: Vec<MessageKey>, payload: Value) -> Result<EnvelopeId> {
        let envelope_id = EnvelopeId::generate();
        let envelope = BroadcastEnvelope { messages, payload };
        let body = serde_json::to_value(&envelope)
            .map_err(|e| Error::serialization(format!("failed to encode envelope: {e}")))?;
        self.messages
            .put_one(&Self::envelope_key(&envelope_id), &body)
            .await?;
        Ok(envelope_id)
    }

    fn envelope_key(envelope_id: &EnvelopeId) -> MessageKey {
        MessageKey::new(MessageType::Broadcast, envelope_id.to_work_item_id())
    }

    /// Splits a message list into two envelopes: first half, then remainder.
    ///
    /// # Errors
    ///
    /// Returns an error if either envelope cannot be written.
    pub async fn bifurcate(
        &self,
        mut messages: Vec<MessageKey>,
        payload: &Value,
    ) -> Result<(EnvelopeId, EnvelopeId)> {
        let remainder = messages.split_off(messages.len() / 2);
        let first = self.write_envelope(messages, payload.clone()).await?;
        let second = self.write_envelope(remainder, payload.clone()).await?;
        Ok((first, second))
    }

    /// Consumes one envelope.
    ///
    /// The envelope is read and deleted before anything else happens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the envelope was already consumed, or
    /// any storage error from delivery.
    #[tracing::instrument(skip(self), fields(envelope = %envelope_id, outcome = tracing::field::Empty))]
    pub async fn process(&self, envelope_id: &WorkItemId) -> Result<BroadcastOutcome> {
        let key = MessageKey::new(MessageType::Broadcast, envelope_id.clone());
        let outcome = if key == self.kill_key {
            BroadcastOutcome::Ignored
        } else {
            let body = self.messages.get_one(&key).await?;
            self.messages
                .delete_with(&MessagePrefix::Exact(key), false)
                .await?;
            let envelope: BroadcastEnvelope = serde_json::from_value(body)
                .map_err(|e| Error::serialization(format!("malformed envelope: {e}")))?;
            self.dispatch(envelope).await?
        };
        tracing::Span::current().record("outcome", outcome.as_str());
        self.metrics.record_broadcast_outcome(outcome.as_str());
        Ok(outcome)
    }

    async fn dispatch(&self, envelope: BroadcastEnvelope) -> Result<BroadcastOutcome> {
        if self.is_killed().await? {
            tracing::warn!(dropped = envelope.messages.len(), "kill signal present");
            return Ok(BroadcastOutcome::Killed);
        }

        if envelope.messages.len() > self.config.bifurcation_threshold {
            let (first, second) = self.bifurcate(envelope.messages, &envelope.payload).await?;
            return Ok(BroadcastOutcome::Bifurcated { first, second });
        }

        let total = envelope.messages.len();
        for (i, key) in envelope.messages.iter().enumerate() {
            if i > 0 && i % self.config.kill_check_interval == 0 && self.is_killed().await? {
                tracing::warn!(delivered = i, remaining = total - i, "kill signal mid-delivery");
                self.metrics.record_broadcast_delivered(i);
                return Ok(BroadcastOutcome::Interrupted {
                    delivered: i,
                    remaining: total - i,
                });
            }
            self.messages.put_one(key, &envelope.payload).await?;
        }
        self.metrics.record_broadcast_delivered(total);
        Ok(BroadcastOutcome::Delivered { count: total })
    }

    /// Returns true if the kill signal is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the existence check fails.
    pub async fn is_killed(&self) -> Result<bool> {
        self.messages.exists(&self.kill_key).await
    }

    /// Raises the kill signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn kill(&self) -> Result<()> {
        tracing::warn!(key = %self.kill_key, "raising broadcast kill signal");
        self.messages.signal(&self.kill_key).await
    }

    /// Lowers the kill signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear_kill(&self) -> Result<()> {
        self.messages
            .delete_with(&MessagePrefix::Exact(self.kill_key.clone()), false)
            .await
            .map(|_| ())
    }

    /// Returns ids of envelopes currently waiting to be processed.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    pub async fn pending(&self) -> Result<Vec<WorkItemId>> {
        Ok(self
            .messages
            .list(&MessagePrefix::Type(MessageType::Broadcast))
            .await?
            .into_iter()
            .filter(|key| key != &self.kill_key)
            .map(|key| key.id().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use sluice_core::{MemoryBackend, ScopedStorage};

    fn coordinator() -> BroadcastCoordinator {
        let storage = ScopedStorage::new(Arc::new(MemoryBackend::new()), "dev").unwrap();
        BroadcastCoordinator::new(MessageStore::new(storage), BroadcastConfig::default()).unwrap()
    }

    fn ids(n: usize) -> Vec<WorkItemId> {
        (0..n)
            .map(|i| WorkItemId::new(format!("i{i:05}")).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn rejects_broadcast_of_broadcast() {
        let err = coordinator()
            .broadcast(MessageType::Broadcast, &ids(1), &json!(""))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn rejects_batches_at_the_ceiling() {
        let storage = ScopedStorage::new(Arc::new(MemoryBackend::new()), "dev").unwrap();
        let config = BroadcastConfig {
            max_ids: 3,
            ..BroadcastConfig::default()
        };
        let coordinator = BroadcastCoordinator::new(MessageStore::new(storage), config).unwrap();
        assert!(coordinator.broadcast(MessageType::Cancel, &ids(3), &json!("")).await.is_err());
        assert!(coordinator.broadcast(MessageType::Cancel, &ids(2), &json!("")).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let storage = ScopedStorage::new(Arc::new(MemoryBackend::new()), "dev").unwrap();
        let config = BroadcastConfig {
            kill_id: "all".into(),
            ..BroadcastConfig::default()
        };
        let err = BroadcastCoordinator::new(MessageStore::new(storage), config).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn large_envelope_bifurcates_first_half_then_remainder() {
        let coordinator = coordinator();
        let envelope = coordinator
            .broadcast(MessageType::Rescue, &ids(101), &json!(""))
            .await
            .unwrap();

        let outcome = coordinator.process(&envelope.to_work_item_id()).await.unwrap();
        let BroadcastOutcome::Bifurcated { first, second } = outcome else {
            panic!("expected bifurcation, got {outcome:?}");
        };
        assert_eq!(
            coordinator.process(&first.to_work_item_id()).await.unwrap(),
            BroadcastOutcome::Delivered { count: 50 }
        );
        assert_eq!(
            coordinator.process(&second.to_work_item_id()).await.unwrap(),
            BroadcastOutcome::Delivered { count: 51 }
        );
        assert!(coordinator.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn processing_twice_surfaces_not_found() {
        let coordinator = coordinator();
        let envelope = coordinator
            .broadcast(MessageType::Cancel, &ids(2), &json!(""))
            .await
            .unwrap()
            .to_work_item_id();
        coordinator.process(&envelope).await.unwrap();
        assert!(coordinator.process(&envelope).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn kill_key_is_ignored_and_kept() {
        let coordinator = coordinator();
        coordinator.kill().await.unwrap();
        let kill_id = coordinator.kill_key().id().clone();
        assert_eq!(
            coordinator.process(&kill_id).await.unwrap(),
            BroadcastOutcome::Ignored
        );
        assert!(coordinator.is_killed().await.unwrap());
        coordinator.clear_kill().await.unwrap();
        assert!(!coordinator.is_killed().await.unwrap());
    }

    #[tokio::test]
    async fn killed_envelope_is_consumed_without_delivery() {
        let coordinator = coordinator();
        let envelope = coordinator
            .broadcast(MessageType::Clean, &ids(5), &json!(""))
            .await
            .unwrap();
        coordinator.kill().await.unwrap();

        assert_eq!(
            coordinator.process(&envelope.to_work_item_id()).await.unwrap(),
            BroadcastOutcome::Killed
        );
        assert!(coordinator.pending().await.unwrap().is_empty());
    }
}
