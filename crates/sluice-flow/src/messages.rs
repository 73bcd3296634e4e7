//! Typed lifecycle messages over blob storage.
//!
//! A lifecycle message is one object under `messages/` named `{type}-{id}`.
//! The object's presence is the signal; its body is an optional payload. At
//! most one object exists per `(type, id)` pair and writes are last-write-wins.
//!
//! ## Prefix expansion
//!
//! Selectors are expanded deterministically, in [`MessageType::ALL`] order:
//!
//! | input | expands to |
//! |---|---|
//! | `all` | every type, bare |
//! | `all-<id>` | `<type>-<id>` for every type |
//! | `<type>-all` or `<type>` | bare `<type>` |
//! | `<type>-<id>` | itself |
//!
//! A bare type matches every id currently stored under that type.
//!
//! ## Trigger suffixes
//!
//! Some message types are consumed by an external event subscription that
//! filters on object-name suffix. [`MessageEncoding`] appends the configured
//! suffix on write and strips it on read and list, so callers only ever see
//! `type-id` keys.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sluice_core::id::ALL;
use sluice_core::{ScopedStorage, WorkItemId};

use crate::branch::Branch;
use crate::codec::{self, Codec, JsonCodec};
use crate::error::{Error, Result};
use crate::metrics::SluiceMetrics;

/// The fixed vocabulary of lifecycle message types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Carrier for a broadcast envelope.
    Broadcast,
    /// Inputs are in place; the item is ready to submit.
    Placed,
    /// The item should be planned and submitted.
    Submit,
    /// A job for the item is running.
    Processing,
    /// The job finished successfully.
    Processed,
    /// The job failed.
    Error,
    /// Ingesting outputs failed.
    Ingesterror,
    /// Outputs were ingested.
    Ingested,
    /// The item was cancelled and its job stopped.
    Terminated,
    /// Request to cancel the item.
    Cancel,
    /// Request to retry a failed item.
    Rescue,
    /// Request to tear down the item's storage.
    Clean,
}

impl MessageType {
    /// Every message type, in canonical order.
    pub const ALL: [Self; 12] = [
        Self::Broadcast,
        Self::Placed,
        Self::Submit,
        Self::Processing,
        Self::Processed,
        Self::Error,
        Self::Ingesterror,
        Self::Ingested,
        Self::Terminated,
        Self::Cancel,
        Self::Rescue,
        Self::Clean,
    ];

    /// Returns the wire name of this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Placed => "placed",
            Self::Submit => "submit",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Error => "error",
            Self::Ingesterror => "ingesterror",
            Self::Ingested => "ingested",
            Self::Terminated => "terminated",
            Self::Cancel => "cancel",
            Self::Rescue => "rescue",
            Self::Clean => "clean",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown message type '{s}'")))
    }
}

/// Address of one concrete lifecycle message.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageKey {
    kind: MessageType,
    id: WorkItemId,
}

impl MessageKey {
    /// Creates a message key.
    #[must_use]
    pub const fn new(kind: MessageType, id: WorkItemId) -> Self {
        Self { kind, id }
    }

    /// Returns the message type.
    #[must_use]
    pub const fn kind(&self) -> MessageType {
        self.kind
    }

    /// Returns the work item id.
    #[must_use]
    pub const fn id(&self) -> &WorkItemId {
        &self.id
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.id)
    }
}

impl FromStr for MessageKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s
            .split_once('-')
            .ok_or_else(|| Error::validation(format!("message key '{s}' is not type-id")))?;
        Ok(Self::new(kind.parse()?, WorkItemId::new(id)?))
    }
}

impl TryFrom<String> for MessageKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MessageKey> for String {
    fn from(key: MessageKey) -> Self {
        key.to_string()
    }
}

/// A message selector before expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePrefix {
    /// `all`: every message of every type.
    All,
    /// `all-<id>`: every type for one id.
    AllFor(WorkItemId),
    /// `<type>` or `<type>-all`: every id of one type.
    Type(MessageType),
    /// `<type>-<id>`: one concrete message.
    Exact(MessageKey),
}

impl MessagePrefix {
    /// Parses a textual selector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for unknown types or malformed ids.
    pub fn parse(selector: &str) -> Result<Self> {
        if selector == ALL {
            return Ok(Self::All);
        }
        match selector.split_once('-') {
            None => Ok(Self::Type(selector.parse()?)),
            Some((ALL, ALL)) => Ok(Self::All),
            Some((ALL, id)) => Ok(Self::AllFor(WorkItemId::new(id)?)),
            Some((kind, ALL)) => Ok(Self::Type(kind.parse()?)),
            Some((kind, id)) => Ok(Self::Exact(MessageKey::new(
                kind.parse()?,
                WorkItemId::new(id)?,
            ))),
        }
    }

    /// Expands the selector into storage-level listing prefixes.
    #[must_use]
    pub fn expand(&self) -> Vec<ListPrefix> {
        match self {
            Self::All => MessageType::ALL.into_iter().map(ListPrefix::Type).collect(),
            Self::AllFor(id) => MessageType::ALL
                .into_iter()
                .map(|kind| ListPrefix::Key(MessageKey::new(kind, id.clone())))
                .collect(),
            Self::Type(kind) => vec![ListPrefix::Type(*kind)],
            Self::Exact(key) => vec![ListPrefix::Key(key.clone())],
        }
    }
}

impl FromStr for MessagePrefix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<MessageType> for MessagePrefix {
    fn from(kind: MessageType) -> Self {
        Self::Type(kind)
    }
}

impl From<MessageKey> for MessagePrefix {
    fn from(key: MessageKey) -> Self {
        Self::Exact(key)
    }
}

impl From<WorkItemId> for MessagePrefix {
    fn from(id: WorkItemId) -> Self {
        Self::AllFor(id)
    }
}

/// One expanded listing prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListPrefix {
    /// Bare type: matches every id of this type.
    Type(MessageType),
    /// One concrete key.
    Key(MessageKey),
}

impl fmt::Display for ListPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(kind) => write!(f, "{kind}"),
            Self::Key(key) => write!(f, "{key}"),
        }
    }
}

/// Per-type object-name encoding rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEncoding {
    suffixes: BTreeMap<MessageType, String>,
}

impl Default for MessageEncoding {
    /// `processed` messages carry `.trigger` for the ingest subscription.
    fn default() -> Self {
        Self::none().with_suffix(MessageType::Processed, ".trigger")
    }
}

impl MessageEncoding {
    /// An encoding with no suffix rules.
    #[must_use]
    pub fn none() -> Self {
        Self {
            suffixes: BTreeMap::new(),
        }
    }

    /// Adds or replaces the suffix for one type.
    #[must_use]
    pub fn with_suffix(mut self, kind: MessageType, suffix: impl Into<String>) -> Self {
        self.suffixes.insert(kind, suffix.into());
        self
    }

    /// Returns the suffix configured for a type.
    #[must_use]
    pub fn suffix(&self, kind: MessageType) -> &str {
        self.suffixes.get(&kind).map_or("", String::as_str)
    }

    /// Returns the stored object name for a key.
    #[must_use]
    pub fn object_name(&self, key: &MessageKey) -> String {
        format!("{key}{}", self.suffix(key.kind()))
    }

    /// Recovers the key from a stored object name.
    ///
    /// Returns `None` for names that are not lifecycle messages, including
    /// names missing the suffix configured for their type. Such objects cannot
    /// be addressed by key, so they are never reported.
    #[must_use]
    pub fn decode_object_name(&self, name: &str) -> Option<MessageKey> {
        let (kind, rest) = name.split_once('-')?;
        let kind: MessageType = kind.parse().ok()?;
        let id = rest.strip_suffix(self.suffix(kind))?;
        WorkItemId::new(id).ok().map(|id| MessageKey::new(kind, id))
    }
}

/// Typed, addressable lifecycle messages over rooted blob storage.
#[derive(Debug, Clone)]
pub struct MessageStore {
    storage: ScopedStorage,
    codec: Arc<dyn Codec>,
    encoding: MessageEncoding,
    check_exists_before_delete: bool,
    metrics: SluiceMetrics,
}

impl MessageStore {
    /// Creates a message store with JSON payloads and default encoding rules.
    #[must_use]
    pub fn new(storage: ScopedStorage) -> Self {
        Self {
            storage,
            codec: Arc::new(JsonCodec),
            encoding: MessageEncoding::default(),
            check_exists_before_delete: true,
            metrics: SluiceMetrics::new(),
        }
    }

    /// Sets the payload codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Sets the object-name encoding rules.
    #[must_use]
    pub fn with_encoding(mut self, encoding: MessageEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets whether concrete deletes probe for existence first.
    #[must_use]
    pub const fn with_delete_probe(mut self, enabled: bool) -> Self {
        self.check_exists_before_delete = enabled;
        self
    }

    /// Sets the metrics recorder.
    #[must_use]
    pub fn with_metrics(mut self, metrics: SluiceMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the object-name encoding rules.
    #[must_use]
    pub fn encoding(&self) -> &MessageEncoding {
        &self.encoding
    }

    fn object_path(&self, key: &MessageKey) -> String {
        format!("{}{}", Branch::Messages.prefix(), self.encoding.object_name(key))
    }

    /// Writes one message.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the storage write fails.
    #[tracing::instrument(skip(self, payload), fields(key = %key))]
    pub async fn put_one(&self, key: &MessageKey, payload: &Value) -> Result<()> {
        let bytes = codec::encode_payload(self.codec.as_ref(), payload)?;
        self.storage.put_raw(&self.object_path(key), bytes).await?;
        self.metrics.record_message_written(key.kind().as_str());
        tracing::debug!("message written");
        Ok(())
    }

    /// Writes one message with the signal (empty) payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage write fails.
    pub async fn signal(&self, key: &MessageKey) -> Result<()> {
        self.put_one(key, &codec::signal()).await
    }

    /// Writes several messages sharing one payload.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; earlier writes are not rolled back.
    pub async fn put_shared(&self, keys: &[MessageKey], payload: &Value) -> Result<()> {
        for key in keys {
            self.put_one(key, payload).await?;
        }
        Ok(())
    }

    /// Writes several messages, each with its own payload.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; earlier writes are not rolled back.
    pub async fn put_many(&self, messages: &BTreeMap<MessageKey, Value>) -> Result<()> {
        for (key, payload) in messages {
            self.put_one(key, payload).await?;
        }
        Ok(())
    }

    /// Reads one message payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the message does not exist.
    pub async fn get_one(&self, key: &MessageKey) -> Result<Value> {
        let bytes = self.storage.get_raw(&self.object_path(key)).await?;
        codec::decode_payload(self.codec.as_ref(), &bytes)
    }

    /// Reads several message payloads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if any message does not exist.
    pub async fn get_many(&self, keys: &[MessageKey]) -> Result<BTreeMap<MessageKey, Value>> {
        let mut out = BTreeMap::new();
        for key in keys {
            out.insert(key.clone(), self.get_one(key).await?);
        }
        Ok(out)
    }

    /// Returns true if the message exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage lookup fails.
    pub async fn exists(&self, key: &MessageKey) -> Result<bool> {
        Ok(self
            .storage
            .head_raw(&self.object_path(key))
            .await?
            .is_some())
    }

    /// Lists existing messages matching a selector, in expansion order.
    ///
    /// # Errors
    ///
    /// Returns an error if a storage listing fails.
    pub async fn list(&self, prefix: &MessagePrefix) -> Result<Vec<MessageKey>> {
        let mut keys = Vec::new();
        for expanded in prefix.expand() {
            match expanded {
                ListPrefix::Key(key) => {
                    if self.exists(&key).await? {
                        keys.push(key);
                    }
                }
                ListPrefix::Type(kind) => keys.extend(self.list_type(kind).await?),
            }
        }
        Ok(keys)
    }

    /// Lists existing messages matching a selector, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns an error if a storage listing fails.
    pub async fn list_sorted(&self, prefix: &MessagePrefix) -> Result<Vec<MessageKey>> {
        let mut keys = self.list(prefix).await?;
        keys.sort_by_key(ToString::to_string);
        Ok(keys)
    }

    async fn list_type(&self, kind: MessageType) -> Result<Vec<MessageKey>> {
        let type_prefix = format!("{}{kind}-", Branch::Messages.prefix());
        let paths = self.storage.list(&type_prefix).await?;
        let mut keys: Vec<MessageKey> = paths
            .iter()
            .filter_map(|path| {
                let name = path.as_str().strip_prefix(Branch::Messages.prefix())?;
                let key = self.encoding.decode_object_name(name);
                if key.is_none() {
                    tracing::debug!(path = %path, "skipping non-message object");
                }
                key.filter(|k| k.kind() == kind)
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Deletes messages matching a selector using the configured probe setting.
    ///
    /// Returns the number of delete requests issued.
    ///
    /// # Errors
    ///
    /// Returns an error if a storage listing or delete fails.
    pub async fn delete(&self, prefix: &MessagePrefix) -> Result<usize> {
        self.delete_with(prefix, self.check_exists_before_delete)
            .await
    }

    /// Deletes messages matching a selector and returns the number of delete
    /// requests issued.
    ///
    /// Concrete keys are probed first when `check_exists_first` is set, which
    /// saves a delete call for each of the many `all-<id>` combinations that
    /// were never written. Bare types are always listed, then deleted.
    /// Deleting a message that is already gone is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if a storage listing or delete fails.
    #[tracing::instrument(skip(self), fields(delete_calls = tracing::field::Empty))]
    pub async fn delete_with(
        &self,
        prefix: &MessagePrefix,
        check_exists_first: bool,
    ) -> Result<usize> {
        let mut calls = 0;
        for expanded in prefix.expand() {
            match expanded {
                ListPrefix::Key(key) => {
                    if check_exists_first && !self.exists(&key).await? {
                        continue;
                    }
                    self.delete_key(&key).await?;
                    calls += 1;
                }
                ListPrefix::Type(kind) => {
                    for key in self.list_type(kind).await? {
                        self.delete_key(&key).await?;
                        calls += 1;
                    }
                }
            }
        }
        tracing::Span::current().record("delete_calls", calls);
        Ok(calls)
    }

    async fn delete_key(&self, key: &MessageKey) -> Result<()> {
        match self.storage.delete(&self.object_path(key)).await {
            Ok(()) => {
                self.metrics.record_message_deleted(key.kind().as_str());
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Moves a message to a new key, keeping its payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `from` does not exist.
    #[tracing::instrument(skip(self), fields(from = %from, to = %to))]
    pub async fn move_message(&self, from: &MessageKey, to: &MessageKey) -> Result<()> {
        self.storage
            .rename_raw(&self.object_path(from), &self.object_path(to))
            .await?;
        self.metrics.record_message_deleted(from.kind().as_str());
        self.metrics.record_message_written(to.kind().as_str());
        Ok(())
    }

    /// Returns ids with at least one message among the given types.
    ///
    /// # Errors
    ///
    /// Returns an error if a storage listing fails.
    pub async fn ids(&self, types: &[MessageType]) -> Result<BTreeSet<WorkItemId>> {
        let mut ids = BTreeSet::new();
        for kind in types {
            ids.extend(
                self.list_type(*kind)
                    .await?
                    .into_iter()
                    .map(|key| key.id().clone()),
            );
        }
        Ok(ids)
    }

    /// Returns ids with at least one message of any type.
    ///
    /// # Errors
    ///
    /// Returns an error if a storage listing fails.
    pub async fn ids_all(&self) -> Result<BTreeSet<WorkItemId>> {
        self.ids(&MessageType::ALL).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sluice_core::MemoryBackend;

    fn store() -> MessageStore {
        let storage = ScopedStorage::new(Arc::new(MemoryBackend::new()), "dev").unwrap();
        MessageStore::new(storage)
    }

    fn key(s: &str) -> MessageKey {
        s.parse().unwrap()
    }

    fn rendered(prefix: &str) -> Vec<String> {
        MessagePrefix::parse(prefix)
            .unwrap()
            .expand()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn expand_all_is_every_bare_type_in_order() {
        let expected: Vec<String> = MessageType::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(rendered("all"), expected);
        assert_eq!(expected.len(), 12);
        assert_eq!(expected[0], "broadcast");
        assert_eq!(expected[11], "clean");
    }

    #[test]
    fn expand_all_for_id_covers_twelve_types() {
        let expanded = rendered("all-X");
        assert_eq!(expanded.len(), 12);
        assert_eq!(expanded[0], "broadcast-X");
        assert_eq!(expanded[1], "placed-X");
        assert_eq!(expanded[11], "clean-X");
    }

    #[test]
    fn expand_type_forms() {
        assert_eq!(rendered("cancel-all"), vec!["cancel"]);
        assert_eq!(rendered("cancel"), vec!["cancel"]);
        assert_eq!(rendered("cancel-abc"), vec!["cancel-abc"]);
    }

    #[test]
    fn parse_rejects_unknown_types() {
        assert!(MessagePrefix::parse("bogus").is_err());
        assert!(MessagePrefix::parse("bogus-abc").is_err());
        assert!("placed".parse::<MessageKey>().is_err());
    }

    #[test]
    fn encoding_strips_trigger_suffix() {
        let encoding = MessageEncoding::default();
        let processed = key("processed-abc");
        assert_eq!(encoding.object_name(&processed), "processed-abc.trigger");
        assert_eq!(
            encoding.decode_object_name("processed-abc.trigger"),
            Some(processed)
        );
        assert_eq!(encoding.object_name(&key("placed-abc")), "placed-abc");
        assert_eq!(encoding.decode_object_name("nonsense"), None);
    }

    #[test]
    fn names_missing_their_suffix_are_not_messages() {
        let encoding = MessageEncoding::default();
        assert_eq!(encoding.decode_object_name("processed-abc"), None);
        assert_eq!(
            encoding.decode_object_name("placed-abc"),
            Some(key("placed-abc"))
        );
    }

    #[tokio::test]
    async fn unaddressable_trigger_objects_are_neither_listed_nor_counted() {
        let storage = ScopedStorage::new(Arc::new(MemoryBackend::new()), "dev").unwrap();
        storage
            .put_raw("messages/processed-a", bytes::Bytes::from_static(b"\"\""))
            .await
            .unwrap();
        let store = MessageStore::new(storage.clone());

        assert!(store.list(&MessagePrefix::All).await.unwrap().is_empty());
        assert_eq!(store.delete(&MessagePrefix::All).await.unwrap(), 0);
        assert!(storage.head_raw("messages/processed-a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn put_then_list_then_delete() {
        let store = store();
        for kind in MessageType::ALL {
            let k = MessageKey::new(kind, WorkItemId::new("iacs01t4q").unwrap());
            store.signal(&k).await.unwrap();

            let listed = store.list(&MessagePrefix::Type(kind)).await.unwrap();
            assert!(listed.contains(&k), "{k} listed after put");

            store.delete(&MessagePrefix::Exact(k.clone())).await.unwrap();
            let listed = store.list(&MessagePrefix::Type(kind)).await.unwrap();
            assert!(!listed.contains(&k), "{k} gone after delete");
        }
    }

    #[tokio::test]
    async fn payload_roundtrip_including_signal() {
        let store = store();
        let k = key("error-abc");
        store.put_one(&k, &json!({"reason": "oom"})).await.unwrap();
        assert_eq!(store.get_one(&k).await.unwrap(), json!({"reason": "oom"}));

        store.put_one(&k, &json!("")).await.unwrap();
        assert_eq!(store.get_one(&k).await.unwrap(), json!(""));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let err = store().get_one(&key("placed-zzz")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn processed_suffix_is_invisible_to_callers() {
        let store = store();
        let k = key("processed-abc");
        store.signal(&k).await.unwrap();

        assert_eq!(
            store.list(&MessagePrefix::Type(MessageType::Processed)).await.unwrap(),
            vec![k.clone()]
        );
        assert!(store.exists(&k).await.unwrap());
        assert_eq!(store.get_one(&k).await.unwrap(), json!(""));
    }

    #[tokio::test]
    async fn type_listing_does_not_bleed_between_types() {
        let store = store();
        store.signal(&key("error-abc")).await.unwrap();
        store.signal(&key("ingesterror-abc")).await.unwrap();

        let errors = store.list(&MessagePrefix::Type(MessageType::Error)).await.unwrap();
        assert_eq!(errors, vec![key("error-abc")]);
    }

    #[tokio::test]
    async fn put_many_and_get_many() {
        let store = store();
        let mut batch = BTreeMap::new();
        batch.insert(key("placed-a"), json!(1));
        batch.insert(key("placed-b"), json!({"x": true}));
        store.put_many(&batch).await.unwrap();

        let keys: Vec<_> = batch.keys().cloned().collect();
        assert_eq!(store.get_many(&keys).await.unwrap(), batch);
    }

    #[tokio::test]
    async fn delete_all_for_id_leaves_other_ids() {
        let store = store();
        store
            .put_shared(&[key("placed-a"), key("submit-a"), key("placed-b")], &json!(""))
            .await
            .unwrap();

        let deleted = store
            .delete(&MessagePrefix::parse("all-a").unwrap())
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(
            store.list(&MessagePrefix::All).await.unwrap(),
            vec![key("placed-b")]
        );
    }

    #[tokio::test]
    async fn delete_without_existence_check_counts_the_request_for_missing() {
        let store = store().with_delete_probe(false);
        let calls = store
            .delete(&MessagePrefix::parse("placed-a").unwrap())
            .await
            .unwrap();
        assert_eq!(calls, 1);
        assert!(store.list(&MessagePrefix::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ids_collects_across_types() {
        let store = store();
        store.signal(&key("placed-a")).await.unwrap();
        store.signal(&key("error-b")).await.unwrap();
        store.signal(&key("error-a")).await.unwrap();

        let errors = store.ids(&[MessageType::Error]).await.unwrap();
        assert_eq!(errors.len(), 2);
        let placed = store.ids(&[MessageType::Placed]).await.unwrap();
        assert_eq!(placed.into_iter().collect::<Vec<_>>(), vec![WorkItemId::new("a").unwrap()]);
        assert_eq!(store.ids_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_sorted_orders_by_key() {
        let store = store();
        for k in ["submit-b", "placed-b", "placed-a"] {
            store.signal(&key(k)).await.unwrap();
        }
        let sorted: Vec<String> = store
            .list_sorted(&MessagePrefix::All)
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(sorted, vec!["placed-a", "placed-b", "submit-b"]);
    }

    #[tokio::test]
    async fn move_message_keeps_payload() {
        let store = store();
        store
            .put_one(&key("error-a"), &json!({"exit_code": 32}))
            .await
            .unwrap();
        store
            .move_message(&key("error-a"), &key("rescue-a"))
            .await
            .unwrap();

        assert!(!store.exists(&key("error-a")).await.unwrap());
        assert_eq!(
            store.get_one(&key("rescue-a")).await.unwrap(),
            json!({"exit_code": 32})
        );
    }
}
