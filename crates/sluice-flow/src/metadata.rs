//! Per-item control metadata.
//!
//! Each work item has at most one control-metadata record under
//! `metadata/{id}{ext}`. It is created at first submission, updated on every
//! failure and retry, and removed on terminal success or reset.
//!
//! Records are checked against a fixed field schema before every write and
//! after every read. Unknown fields and values of the wrong kind are
//! rejected with [`Error::Validation`].

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use sluice_core::{ScopedStorage, WorkItemId};

use crate::branch::{Branch, leading_id};
use crate::codec::{Codec, JsonCodec};
use crate::error::{Error, Result};
use crate::metrics::SluiceMetrics;

/// An untyped control-metadata record.
pub type MetadataRecord = Map<String, Value>;

/// The kind of value a schema field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// JSON `null`.
    Null,
    /// A boolean.
    Bool,
    /// A non-negative integer.
    Count,
    /// Any integer.
    Integer,
    /// A number strictly greater than zero.
    PositiveNumber,
    /// A string.
    String,
}

impl FieldKind {
    /// Returns true if `value` is of this kind.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Null => value.is_null(),
            Self::Bool => value.is_boolean(),
            Self::Count => value.is_u64(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::PositiveNumber => value.as_f64().is_some_and(|n| n > 0.0),
            Self::String => value.is_string(),
        }
    }
}

/// The control-metadata field schema.
pub const SCHEMA: &[(&str, &[FieldKind])] = &[
    ("job_id", &[FieldKind::String]),
    ("retries", &[FieldKind::Count]),
    ("memory_retries", &[FieldKind::Count]),
    ("memory_bin", &[FieldKind::Count, FieldKind::Null]),
    ("terminated", &[FieldKind::Bool]),
    ("timeout_scale", &[FieldKind::PositiveNumber]),
    ("ipppssoot", &[FieldKind::String]),
    ("bucket", &[FieldKind::String]),
    ("job_name", &[FieldKind::String]),
    ("exit_code", &[FieldKind::Integer, FieldKind::Null]),
    ("exit_reason", &[FieldKind::String, FieldKind::Null]),
    ("exit_status", &[FieldKind::String, FieldKind::Null]),
    ("status_reason", &[FieldKind::String, FieldKind::Null]),
    ("container_reason", &[FieldKind::String, FieldKind::Null]),
];

fn allowed_kinds(field: &str) -> Option<&'static [FieldKind]> {
    SCHEMA
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, kinds)| *kinds)
}

/// Validates a record against [`SCHEMA`].
///
/// `None` validates to the empty record. A valid record is returned
/// unchanged.
///
/// # Errors
///
/// Returns [`Error::Validation`] on the first unknown field or mistyped value.
pub fn validate(record: Option<MetadataRecord>) -> Result<MetadataRecord> {
    let record = record.unwrap_or_default();
    for (field, value) in &record {
        let kinds = allowed_kinds(field)
            .ok_or_else(|| Error::validation(format!("unknown metadata field '{field}'")))?;
        if !kinds.iter().any(|kind| kind.accepts(value)) {
            return Err(Error::validation(format!(
                "metadata field '{field}' has value {value}, expected one of {kinds:?}"
            )));
        }
    }
    Ok(record)
}

/// Returns the record a work item starts with.
#[must_use]
pub fn default_record() -> MetadataRecord {
    let mut record = Map::new();
    record.insert("retries".into(), Value::from(0));
    record.insert("memory_retries".into(), Value::from(0));
    record.insert("memory_bin".into(), Value::Null);
    record.insert("job_id".into(), Value::from("undefined"));
    record.insert("terminated".into(), Value::Bool(false));
    record.insert("timeout_scale".into(), Value::from(1.0));
    record
}

/// Typed view of a control-metadata record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlMetadata {
    /// Backend job id of the latest attempt, `"undefined"` before submission.
    pub job_id: String,
    /// Failed attempts of any kind.
    pub retries: u32,
    /// Failed attempts attributed to memory exhaustion.
    pub memory_retries: u32,
    /// Bin chosen by the first prediction; pinned across retries.
    pub memory_bin: Option<u32>,
    /// Set once the item has been cancelled.
    pub terminated: bool,
    /// Multiplier applied to the computed kill timeout.
    pub timeout_scale: f64,
    /// Dataset name the item was created for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipppssoot: Option<String>,
    /// Bucket holding the deployment root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Backend job name of the latest attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    /// Container exit code of the latest failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    /// Human-readable exit reason of the latest failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<String>,
    /// Backend status of the latest attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<String>,
    /// Backend status reason of the latest attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    /// Container-level reason of the latest failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_reason: Option<String>,
}

impl Default for ControlMetadata {
    fn default() -> Self {
        Self {
            job_id: "undefined".into(),
            retries: 0,
            memory_retries: 0,
            memory_bin: None,
            terminated: false,
            timeout_scale: 1.0,
            ipppssoot: None,
            bucket: None,
            job_name: None,
            exit_code: None,
            exit_reason: None,
            exit_status: None,
            status_reason: None,
            container_reason: None,
        }
    }
}

impl ControlMetadata {
    /// Builds the typed view from a record, validating it first.
    ///
    /// Fields missing from the record take their default values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the record does not match the schema.
    pub fn from_record(record: MetadataRecord) -> Result<Self> {
        let record = validate(Some(record))?;
        serde_json::from_value(Value::Object(record))
            .map_err(|e| Error::validation(format!("invalid control metadata: {e}")))
    }

    /// Converts to a validated record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the typed value violates the schema,
    /// for example a non-positive `timeout_scale`.
    pub fn to_record(&self) -> Result<MetadataRecord> {
        match serde_json::to_value(self) {
            Ok(Value::Object(record)) => validate(Some(record)),
            Ok(other) => Err(Error::serialization(format!(
                "control metadata serialized to non-object {other}"
            ))),
            Err(e) => Err(Error::serialization(format!(
                "failed to serialize control metadata: {e}"
            ))),
        }
    }
}

/// Control-metadata records on the `metadata/` branch.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    storage: ScopedStorage,
    codec: Arc<dyn Codec>,
    metrics: SluiceMetrics,
}

impl MetadataStore {
    /// Creates a metadata store with the JSON codec.
    #[must_use]
    pub fn new(storage: ScopedStorage) -> Self {
        Self {
            storage,
            codec: Arc::new(JsonCodec),
            metrics: SluiceMetrics::new(),
        }
    }

    /// Sets the record codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Sets the metrics recorder.
    #[must_use]
    pub fn with_metrics(mut self, metrics: SluiceMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    fn path(&self, id: &WorkItemId) -> String {
        format!("{}{id}{}", Branch::Metadata.prefix(), self.codec.extension())
    }

    /// Reads and validates the raw record for an item.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no record exists, or
    /// [`Error::Validation`] if the stored record violates the schema.
    pub async fn get_record(&self, id: &WorkItemId) -> Result<MetadataRecord> {
        let bytes = self.storage.get_raw(&self.path(id)).await?;
        if bytes.is_empty() {
            return validate(None);
        }
        match self.codec.decode(&bytes)? {
            Value::Object(record) => validate(Some(record)),
            Value::Null => validate(None),
            other => Err(Error::validation(format!(
                "metadata for {id} is not a record: {other}"
            ))),
        }
    }

    /// Reads the typed record for an item.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no record exists.
    pub async fn get(&self, id: &WorkItemId) -> Result<ControlMetadata> {
        ControlMetadata::from_record(self.get_record(id).await?)
    }

    /// Reads the typed record, or the default record if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error for storage or validation failures.
    pub async fn get_or_default(&self, id: &WorkItemId) -> Result<ControlMetadata> {
        match self.get(id).await {
            Ok(metadata) => Ok(metadata),
            Err(e) if e.is_not_found() => Ok(ControlMetadata::default()),
            Err(e) => Err(e),
        }
    }

    /// Validates and writes a raw record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the record violates the schema.
    #[tracing::instrument(skip(self, record), fields(work_item_id = %id))]
    pub async fn put_record(&self, id: &WorkItemId, record: MetadataRecord) -> Result<()> {
        let record = validate(Some(record))?;
        let bytes = self.codec.encode(&Value::Object(record))?;
        self.storage.put_raw(&self.path(id), bytes).await?;
        self.metrics.record_metadata_write();
        tracing::debug!(codec = self.codec.name(), "control metadata written");
        Ok(())
    }

    /// Writes the typed record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the record violates the schema.
    pub async fn put(&self, id: &WorkItemId, metadata: &ControlMetadata) -> Result<()> {
        self.put_record(id, metadata.to_record()?).await
    }

    /// Deletes the record for an item. Missing records are a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage delete fails.
    pub async fn delete(&self, id: &WorkItemId) -> Result<()> {
        self.storage.delete(&self.path(id)).await?;
        Ok(())
    }

    /// Returns ids that have a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage listing fails.
    pub async fn ids(&self) -> Result<BTreeSet<WorkItemId>> {
        let prefix = Branch::Metadata.prefix();
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
    use serde_json::json;
    use sluice_core::MemoryBackend;

    use crate::codec::YamlCodec;

    fn record(value: Value) -> MetadataRecord {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn store() -> MetadataStore {
        let storage = ScopedStorage::new(Arc::new(MemoryBackend::new()), "dev").unwrap();
        MetadataStore::new(storage)
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = validate(Some(record(json!({"bad_field": 1})))).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains("bad_field"));
    }

    #[test]
    fn default_record_validates_unchanged() {
        assert_eq!(validate(Some(default_record())).unwrap(), default_record());
        assert!(validate(None).unwrap().is_empty());
    }

    #[test]
    fn mistyped_values_are_rejected() {
        for bad in [
            json!({"retries": -1}),
            json!({"retries": "3"}),
            json!({"memory_bin": 1.5}),
            json!({"terminated": "no"}),
            json!({"timeout_scale": 0}),
            json!({"job_id": null}),
        ] {
            assert!(validate(Some(record(bad.clone()))).is_err(), "{bad}");
        }
    }

    #[test]
    fn nullable_fields_accept_null() {
        let rec = record(json!({"exit_code": null, "memory_bin": null, "status_reason": null}));
        assert!(validate(Some(rec)).is_ok());
    }

    #[test]
    fn typed_default_matches_default_record() {
        assert_eq!(ControlMetadata::default().to_record().unwrap(), default_record());
        assert_eq!(
            ControlMetadata::from_record(default_record()).unwrap(),
            ControlMetadata::default()
        );
    }

    #[test]
    fn typed_view_rejects_bad_scale() {
        let metadata = ControlMetadata {
            timeout_scale: 0.0,
            ..ControlMetadata::default()
        };
        assert!(metadata.to_record().is_err());
    }

    #[tokio::test]
    async fn get_or_default_on_missing() {
        let id = WorkItemId::new("iacs01t4q").unwrap();
        let metadata = store().get_or_default(&id).await.unwrap();
        assert_eq!(metadata, ControlMetadata::default());
    }

    #[tokio::test]
    async fn put_get_delete_roundtrip_in_both_codecs() {
        let id = WorkItemId::new("iacs01t4q").unwrap();
        let metadata = ControlMetadata {
            job_id: "job-1".into(),
            retries: 2,
            memory_retries: 1,
            memory_bin: Some(1),
            timeout_scale: 1.5,
            exit_code: Some(137),
            ..ControlMetadata::default()
        };
        for store in [store(), store().with_codec(Arc::new(YamlCodec))] {
            store.put(&id, &metadata).await.unwrap();
            assert_eq!(store.get(&id).await.unwrap(), metadata);
            assert_eq!(store.ids().await.unwrap().len(), 1);

            store.delete(&id).await.unwrap();
            assert!(store.get(&id).await.unwrap_err().is_not_found());
            store.delete(&id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn put_record_rejects_unknown_fields() {
        let id = WorkItemId::new("a").unwrap();
        let err = store()
            .put_record(&id, record(json!({"bad_field": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
