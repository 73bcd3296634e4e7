//! Payload serialization strategies.
//!
//! Each store is handed an `Arc<dyn Codec>` at construction. JSON is the
//! default; YAML is available for deployments whose operators edit control
//! records by hand.
//!
//! The empty string is the canonical "signal, no data" payload. It is stored
//! as a zero-length object rather than as an encoded `""`, which keeps signal
//! messages cheap to write and trivially recognizable in bucket listings.

use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Serialize/deserialize strategy for stored payloads.
pub trait Codec: Debug + Send + Sync {
    /// Short name of the encoding, used in logs.
    fn name(&self) -> &'static str;

    /// File extension (including the dot) for records written with this codec.
    fn extension(&self) -> &'static str;

    /// Encodes a value to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the value cannot be encoded.
    fn encode(&self, value: &Value) -> Result<Bytes>;

    /// Decodes bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the bytes are not valid for this codec.
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// UTF-8 JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extension(&self) -> &'static str {
        ".json"
    }

    fn encode(&self, value: &Value) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| Error::serialization(format!("failed to encode JSON payload: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::serialization(format!("failed to decode JSON payload: {e}")))
    }
}

/// UTF-8 YAML codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlCodec;

impl Codec for YamlCodec {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn extension(&self) -> &'static str {
        ".yaml"
    }

    fn encode(&self, value: &Value) -> Result<Bytes> {
        serde_yaml::to_string(value)
            .map(Bytes::from)
            .map_err(|e| Error::serialization(format!("failed to encode YAML payload: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        serde_yaml::from_slice(bytes)
            .map_err(|e| Error::serialization(format!("failed to decode YAML payload: {e}")))
    }
}

/// Codec selection, as read from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// [`JsonCodec`].
    #[default]
    Json,
    /// [`YamlCodec`].
    Yaml,
}

impl CodecKind {
    /// Builds the codec instance.
    #[must_use]
    pub fn build(self) -> Arc<dyn Codec> {
        match self {
            Self::Json => Arc::new(JsonCodec),
            Self::Yaml => Arc::new(YamlCodec),
        }
    }
}

impl std::str::FromStr for CodecKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(Error::configuration(format!(
                "unknown codec '{other}' (expected json or yaml)"
            ))),
        }
    }
}

/// Returns true for the canonical signal payload.
#[must_use]
pub fn is_signal(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.is_empty())
}

/// The canonical signal payload.
#[must_use]
pub fn signal() -> Value {
    Value::String(String::new())
}

/// Encodes a message payload, storing the signal payload as zero bytes.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the codec fails.
pub fn encode_payload(codec: &dyn Codec, value: &Value) -> Result<Bytes> {
    if is_signal(value) {
        return Ok(Bytes::new());
    }
    codec.encode(value)
}

/// Decodes a message payload, mapping zero bytes back to the signal payload.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the codec fails.
pub fn decode_payload(codec: &dyn Codec, bytes: &[u8]) -> Result<Value> {
    if bytes.is_empty() {
        return Ok(signal());
    }
    codec.decode(bytes)
}
