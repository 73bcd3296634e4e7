//! Identifiers used to address objects across every storage branch.
//!
//! - [`WorkItemId`] names one unit of batch work. It is the addressing key for
//!   messages, inputs, outputs, control files and metadata.
//! - [`EnvelopeId`] names one broadcast envelope. Envelope ids are ULIDs, so
//!   they are unique without coordination and sort by creation time.
//!
//! # Example
//!
//! ```rust
//! use sluice_core::id::{EnvelopeId, WorkItemId};
//!
//! let item = WorkItemId::new("la8q99030").unwrap();
//! let envelope = EnvelopeId::generate();
//!
//! // Envelopes travel as `broadcast-<id>` messages, so they convert losslessly.
//! let as_item = envelope.to_work_item_id();
//! assert_eq!(as_item.as_str(), envelope.to_string());
//! # let _ = item;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// Maximum accepted work item id length.
pub const MAX_WORK_ITEM_ID_LEN: usize = 64;

/// Selector word that means "every id"; never a valid id itself.
pub const ALL: &str = "all";

/// Identifier of one unit of batch work.
///
/// Ids are 1 to 64 ASCII alphanumerics or `_`. The `-` character is reserved
/// as the separator in `type-id` message keys and the literal `all` is
/// reserved as the wildcard selector.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkItemId(String);

impl WorkItemId {
    /// Creates a validated work item id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] when the id is empty, too long, contains
    /// characters outside `[A-Za-z0-9_]`, or is the reserved word `all`.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidId {
                message: "work item id cannot be empty".into(),
            });
        }
        if id.len() > MAX_WORK_ITEM_ID_LEN {
            return Err(Error::InvalidId {
                message: format!(
                    "work item id '{id}' exceeds {MAX_WORK_ITEM_ID_LEN} characters"
                ),
            });
        }
        if id == ALL {
            return Err(Error::InvalidId {
                message: "'all' is a selector, not a work item id".into(),
            });
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidId {
                message: format!("work item id '{id}' contains invalid characters"),
            });
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkItemId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for WorkItemId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<WorkItemId> for String {
    fn from(id: WorkItemId) -> Self {
        id.0
    }
}

impl AsRef<str> for WorkItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a broadcast envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(Ulid);

impl EnvelopeId {
    /// Generates a new unique envelope id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Returns the creation timestamp encoded in the id.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = i64::try_from(self.0.timestamp_ms()).unwrap_or(i64::MAX);
        chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
    }

    /// Returns the envelope id in work-item form, for use in message keys.
    #[must_use]
    pub fn to_work_item_id(&self) -> WorkItemId {
        // ULID text is 26 Crockford base32 characters, always a valid id.
        WorkItemId(self.0.to_string())
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EnvelopeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid envelope id '{s}': {e}"),
            })
    }
}

impl TryFrom<&WorkItemId> for EnvelopeId {
    type Error = Error;

    fn try_from(id: &WorkItemId) -> Result<Self> {
        id.as_str().parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_item_id_accepts_domain_ids() {
        for id in ["iacs01t4q", "la8q99030", "J8CB010B0", "odfa01030", "x"] {
            assert_eq!(WorkItemId::new(id).unwrap().as_str(), id);
        }
    }

    #[test]
    fn work_item_id_rejects_reserved_and_malformed() {
        for id in ["", "all", "a-b", "a/b", "a b", "a.b"] {
            assert!(WorkItemId::new(id).is_err(), "{id:?} must be rejected");
        }
        assert!(WorkItemId::new("a".repeat(MAX_WORK_ITEM_ID_LEN + 1)).is_err());
    }

    #[test]
    fn work_item_id_serde_validates() {
        let id: WorkItemId = serde_json::from_str("\"iacs01t4q\"").unwrap();
        assert_eq!(id.as_str(), "iacs01t4q");
        assert!(serde_json::from_str::<WorkItemId>("\"all\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"iacs01t4q\"");
    }

    #[test]
    fn envelope_id_roundtrips_through_work_item_form() {
        let envelope = EnvelopeId::generate();
        let item = envelope.to_work_item_id();
        assert_eq!(EnvelopeId::try_from(&item).unwrap(), envelope);
    }

    #[test]
    fn envelope_ids_are_unique() {
        assert_ne!(EnvelopeId::generate(), EnvelopeId::generate());
    }
}
