//! Error types and result aliases shared by sluice crates.
//!
//! Errors are structured for programmatic handling. In particular
//! [`Error::NotFound`] is a distinct variant so best-effort read and delete
//! sites can swallow it without string matching.

/// The result type used throughout sluice-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in storage and identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A path or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if this error reports a missing object.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
