//! Error types for the lifecycle layer.
//!
//! | Variant | Raised when | Handling |
//! |---|---|---|
//! | [`Error::Validation`] | unknown/mistyped metadata field, bad message type or selector | aborts the handler |
//! | [`Error::NotFound`] | message or metadata absent | swallowed at best-effort sites |
//! | [`Error::AllBinsExhausted`] | escalation ran out of resource tiers | caller emits a terminal `error` message |
//! | [`Error::CrossEnvironment`] | bundle root differs from the deployment root | fatal to the invocation |

/// The result type used throughout sluice-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input failed schema or vocabulary validation.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the violation.
        message: String,
    },

    /// The requested message or record does not exist.
    #[error("not found: {resource}")]
    NotFound {
        /// The key or path that was looked up.
        resource: String,
    },

    /// Memory escalation has no resource tier left for this work item.
    #[error(
        "all resource bins exhausted for {work_item_id}: bin {bin} requested, {tiers} configured"
    )]
    AllBinsExhausted {
        /// The work item being planned.
        work_item_id: String,
        /// The bin that escalation asked for.
        bin: u32,
        /// Number of configured tiers.
        tiers: usize,
    },

    /// A bundle was built against another deployment's storage root.
    #[error("cross-environment access: bundle root '{actual}' does not match deployment root '{expected}'")]
    CrossEnvironment {
        /// The deployment's configured root.
        expected: String,
        /// The root the bundle was asked to operate on.
        actual: String,
    },

    /// A lifecycle transition that the state machine does not allow.
    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition {
        /// Current message type.
        from: String,
        /// Requested message type.
        to: String,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The job execution backend or predictor reported a failure.
    #[error("backend error: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },

    /// An error from sluice-core.
    #[error("core error: {0}")]
    Core(#[source] sluice_core::Error),
}

impl Error {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns true if this error reports a missing message or record.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<sluice_core::Error> for Error {
    fn from(err: sluice_core::Error) -> Self {
        match err {
            sluice_core::Error::NotFound(resource) => Self::NotFound { resource },
            sluice_core::Error::InvalidId { message } => Self::Validation { message },
            other => Self::Core(other),
        }
    }
}
