//! # sluice-core
//!
//! Core abstractions shared by every sluice component.
//!
//! This crate provides the foundational types and traits the lifecycle layer
//! is built on:
//!
//! - **Storage**: the object store contract ([`StorageBackend`]) and an
//!   in-memory implementation for tests and local runs
//! - **Rooted storage**: [`ScopedStorage`] pins every path under one
//!   deployment root and rejects traversal
//! - **Identifiers**: [`WorkItemId`] and [`EnvelopeId`]
//! - **Error types**: shared error definitions and result alias
//! - **Observability**: `tracing` subscriber setup and span helpers
//!
//! ## Example
//!
//! ```rust
//! use sluice_core::prelude::*;
//!
//! let id: WorkItemId = "iacs01t4q".parse().expect("valid id");
//! assert_eq!(id.as_str(), "iacs01t4q");
//!
//! let envelope = EnvelopeId::generate();
//! assert_eq!(envelope.to_string().len(), 26);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;
pub mod scoped_storage;
pub mod storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{EnvelopeId, WorkItemId};
    pub use crate::scoped_storage::{ScopedPath, ScopedStorage};
    pub use crate::storage::{MemoryBackend, ObjectMeta, StorageBackend};
}

pub use error::{Error, Result};
pub use id::{EnvelopeId, WorkItemId};
pub use observability::{LogFormat, init_logging};
pub use scoped_storage::{ScopedPath, ScopedStorage};
pub use storage::{MemoryBackend, ObjectMeta, StorageBackend};
