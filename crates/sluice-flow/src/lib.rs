//! # sluice-flow
//!
//! Lifecycle messaging and retry escalation for batch work items, built on
//! nothing but a blob store and a job backend.
//!
//! This crate provides:
//!
//! - **Messages**: typed `type-id` lifecycle messages with wildcard
//!   selectors ([`MessageStore`])
//! - **Broadcast**: fan-out of large signal batches by recursive bisection
//!   ([`BroadcastCoordinator`])
//! - **Control metadata**: schema-validated per-item retry state
//!   ([`MetadataStore`])
//! - **Planning**: resource tier and kill timeout per attempt, with memory
//!   escalation ([`Planner`], [`EscalationPolicy`])
//! - **IO bundle**: all branches of one deployment root with reset, clean
//!   and send ([`IoBundle`])
//!
//! ## Guarantees
//!
//! - **Last write wins**: at most one object per message key
//! - **Idempotent consumption**: deleting a consumed message is a no-op
//! - **Bounded escalation**: each memory failure moves one tier up, and
//!   running out of tiers is terminal
//!
//! Delivery is weak at-most-once: two handlers racing on one message can
//! both observe it before either deletes it.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use sluice_core::MemoryBackend;
//! use sluice_flow::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let config = SluiceConfig::new("hst-processing-dev");
//! let bundle = IoBundle::from_config(Arc::new(MemoryBackend::new()), &config)?;
//!
//! let id: WorkItemId = "iacs01t4q".parse()?;
//! bundle.send(MessageType::Placed, &IdSelector::one(id.clone())).await?;
//! let placed = bundle.messages().list(&MessagePrefix::parse("placed-all")?).await?;
//! assert_eq!(placed, vec![MessageKey::new(MessageType::Placed, id)]);
//! # Ok::<(), sluice_flow::Error>(())
//! # }).unwrap();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod backend;
pub mod branch;
pub mod broadcast;
pub mod bundle;
pub mod codec;
pub mod config;
pub mod error;
pub mod escalation;
pub mod lifecycle;
pub mod messages;
pub mod metadata;
pub mod metrics;
pub mod planner;
pub mod submit;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use sluice_core::{EnvelopeId, WorkItemId};

    pub use crate::backend::{
        FeatureRecord, InMemoryJobBackend, JobBackend, JobDescription, JobStatus,
        ResourcePredictor, StaticPredictor,
    };
    pub use crate::branch::{BlobBranch, Branch, BranchSelector, IdSelector};
    pub use crate::broadcast::{BroadcastConfig, BroadcastCoordinator, BroadcastOutcome};
    pub use crate::bundle::{CleanupReport, IoBundle};
    pub use crate::codec::{Codec, CodecKind, JsonCodec, YamlCodec};
    pub use crate::config::SluiceConfig;
    pub use crate::error::{Error, Result};
    pub use crate::escalation::{EscalationPolicy, FailureKind, NextStep};
    pub use crate::messages::{
        MessageEncoding, MessageKey, MessagePrefix, MessageStore, MessageType,
    };
    pub use crate::metadata::{ControlMetadata, MetadataStore};
    pub use crate::metrics::SluiceMetrics;
    pub use crate::planner::{Plan, Planner, PlannerConfig, Prediction, ResourceTier};
    pub use crate::submit::{SubmitOutcome, submit_work_item};
}

pub use broadcast::BroadcastCoordinator;
pub use bundle::IoBundle;
pub use config::SluiceConfig;
pub use error::{Error, Result};
pub use escalation::EscalationPolicy;
pub use messages::{MessageKey, MessagePrefix, MessageStore, MessageType};
pub use metadata::MetadataStore;
pub use planner::Planner;
