//! Shared test utilities for sluice tests.
//!
//! This crate provides:
//! - [`TracingMemoryBackend`]: in-memory storage with operation recording
//!   and failure injection
//! - [`TestContext`]: a storage backend plus a deployment root
//! - Factory functions for work item ids and input archives

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod storage;

pub use fixtures::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sluice=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
