//! Observability infrastructure for sluice.
//!
//! Handlers are short-lived and stateless, so logging is the primary record
//! of what a trigger invocation did. This module provides subscriber
//! initialization and span constructors with consistent field names.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown log format '{other}' (expected json or pretty)"
            ))),
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at handler startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `sluice_flow=debug`)
///
/// # Example
///
/// ```rust
/// use sluice_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(env_filter);
        let result = match format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        };
        // Another subscriber (e.g. a test harness) may already be installed.
        drop(result);
    });
}

/// Creates a span for one trigger-handler invocation.
///
/// # Example
///
/// ```rust
/// use sluice_core::observability::handler_span;
///
/// let span = handler_span("rescue", "hst-processing-dev", "messages/rescue-iacs01t4q");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn handler_span(handler: &str, root: &str, trigger_key: &str) -> Span {
    tracing::info_span!(
        "handler",
        handler = handler,
        root = root,
        trigger_key = trigger_key,
    )
}

/// Creates a span for an operation on a single work item.
#[must_use]
pub fn work_item_span(operation: &str, work_item_id: &str) -> Span {
    tracing::info_span!("work_item", op = operation, work_item_id = work_item_id)
}
