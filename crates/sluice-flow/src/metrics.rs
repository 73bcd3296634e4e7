//! Observability metrics for lifecycle operations.
//!
//! Metrics go through the `metrics` crate facade. Each store and coordinator
//! is handed a [`SluiceMetrics`] at construction instead of reaching for a
//! process-global counter, so tests and handlers can wire their own recorder.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `sluice_messages_written_total` | Counter | `type` | Lifecycle messages written |
//! | `sluice_messages_deleted_total` | Counter | `type` | Lifecycle messages deleted |
//! | `sluice_broadcast_envelopes_total` | Counter | `outcome` | Envelopes processed by outcome |
//! | `sluice_broadcast_delivered_total` | Counter | - | Messages delivered by broadcasts |
//! | `sluice_plans_total` | Counter | `bin` | Plans produced per resource bin |
//! | `sluice_escalations_exhausted_total` | Counter | - | Plans refused for lack of tiers |
//! | `sluice_metadata_writes_total` | Counter | - | Control-metadata writes |
//! | `sluice_job_submissions_total` | Counter | `queue` | Jobs submitted to the backend |
//! | `sluice_cleanup_failures_total` | Counter | `branch` | Branch deletions trapped during reset/clean |
//! | `sluice_operation_duration_seconds` | Histogram | `operation` | Bundle operation latency |

use std::time::{Duration, Instant};

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: lifecycle messages written.
    pub const MESSAGES_WRITTEN_TOTAL: &str = "sluice_messages_written_total";
    /// Counter: lifecycle messages deleted.
    pub const MESSAGES_DELETED_TOTAL: &str = "sluice_messages_deleted_total";
    /// Counter: broadcast envelopes processed.
    pub const BROADCAST_ENVELOPES_TOTAL: &str = "sluice_broadcast_envelopes_total";
    /// Counter: messages delivered by broadcast envelopes.
    pub const BROADCAST_DELIVERED_TOTAL: &str = "sluice_broadcast_delivered_total";
    /// Counter: plans produced.
    pub const PLANS_TOTAL: &str = "sluice_plans_total";
    /// Counter: plans refused because every bin was used.
    pub const ESCALATIONS_EXHAUSTED_TOTAL: &str = "sluice_escalations_exhausted_total";
    /// Counter: control-metadata writes.
    pub const METADATA_WRITES_TOTAL: &str = "sluice_metadata_writes_total";
    /// Counter: jobs submitted.
    pub const JOB_SUBMISSIONS_TOTAL: &str = "sluice_job_submissions_total";
    /// Counter: branch deletions that failed during reset/clean.
    pub const CLEANUP_FAILURES_TOTAL: &str = "sluice_cleanup_failures_total";
    /// Histogram: bundle operation duration in seconds.
    pub const OPERATION_DURATION_SECONDS: &str = "sluice_operation_duration_seconds";
}

/// Label keys used across metrics.
pub mod labels {
    /// Message type.
    pub const TYPE: &str = "type";
    /// Broadcast outcome (bifurcated, delivered, killed, interrupted, ignored).
    pub const OUTCOME: &str = "outcome";
    /// Resource bin index.
    pub const BIN: &str = "bin";
    /// Execution queue name.
    pub const QUEUE: &str = "queue";
    /// Storage branch name.
    pub const BRANCH: &str = "branch";
    /// Bundle operation name.
    pub const OPERATION: &str = "operation";
}

/// Recorder handle for lifecycle metrics.
///
/// Cheap to clone; every component holds its own copy.
#[derive(Debug, Clone, Default)]
pub struct SluiceMetrics {
    _private: (),
}

impl SluiceMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message write.
    pub fn record_message_written(&self, message_type: &str) {
        counter!(
            names::MESSAGES_WRITTEN_TOTAL,
            labels::TYPE => message_type.to_string(),
        )
        .increment(1);
    }

    /// Records a message delete.
    pub fn record_message_deleted(&self, message_type: &str) {
        counter!(
            names::MESSAGES_DELETED_TOTAL,
            labels::TYPE => message_type.to_string(),
        )
        .increment(1);
    }

    /// Records the outcome of processing one broadcast envelope.
    pub fn record_broadcast_outcome(&self, outcome: &str) {
        counter!(
            names::BROADCAST_ENVELOPES_TOTAL,
            labels::OUTCOME => outcome.to_string(),
        )
        .increment(1);
    }

    /// Records messages delivered by a broadcast envelope.
    pub fn record_broadcast_delivered(&self, count: usize) {
        counter!(names::BROADCAST_DELIVERED_TOTAL).increment(count as u64);
    }

    /// Records a produced plan.
    pub fn record_plan(&self, bin: u32) {
        counter!(names::PLANS_TOTAL, labels::BIN => bin.to_string()).increment(1);
    }

    /// Records a plan refused for lack of resource tiers.
    pub fn record_bins_exhausted(&self) {
        counter!(names::ESCALATIONS_EXHAUSTED_TOTAL).increment(1);
    }

    /// Records a control-metadata write.
    pub fn record_metadata_write(&self) {
        counter!(names::METADATA_WRITES_TOTAL).increment(1);
    }

    /// Records a job submission.
    pub fn record_job_submission(&self, queue: &str) {
        counter!(
            names::JOB_SUBMISSIONS_TOTAL,
            labels::QUEUE => queue.to_string(),
        )
        .increment(1);
    }

    /// Records a trapped branch failure during reset/clean.
    pub fn record_cleanup_failure(&self, branch: &str) {
        counter!(
            names::CLEANUP_FAILURES_TOTAL,
            labels::BRANCH => branch.to_string(),
        )
        .increment(1);
    }

    /// Records a bundle operation duration.
    pub fn observe_operation_duration(&self, operation: &str, duration: Duration) {
        histogram!(
            names::OPERATION_DURATION_SECONDS,
            labels::OPERATION => operation.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Starts a guard that records the operation duration when dropped.
    #[must_use]
    pub fn time_operation(&self, operation: &'static str) -> TimingGuard<impl FnOnce(Duration)> {
        let metrics = self.clone();
        TimingGuard::new(move |duration| metrics.observe_operation_duration(operation, duration))
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_record_without_recorder() {
        // No recorder installed: every call must be a silent no-op.
        let metrics = SluiceMetrics::new();
        metrics.record_message_written("placed");
        metrics.record_message_deleted("placed");
        metrics.record_broadcast_outcome("delivered");
        metrics.record_broadcast_delivered(3);
        metrics.record_plan(2);
        metrics.record_bins_exhausted();
        metrics.record_metadata_write();
        metrics.record_job_submission("queue-8g");
        metrics.record_cleanup_failure("outputs");
        let _guard = metrics.time_operation("reset");
    }

    #[test]
    fn timing_guard_measures_duration() {
        let mut recorded = None;
        {
            let _guard = TimingGuard::new(|d| recorded = Some(d));
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(recorded.is_some_and(|d| d >= Duration::from_millis(5)));
    }
}
