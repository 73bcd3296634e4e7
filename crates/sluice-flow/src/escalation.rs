//! Failure attribution and retry escalation.
//!
//! When a job fails, its diagnostics are folded into the item's control
//! metadata and the failure is classified. Memory failures raise
//! `memory_retries` by exactly one, which moves the next plan one tier up.
//! Timeouts grow `timeout_scale` instead. Anything else is held for an
//! operator.

use serde::{Deserialize, Serialize};

use crate::backend::JobDescription;
use crate::metadata::ControlMetadata;
use crate::planner::Planner;

/// Escalation tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Container exit codes that mean the job ran out of memory.
    pub memory_exit_codes: Vec<i64>,
    /// Substring of `container_reason` that means the job ran out of memory.
    pub memory_reason_marker: String,
    /// Substring of `status_reason` that means the attempt timed out.
    pub timeout_reason_marker: String,
    /// Factor applied to `timeout_scale` after a timeout.
    pub timeout_growth: f64,
    /// Retries allowed before an item is exhausted regardless of kind.
    pub max_retries: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            memory_exit_codes: vec![31, 32, 33, 34],
            memory_reason_marker: "OutOfMemoryError".into(),
            timeout_reason_marker: "duration exceeded timeout".into(),
            timeout_growth: 1.5,
            max_retries: 4,
        }
    }
}

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Out of memory.
    Memory,
    /// Killed by the attempt timeout.
    Timeout,
    /// Anything else.
    Other,
}

/// What to do after a failure has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Retry automatically.
    Rescue,
    /// No retry is possible; emit a terminal `error`.
    Exhausted,
    /// Leave the `error` message for an operator.
    Hold,
    /// The item was cancelled.
    Terminal,
}

impl EscalationPolicy {
    /// Classifies the latest failure recorded in `metadata`.
    #[must_use]
    pub fn classify(&self, metadata: &ControlMetadata) -> FailureKind {
        let memory_code = metadata
            .exit_code
            .is_some_and(|code| self.memory_exit_codes.contains(&code));
        let memory_reason = metadata
            .container_reason
            .as_deref()
            .is_some_and(|r| r.contains(&self.memory_reason_marker));
        if memory_code || memory_reason {
            return FailureKind::Memory;
        }
        if metadata
            .status_reason
            .as_deref()
            .is_some_and(|r| r.contains(&self.timeout_reason_marker))
        {
            return FailureKind::Timeout;
        }
        FailureKind::Other
    }

    /// Copies a finished job's diagnostics into the metadata.
    pub fn absorb(metadata: &mut ControlMetadata, job: &JobDescription) {
        metadata.job_id.clone_from(&job.job_id);
        metadata.job_name = Some(job.job_name.clone());
        metadata.exit_status = Some(job.status.to_string());
        metadata.exit_code = job.exit_code;
        metadata.status_reason.clone_from(&job.status_reason);
        metadata.container_reason.clone_from(&job.container_reason);
        metadata.exit_reason = job
            .container_reason
            .clone()
            .or_else(|| job.status_reason.clone());
    }

    /// Records one failure of the given kind.
    pub fn record_failure(&self, metadata: &mut ControlMetadata, kind: FailureKind) {
        metadata.retries = metadata.retries.saturating_add(1);
        match kind {
            FailureKind::Memory => {
                metadata.memory_retries = metadata.memory_retries.saturating_add(1);
            }
            FailureKind::Timeout => metadata.timeout_scale *= self.timeout_growth,
            FailureKind::Other => {}
        }
    }

    /// Decides the next step after a failure was recorded.
    ///
    /// Memory failures are rescued only while the planner still has a tier
    /// for `memory_bin + memory_retries`.
    #[must_use]
    pub fn next_step(
        &self,
        metadata: &ControlMetadata,
        kind: FailureKind,
        planner: &Planner,
    ) -> NextStep {
        if metadata.terminated {
            return NextStep::Terminal;
        }
        if metadata.retries > self.max_retries {
            return NextStep::Exhausted;
        }
        match kind {
            FailureKind::Memory => {
                let bin = metadata
                    .memory_bin
                    .unwrap_or(0)
                    .saturating_add(metadata.memory_retries);
                if planner.has_bin(bin) {
                    NextStep::Rescue
                } else {
                    NextStep::Exhausted
                }
            }
            FailureKind::Timeout => NextStep::Rescue,
            FailureKind::Other => NextStep::Hold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::JobStatus;
    use crate::planner::PlannerConfig;

    fn failed(exit_code: Option<i64>, status: Option<&str>, container: Option<&str>) -> ControlMetadata {
        ControlMetadata {
            exit_code,
            status_reason: status.map(str::to_string),
            container_reason: container.map(str::to_string),
            ..ControlMetadata::default()
        }
    }

    #[test]
    fn classification() {
        let policy = EscalationPolicy::default();
        assert_eq!(policy.classify(&failed(Some(32), None, None)), FailureKind::Memory);
        assert_eq!(
            policy.classify(&failed(Some(137), None, Some("OutOfMemoryError: Container killed"))),
            FailureKind::Memory
        );
        assert_eq!(
            policy.classify(&failed(None, Some("Job attempt duration exceeded timeout"), None)),
            FailureKind::Timeout
        );
        assert_eq!(policy.classify(&failed(Some(1), None, None)), FailureKind::Other);
    }

    #[test]
    fn memory_failure_increments_by_exactly_one() {
        let policy = EscalationPolicy::default();
        let mut metadata = ControlMetadata::default();
        policy.record_failure(&mut metadata, FailureKind::Memory);
        assert_eq!(metadata.memory_retries, 1);
        assert_eq!(metadata.retries, 1);
        assert!((metadata.timeout_scale - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn timeout_failure_grows_scale() {
        let policy = EscalationPolicy::default();
        let mut metadata = ControlMetadata::default();
        policy.record_failure(&mut metadata, FailureKind::Timeout);
        policy.record_failure(&mut metadata, FailureKind::Timeout);
        assert_eq!(metadata.memory_retries, 0);
        assert!((metadata.timeout_scale - 2.25).abs() < 1e-9);
    }

    #[test]
    fn next_step_rules() {
        let policy = EscalationPolicy::default();
        let planner = Planner::new("dev", PlannerConfig::default()).unwrap();

        let mut metadata = ControlMetadata {
            memory_bin: Some(2),
            memory_retries: 1,
            retries: 1,
            ..ControlMetadata::default()
        };
        assert_eq!(policy.next_step(&metadata, FailureKind::Memory, &planner), NextStep::Rescue);

        metadata.memory_retries = 2;
        assert_eq!(policy.next_step(&metadata, FailureKind::Memory, &planner), NextStep::Exhausted);
        assert_eq!(policy.next_step(&metadata, FailureKind::Timeout, &planner), NextStep::Rescue);
        assert_eq!(policy.next_step(&metadata, FailureKind::Other, &planner), NextStep::Hold);

        metadata.retries = 5;
        assert_eq!(policy.next_step(&metadata, FailureKind::Timeout, &planner), NextStep::Exhausted);

        metadata.terminated = true;
        assert_eq!(policy.next_step(&metadata, FailureKind::Timeout, &planner), NextStep::Terminal);
    }

    #[test]
    fn absorb_copies_job_diagnostics() {
        let mut metadata = ControlMetadata::default();
        let job = JobDescription {
            job_id: "job-1".into(),
            job_name: "iacs01t4q-2g".into(),
            status: JobStatus::Failed,
            status_reason: Some("Essential container in task exited".into()),
            exit_code: Some(33),
            container_reason: None,
        };
        EscalationPolicy::absorb(&mut metadata, &job);
        assert_eq!(metadata.job_id, "job-1");
        assert_eq!(metadata.exit_code, Some(33));
        assert_eq!(metadata.exit_status.as_deref(), Some("FAILED"));
        assert_eq!(metadata.exit_reason, job.status_reason);
        assert_eq!(EscalationPolicy::default().classify(&metadata), FailureKind::Memory);
    }
}
