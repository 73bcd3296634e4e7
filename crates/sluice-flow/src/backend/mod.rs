//! External collaborators: the job execution backend and the resource
//! predictor.
//!
//! This module provides:
//!
//! - [`JobBackend`]: submit, describe and terminate batch jobs
//! - [`ResourcePredictor`]: baseline wallclock and memory-bin prediction
//! - [`memory`]: in-memory doubles for both, for tests and local runs
//!
//! Cloud bindings implement these traits outside this crate.

pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::planner::{Prediction, ResourceTier};

pub use memory::{InMemoryJobBackend, StaticPredictor};

/// Limits applied to one submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLimits {
    /// Seconds after which the backend kills the attempt.
    pub timeout_seconds: u64,
}

/// A job submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Human-readable job name.
    pub job_name: String,
    /// Queue and job definition.
    pub tier: ResourceTier,
    /// Command line passed to the job definition.
    pub command: Vec<String>,
    /// Attempt limits.
    pub limits: JobLimits,
}

/// Backend job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted by the backend.
    Submitted,
    /// Waiting on dependencies.
    Pending,
    /// Waiting for capacity.
    Runnable,
    /// Container starting.
    Starting,
    /// Running.
    Running,
    /// Finished with exit code zero.
    Succeeded,
    /// Finished with an error, timed out, or was terminated.
    Failed,
}

impl JobStatus {
    /// Returns true once the job can no longer change state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitted => "SUBMITTED",
            Self::Pending => "PENDING",
            Self::Runnable => "RUNNABLE",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// What the backend reports about one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescription {
    /// Backend job id.
    pub job_id: String,
    /// Job name given at submission.
    pub job_name: String,
    /// Current state.
    pub status: JobStatus,
    /// Backend explanation of the current state.
    pub status_reason: Option<String>,
    /// Container exit code, once finished.
    pub exit_code: Option<i64>,
    /// Container-level failure reason.
    pub container_reason: Option<String>,
}

/// Batch job execution backend.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Submits a job and returns its backend id.
    async fn submit(&self, request: JobRequest) -> Result<String>;

    /// Describes a job.
    ///
    /// Returns `Error::NotFound` for unknown job ids.
    async fn describe(&self, job_id: &str) -> Result<JobDescription>;

    /// Terminates a job. Terminating a finished job is a no-op.
    async fn terminate(&self, job_id: &str, reason: &str) -> Result<()>;
}

/// Input features handed to the predictor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureRecord(pub BTreeMap<String, Value>);

impl FeatureRecord {
    /// Adds one feature.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }
}

/// Baseline resource predictor.
#[async_trait]
pub trait ResourcePredictor: Send + Sync {
    /// Predicts wallclock and memory bin for one item.
    async fn predict(&self, features: &FeatureRecord) -> Result<Prediction>;
}
