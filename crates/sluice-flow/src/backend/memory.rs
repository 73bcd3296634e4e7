//! In-memory job backend and predictor for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: nothing runs, jobs only change state
//!   when a test drives them with [`InMemoryJobBackend::set_status`] or
//!   [`InMemoryJobBackend::fail`]
//! - **Single-process only**: jobs are not visible across process boundaries

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use ulid::Ulid;

use super::{FeatureRecord, JobBackend, JobDescription, JobRequest, JobStatus, ResourcePredictor};
use crate::error::{Error, Result};
use crate::planner::Prediction;

#[derive(Debug, Default)]
struct BackendState {
    order: Vec<String>,
    jobs: HashMap<String, (JobRequest, JobDescription)>,
}

/// In-memory job backend.
#[derive(Debug, Default)]
pub struct InMemoryJobBackend {
    state: RwLock<BackendState>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::backend("job backend lock poisoned")
}

impl InMemoryJobBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every submitted request, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn submissions(&self) -> Result<Vec<JobRequest>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id).map(|(request, _)| request.clone()))
            .collect())
    }

    /// Moves a job to a new status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown job ids.
    pub fn set_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        self.update(job_id, |description| description.status = status)
    }

    /// Marks a job failed with the given diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown job ids.
    pub fn fail(
        &self,
        job_id: &str,
        exit_code: Option<i64>,
        status_reason: Option<&str>,
        container_reason: Option<&str>,
    ) -> Result<()> {
        self.update(job_id, |description| {
            description.status = JobStatus::Failed;
            description.exit_code = exit_code;
            description.status_reason = status_reason.map(str::to_string);
            description.container_reason = container_reason.map(str::to_string);
        })
    }

    fn update(&self, job_id: &str, apply: impl FnOnce(&mut JobDescription)) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let (_, description) = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::not_found(format!("job {job_id}")))?;
        apply(description);
        Ok(())
    }
}

#[async_trait]
impl JobBackend for InMemoryJobBackend {
    async fn submit(&self, request: JobRequest) -> Result<String> {
        let job_id = Ulid::new().to_string();
        let description = JobDescription {
            job_id: job_id.clone(),
            job_name: request.job_name.clone(),
            status: JobStatus::Submitted,
            status_reason: None,
            exit_code: None,
            container_reason: None,
        };
        let mut state = self.state.write().map_err(poison_err)?;
        state.order.push(job_id.clone());
        state.jobs.insert(job_id.clone(), (request, description));
        drop(state);
        Ok(job_id)
    }

    async fn describe(&self, job_id: &str) -> Result<JobDescription> {
        let state = self.state.read().map_err(poison_err)?;
        state
            .jobs
            .get(job_id)
            .map(|(_, description)| description.clone())
            .ok_or_else(|| Error::not_found(format!("job {job_id}")))
    }

    async fn terminate(&self, job_id: &str, reason: &str) -> Result<()> {
        self.update(job_id, |description| {
            if !description.status.is_terminal() {
                description.status = JobStatus::Failed;
                description.status_reason = Some(reason.to_string());
            }
        })
    }
}

/// Predictor that always returns one fixed prediction.
#[derive(Debug, Clone, Copy)]
pub struct StaticPredictor {
    prediction: Prediction,
}

impl StaticPredictor {
    /// Creates a predictor returning `prediction` for every input.
    #[must_use]
    pub const fn new(prediction: Prediction) -> Self {
        Self { prediction }
    }
}

#[async_trait]
impl ResourcePredictor for StaticPredictor {
    async fn predict(&self, _features: &FeatureRecord) -> Result<Prediction> {
        Ok(self.prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::JobLimits;
    use crate::planner::ResourceTier;

    fn request(name: &str) -> JobRequest {
        JobRequest {
            job_name: name.into(),
            tier: ResourceTier::new("q", "j"),
            command: vec!["process".into(), name.into()],
            limits: JobLimits {
                timeout_seconds: 1200,
            },
        }
    }

    #[tokio::test]
    async fn submit_then_describe() {
        let backend = InMemoryJobBackend::new();
        let job_id = backend.submit(request("a")).await.unwrap();
        let description = backend.describe(&job_id).await.unwrap();
        assert_eq!(description.status, JobStatus::Submitted);
        assert_eq!(description.job_name, "a");
        assert_eq!(backend.submissions().unwrap(), vec![request("a")]);
    }

    #[tokio::test]
    async fn terminate_fails_running_jobs_only() {
        let backend = InMemoryJobBackend::new();
        let running = backend.submit(request("a")).await.unwrap();
        let done = backend.submit(request("b")).await.unwrap();
        backend.set_status(&running, JobStatus::Running).unwrap();
        backend.set_status(&done, JobStatus::Succeeded).unwrap();

        backend.terminate(&running, "cancelled").await.unwrap();
        backend.terminate(&done, "cancelled").await.unwrap();

        let running = backend.describe(&running).await.unwrap();
        assert_eq!(running.status, JobStatus::Failed);
        assert_eq!(running.status_reason.as_deref(), Some("cancelled"));
        assert_eq!(backend.describe(&done).await.unwrap().status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let backend = InMemoryJobBackend::new();
        assert!(backend.describe("nope").await.unwrap_err().is_not_found());
        assert!(backend.fail("nope", Some(1), None, None).unwrap_err().is_not_found());
    }
}
