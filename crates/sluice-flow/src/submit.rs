//! Submission glue between lifecycle messages and the job backend.
//!
//! These functions are what the `submit`, job-state, `rescue` and `cancel`
//! handlers run. None of them block on the job: submission records the job
//! id and returns, and failures are folded in when the backend reports them.

use serde_json::json;

use sluice_core::WorkItemId;
use sluice_core::observability::work_item_span;
use tracing::Instrument as _;

use crate::backend::{FeatureRecord, JobBackend, JobLimits, JobRequest, ResourcePredictor};
use crate::branch::IdSelector;
use crate::bundle::IoBundle;
use crate::error::{Error, Result};
use crate::escalation::{EscalationPolicy, NextStep};
use crate::lifecycle::check_transition;
use crate::messages::{MessageKey, MessagePrefix, MessageType};
use crate::planner::Plan;

/// Job id recorded before the first submission.
pub const UNDEFINED_JOB_ID: &str = "undefined";

/// Result of handling a `submit` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A job was submitted.
    Submitted {
        /// The plan the job was submitted with.
        plan: Plan,
        /// Backend job id.
        job_id: String,
    },
    /// No tier was left; a terminal `error` message was written.
    Exhausted,
}

/// Plans and submits one attempt for an item.
///
/// The first prediction's memory bin is pinned in the item's metadata so
/// later predictions cannot move escalation backwards.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the item was cancelled, or any
/// predictor, backend or storage error.
pub async fn submit_work_item(
    bundle: &IoBundle,
    backend: &dyn JobBackend,
    predictor: &dyn ResourcePredictor,
    id: &WorkItemId,
    features: &FeatureRecord,
) -> Result<SubmitOutcome> {
    async {
        let mut metadata = bundle.metadata().get_or_default(id).await?;
        if metadata.terminated {
            return Err(Error::validation(format!("{id} was cancelled")));
        }

        let mut prediction = predictor.predict(features).await?;
        let pinned = *metadata.memory_bin.get_or_insert(prediction.memory_bin);
        prediction.memory_bin = pinned;

        let plan = match bundle.planner().plan(id, prediction, &metadata) {
            Ok(plan) => plan,
            Err(e @ Error::AllBinsExhausted { .. }) => {
                bundle.metadata().put(id, &metadata).await?;
                bundle
                    .transition(
                        id,
                        MessageType::Submit,
                        MessageType::Error,
                        &json!({"reason": e.to_string(), "exhausted": true}),
                    )
                    .await?;
                return Ok(SubmitOutcome::Exhausted);
            }
            Err(e) => return Err(e),
        };

        let request = JobRequest {
            job_name: format!("{id}-{}", plan.bin),
            tier: plan.resource_tier.clone(),
            command: vec![
                "sluice-process".into(),
                id.to_string(),
                plan.output_location.clone(),
            ],
            limits: JobLimits {
                timeout_seconds: plan.kill_timeout_seconds,
            },
        };
        let job_name = request.job_name.clone();
        let job_id = backend.submit(request).await?;
        bundle
            .metrics()
            .record_job_submission(&plan.resource_tier.queue);

        metadata.job_id.clone_from(&job_id);
        metadata.job_name = Some(job_name);
        metadata.ipppssoot = Some(id.to_string());
        metadata.bucket = Some(bundle.root().to_string());
        bundle.metadata().put(id, &metadata).await?;

        bundle
            .transition(
                id,
                MessageType::Submit,
                MessageType::Processing,
                &json!({"job_id": job_id}),
            )
            .await?;
        tracing::info!(job_id = %job_id, bin = plan.bin, "job submitted");
        Ok(SubmitOutcome::Submitted { plan, job_id })
    }
    .instrument(work_item_span("submit", id.as_str()))
    .await
}

/// Folds a failed job into the item's metadata and moves it on.
///
/// Writes `error`, then `rescue` when escalation allows another attempt or
/// `terminated` when the item was cancelled. Exhausted and held items stay
/// at `error`.
///
/// # Errors
///
/// Returns an error if the job cannot be described or storage fails.
pub async fn record_job_failure(
    bundle: &IoBundle,
    backend: &dyn JobBackend,
    id: &WorkItemId,
) -> Result<NextStep> {
    async {
        let mut metadata = bundle.metadata().get_or_default(id).await?;
        let job = backend.describe(&metadata.job_id).await?;
        EscalationPolicy::absorb(&mut metadata, &job);

        let policy = bundle.escalation();
        let kind = policy.classify(&metadata);
        policy.record_failure(&mut metadata, kind);
        let step = policy.next_step(&metadata, kind, bundle.planner());
        bundle.metadata().put(id, &metadata).await?;

        let payload = json!({
            "kind": kind,
            "exit_code": metadata.exit_code,
            "exit_reason": metadata.exit_reason,
            "exhausted": step == NextStep::Exhausted,
        });
        bundle
            .transition(id, MessageType::Processing, MessageType::Error, &payload)
            .await?;
        match step {
            NextStep::Rescue => {
                bundle
                    .transition(id, MessageType::Error, MessageType::Rescue, &payload)
                    .await?;
            }
            NextStep::Terminal => {
                bundle
                    .transition(id, MessageType::Error, MessageType::Terminated, &payload)
                    .await?;
            }
            NextStep::Exhausted | NextStep::Hold => {}
        }
        tracing::info!(
            ?kind,
            ?step,
            retries = metadata.retries,
            memory_retries = metadata.memory_retries,
            "job failure recorded"
        );
        Ok(step)
    }
    .instrument(work_item_span("record_failure", id.as_str()))
    .await
}

/// Handles a `rescue` message: drops partial outputs and resubmits.
///
/// # Errors
///
/// Returns an error if storage fails.
pub async fn rescue_work_item(bundle: &IoBundle, id: &WorkItemId) -> Result<()> {
    let removed = bundle.outputs().delete(&IdSelector::one(id.clone())).await?;
    tracing::debug!(work_item_id = %id, removed, "partial outputs removed");
    bundle
        .transition(id, MessageType::Rescue, MessageType::Submit, &json!(""))
        .await
}

/// Handles a `cancel` message: stops the job and marks the item terminated.
///
/// Every lifecycle message of the item is replaced by one `terminated`
/// message. Items that already reached a terminal state are left untouched.
///
/// # Errors
///
/// Returns [`Error::InvalidTransition`] if the item is already terminal, or an
/// error if storage or the backend fails. A job the backend no longer knows
/// about is not an error.
pub async fn cancel_work_item(
    bundle: &IoBundle,
    backend: &dyn JobBackend,
    id: &WorkItemId,
    reason: &str,
) -> Result<()> {
    let current = bundle
        .messages()
        .list(&MessagePrefix::AllFor(id.clone()))
        .await?;
    if let Some(done) = current.iter().find(|key| key.kind().is_terminal()) {
        check_transition(done.kind(), MessageType::Cancel)?;
    }

    let mut metadata = bundle.metadata().get_or_default(id).await?;
    if metadata.job_id != UNDEFINED_JOB_ID {
        match backend.terminate(&metadata.job_id, reason).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(job_id = %metadata.job_id, "job already gone");
            }
            Err(e) => return Err(e),
        }
    }
    metadata.terminated = true;
    bundle.metadata().put(id, &metadata).await?;

    bundle
        .messages()
        .delete(&MessagePrefix::AllFor(id.clone()))
        .await?;
    bundle
        .messages()
        .put_one(
            &MessageKey::new(MessageType::Terminated, id.clone()),
            &json!({"reason": reason}),
        )
        .await?;
    tracing::info!(work_item_id = %id, reason, "work item cancelled");
    Ok(())
}
