//! Resource tier and timeout planning for submission attempts.
//!
//! Every submission attempt is planned from two inputs: a baseline
//! prediction for the item (wallclock seconds and memory bin) and the item's
//! control metadata. Memory escalation is strictly additive: the bin used is
//! `predicted_bin + memory_retries`, so each memory-attributed failure moves
//! the next attempt exactly one tier up. When no tier is left the plan fails
//! with [`Error::AllBinsExhausted`] and the item must not be retried.

use std::fmt;

use serde::{Deserialize, Serialize};

use sluice_core::WorkItemId;

use crate::backend::{FeatureRecord, ResourcePredictor};
use crate::branch::Branch;
use crate::error::{Error, Result};
use crate::metadata::ControlMetadata;
use crate::metrics::SluiceMetrics;

/// Default multiplier from predicted wallclock to kill timeout.
pub const DEFAULT_TIMEOUT_MULTIPLIER: f64 = 5.0;
/// Default lower clamp on the unscaled kill timeout, in seconds.
pub const DEFAULT_MIN_TIMEOUT_SECONDS: u64 = 1200;
/// Default upper clamp on the unscaled kill timeout, in seconds (48 hours).
pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 172_800;
/// Absolute floor on the scaled kill timeout, in seconds.
pub const TIMEOUT_FLOOR_SECONDS: u64 = 60;

/// One execution queue and its job definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceTier {
    /// Execution queue name.
    pub queue: String,
    /// Job definition submitted to that queue.
    pub executable: String,
}

impl ResourceTier {
    /// Creates a tier.
    #[must_use]
    pub fn new(queue: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            executable: executable.into(),
        }
    }
}

/// Returns the default four-tier table (2, 8, 16 and 64 GiB).
#[must_use]
pub fn default_tiers() -> Vec<ResourceTier> {
    ["2g", "8g", "16g", "64g"]
        .into_iter()
        .map(|size| {
            ResourceTier::new(format!("sluice-queue-{size}"), format!("sluice-job-{size}"))
        })
        .collect()
}

/// Planner tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Ordered tiers, smallest first.
    pub tiers: Vec<ResourceTier>,
    /// Predicted wallclock is multiplied by this before clamping.
    pub timeout_multiplier: f64,
    /// Lower clamp on the unscaled timeout.
    pub min_timeout_seconds: u64,
    /// Upper clamp on the unscaled timeout.
    pub max_timeout_seconds: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            timeout_multiplier: DEFAULT_TIMEOUT_MULTIPLIER,
            min_timeout_seconds: DEFAULT_MIN_TIMEOUT_SECONDS,
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
        }
    }
}

/// Baseline resource prediction for one work item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Expected wallclock runtime in seconds.
    pub wallclock_seconds: f64,
    /// Expected memory bin index.
    pub memory_bin: u32,
}

/// Instrument inferred from a work item id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    /// Ids starting with `i`.
    Wfc3,
    /// Ids starting with `j`.
    Acs,
    /// Ids starting with `l`.
    Cos,
    /// Ids starting with `o`.
    Stis,
    /// Anything else.
    Unknown,
}

impl Instrument {
    /// Infers the instrument from the id's leading character.
    #[must_use]
    pub fn infer(id: &WorkItemId) -> Self {
        match id.as_str().chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('i') => Self::Wfc3,
            Some('j') => Self::Acs,
            Some('l') => Self::Cos,
            Some('o') => Self::Stis,
            _ => Self::Unknown,
        }
    }

    /// Returns the instrument name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wfc3 => "wfc3",
            Self::Acs => "acs",
            Self::Cos => "cos",
            Self::Stis => "stis",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to submit one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// The planned item.
    pub work_item_id: WorkItemId,
    /// Instrument inferred from the id.
    pub instrument: Instrument,
    /// Where the job writes its outputs.
    pub output_location: String,
    /// Queue and job definition for the chosen bin.
    pub resource_tier: ResourceTier,
    /// The chosen bin index.
    pub bin: u32,
    /// Seconds after which the attempt is killed.
    pub kill_timeout_seconds: u64,
}

/// Maps predictions and retry state to plans.
#[derive(Debug, Clone)]
pub struct Planner {
    root: String,
    config: PlannerConfig,
    metrics: SluiceMetrics,
}

impl Planner {
    /// Creates a planner for one deployment root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the tier table is empty or the
    /// timeout bounds are inverted.
    pub fn new(root: impl Into<String>, config: PlannerConfig) -> Result<Self> {
        if config.tiers.is_empty() {
            return Err(Error::configuration("planner needs at least one resource tier"));
        }
        if config.min_timeout_seconds > config.max_timeout_seconds {
            return Err(Error::configuration(format!(
                "min timeout {}s exceeds max timeout {}s",
                config.min_timeout_seconds, config.max_timeout_seconds
            )));
        }
        Ok(Self {
            root: root.into(),
            config,
            metrics: SluiceMetrics::new(),
        })
    }

    /// Sets the metrics recorder.
    #[must_use]
    pub fn with_metrics(mut self, metrics: SluiceMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the tier table.
    #[must_use]
    pub fn tiers(&self) -> &[ResourceTier] {
        &self.config.tiers
    }

    /// Returns true if `bin` indexes a configured tier.
    #[must_use]
    pub fn has_bin(&self, bin: u32) -> bool {
        usize::try_from(bin).is_ok_and(|b| b < self.config.tiers.len())
    }

    /// Computes the kill timeout for one attempt.
    ///
    /// `clamp(wallclock * multiplier, min, max) * timeout_scale`, floored at
    /// 60 seconds and capped at the upper clamp.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn kill_timeout(&self, wallclock_seconds: f64, timeout_scale: f64) -> u64 {
        let min = self.config.min_timeout_seconds as f64;
        let max = self.config.max_timeout_seconds as f64;
        let wallclock = if wallclock_seconds.is_finite() {
            wallclock_seconds.max(0.0)
        } else {
            max
        };
        let scale = if timeout_scale.is_finite() && timeout_scale > 0.0 {
            timeout_scale
        } else {
            1.0
        };
        let base = (wallclock * self.config.timeout_multiplier).clamp(min, max);
        let ceiling = max.max(TIMEOUT_FLOOR_SECONDS as f64);
        (base * scale).clamp(TIMEOUT_FLOOR_SECONDS as f64, ceiling) as u64
    }

    /// Returns the output location for an item.
    #[must_use]
    pub fn output_location(&self, id: &WorkItemId) -> String {
        format!("{}/{}{id}", self.root, Branch::Outputs.prefix())
    }

    /// Plans the next attempt for an item.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllBinsExhausted`] when `memory_bin + memory_retries`
    /// is past the last tier.
    #[tracing::instrument(skip(self, prediction, metadata), fields(work_item_id = %id))]
    pub fn plan(
        &self,
        id: &WorkItemId,
        prediction: Prediction,
        metadata: &ControlMetadata,
    ) -> Result<Plan> {
        let bin = prediction.memory_bin.saturating_add(metadata.memory_retries);
        let Some(tier) = usize::try_from(bin)
            .ok()
            .and_then(|b| self.config.tiers.get(b))
        else {
            self.metrics.record_bins_exhausted();
            tracing::warn!(
                bin,
                memory_retries = metadata.memory_retries,
                "no resource tier left"
            );
            return Err(Error::AllBinsExhausted {
                work_item_id: id.to_string(),
                bin,
                tiers: self.config.tiers.len(),
            });
        };

        let plan = Plan {
            work_item_id: id.clone(),
            instrument: Instrument::infer(id),
            output_location: self.output_location(id),
            resource_tier: tier.clone(),
            bin,
            kill_timeout_seconds: self.kill_timeout(
                prediction.wallclock_seconds,
                metadata.timeout_scale,
            ),
        };
        self.metrics.record_plan(bin);
        tracing::info!(
            bin,
            queue = %plan.resource_tier.queue,
            kill_timeout_seconds = plan.kill_timeout_seconds,
            "attempt planned"
        );
        Ok(plan)
    }

    /// Asks the predictor for a baseline, then plans.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the prediction fails, or any error from
    /// [`Planner::plan`].
    pub async fn plan_with(
        &self,
        predictor: &dyn ResourcePredictor,
        id: &WorkItemId,
        features: &FeatureRecord,
        metadata: &ControlMetadata,
    ) -> Result<Plan> {
        let prediction = predictor.predict(features).await?;
        self.plan(id, prediction, metadata)
    }
}
