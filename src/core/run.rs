//! Pipeline run - one execution instance

use crate::core::{
    state::{RunStatus, StepResult},
    trigger::Event,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to the dependency cache during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheOutcome {
    /// Caching is turned off for this pipeline or run
    Disabled,
    /// A cache entry was restored
    Hit { key: String },
    /// No entry for the key; the run started cold
    Miss { key: String },
    /// The cache could not be consulted; the run started cold
    Unavailable { reason: String },
}

/// One execution of a pipeline.
///
/// Results are prefix-complete: every recorded result except possibly the
/// last one succeeded, and nothing is recorded after a failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique execution ID
    pub id: Uuid,

    pub pipeline_name: String,

    /// The event that admitted this run
    pub event: Event,

    pub status: RunStatus,

    /// Step results in execution order
    pub results: Vec<StepResult>,

    /// Number of steps in the pipeline
    pub total_steps: usize,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    pub cache: CacheOutcome,

    /// Set when provisioning failed before any step ran
    pub provision_error: Option<String>,
}

impl PipelineRun {
    pub fn new(pipeline_name: impl Into<String>, event: Event, total_steps: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_name: pipeline_name.into(),
            event,
            status: RunStatus::Pending,
            results: Vec::new(),
            total_steps,
            started_at: None,
            finished_at: None,
            cache: CacheOutcome::Disabled,
            provision_error: None,
        }
    }

    /// Mark the run as started
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Append a step result, keeping results prefix-complete
    pub fn record(&mut self, result: StepResult) -> Result<(), String> {
        if let Some(failed) = self.failed_step() {
            return Err(format!(
                "cannot record step '{}' after failed step '{}'",
                result.name, failed.name
            ));
        }
        if result.index != self.results.len() {
            return Err(format!(
                "step '{}' has index {} but {} result(s) are recorded",
                result.name,
                result.index,
                self.results.len()
            ));
        }
        self.results.push(result);
        Ok(())
    }

    /// Terminate the run because the environment could not be provisioned
    pub fn fail_provisioning(&mut self, error: impl Into<String>) {
        self.provision_error = Some(error.into());
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
    }

    /// Settle the final status from the recorded results
    pub fn finish(&mut self) {
        self.status = if self.all_steps_passed() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        self.finished_at = Some(Utc::now());
    }

    /// The failing step, if the run halted on one
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.results.last().filter(|r| !r.success)
    }

    /// Whether every pipeline step ran and passed
    pub fn all_steps_passed(&self) -> bool {
        self.provision_error.is_none()
            && self.results.len() == self.total_steps
            && self.results.iter().all(|r| r.success)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Names of the steps that ran, in order
    pub fn executed_steps(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn duration(&self) -> Option<std::time::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.signed_duration_since(start).to_std().ok(),
            _ => None,
        }
    }

    /// Fraction of steps that ran (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 1.0;
        }
        self.results.len() as f64 / self.total_steps as f64
    }
}
