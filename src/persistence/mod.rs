//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

use crate::core::{CacheOutcome, PipelineRun, RunStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a finished pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    pub pipeline_name: String,

    /// Kind of the admitting event
    pub event_kind: String,

    /// Branch of the admitting event, if any
    pub branch: Option<String>,

    pub status: RunStatus,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of steps that produced a result
    pub steps_run: usize,

    /// Total number of steps
    pub total_steps: usize,

    /// Name of the step the run halted on
    pub failed_step: Option<String>,

    /// Failure reason (step failure or provisioning error)
    pub failure: Option<String>,

    /// Process exit code reported for the run
    pub exit_code: i32,

    /// Cache outcome in display form
    pub cache: String,
}

impl ExecutionSummary {
    /// Summarize a finalized run
    pub fn from_run(run: &PipelineRun, exit_code: i32) -> Self {
        let failed = run.failed_step();
        let failure = match (&run.provision_error, failed) {
            (Some(err), _) => Some(format!("provisioning failed: {}", err)),
            (None, Some(result)) => result.failure.as_ref().map(|f| f.to_string()),
            (None, None) => None,
        };

        Self {
            execution_id: run.id,
            pipeline_name: run.pipeline_name.clone(),
            event_kind: run.event.kind.as_str().to_string(),
            branch: run.event.branch_name().map(String::from),
            status: run.status,
            started_at: run.started_at.unwrap_or_else(Utc::now),
            completed_at: run.finished_at,
            steps_run: run.results.len(),
            total_steps: run.total_steps,
            failed_step: failed.map(|r| r.name.clone()),
            failure,
            exit_code,
            cache: cache_label(&run.cache),
        }
    }

    /// Progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 1.0;
        }
        self.steps_run as f64 / self.total_steps as f64
    }
}

/// Short display form of a cache outcome
pub fn cache_label(outcome: &CacheOutcome) -> String {
    match outcome {
        CacheOutcome::Disabled => "disabled".to_string(),
        CacheOutcome::Hit { .. } => "hit".to_string(),
        CacheOutcome::Miss { .. } => "miss".to_string(),
        CacheOutcome::Unavailable { .. } => "unavailable".to_string(),
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load an execution by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// List executions for a pipeline, newest first
    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// Most recent execution for a pipeline
    async fn latest_execution(&self, pipeline_name: &str) -> Result<Option<ExecutionSummary>> {
        Ok(self.list_executions(pipeline_name).await?.into_iter().next())
    }

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<Uuid, ExecutionSummary>>,
    by_pipeline: RwLock<HashMap<String, Vec<Uuid>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            by_pipeline: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        let replaced = execs
            .insert(execution.execution_id, execution.clone())
            .is_some();

        if !replaced {
            let mut by_pipeline = self.by_pipeline.write().await;
            by_pipeline
                .entry(execution.pipeline_name.clone())
                .or_default()
                .push(execution.execution_id);
        }

        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(execs.get(&execution_id).cloned())
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let by_pipeline = self.by_pipeline.read().await;

        let mut result: Vec<_> = by_pipeline
            .get(pipeline_name)
            .map(|ids| ids.iter().filter_map(|id| execs.get(id).cloned()).collect())
            .unwrap_or_default();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let by_pipeline = self.by_pipeline.read().await;
        let mut names: Vec<_> = by_pipeline.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
