//! Result reporter - settles a run's status and process exit code

use crate::{
    core::{PipelineRun, RunStatus},
    persistence::{ExecutionSummary, PersistenceBackend},
};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Exit code of a run, always in `0..=255`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunExitCode(u8);

impl RunExitCode {
    pub const SUCCESS: RunExitCode = RunExitCode(0);
    pub const FAILURE: RunExitCode = RunExitCode(1);

    /// Map a failing process status to a run failure code.
    ///
    /// Zero, negative and out-of-range codes become 1 so that a failed
    /// run never reports success.
    pub fn from_failure(code: Option<i32>) -> Self {
        match code {
            Some(c) if (1..=255).contains(&c) => RunExitCode(c as u8),
            _ => Self::FAILURE,
        }
    }

    pub fn code(&self) -> i32 {
        self.0 as i32
    }

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RunExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<RunExitCode> for std::process::ExitCode {
    fn from(code: RunExitCode) -> Self {
        std::process::ExitCode::from(code.0)
    }
}

/// Aggregates step outcomes into one status and archives the run
#[derive(Default)]
pub struct ResultReporter {
    history: Option<Arc<dyn PersistenceBackend>>,
}

impl ResultReporter {
    pub fn new() -> Self {
        Self { history: None }
    }

    pub fn with_history(history: Arc<dyn PersistenceBackend>) -> Self {
        Self {
            history: Some(history),
        }
    }

    /// Exit code for a run in its current state
    pub fn exit_code(run: &PipelineRun) -> RunExitCode {
        match run.status {
            RunStatus::Succeeded => RunExitCode::SUCCESS,
            _ => RunExitCode::from_failure(run.failed_step().and_then(|r| r.exit_code)),
        }
    }

    /// Settle the final status, archive the run and return its exit code.
    ///
    /// Archiving is best-effort and never changes the exit code.
    pub async fn finalize(&self, run: &mut PipelineRun) -> RunExitCode {
        if !run.is_finished() {
            run.finish();
        }
        let code = Self::exit_code(run);

        info!(
            run_id = %run.id,
            pipeline = %run.pipeline_name,
            status = ?run.status,
            steps = run.results.len(),
            total = run.total_steps,
            exit_code = code.code(),
            "Run finalized"
        );

        if let Some(history) = &self.history {
            let summary = ExecutionSummary::from_run(run, code.code());
            if let Err(e) = history.save_execution(&summary).await {
                warn!(run_id = %run.id, "Failed to archive run: {}", e);
            }
        }

        code
    }
}
