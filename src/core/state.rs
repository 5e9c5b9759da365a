//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run admitted but not started
    Pending,
    /// Run is currently executing
    Running,
    /// Every step passed
    Succeeded,
    /// Provisioning or a step failed
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    /// Parse the `Debug` form used by the history store
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(RunStatus::Pending),
            "Running" => Some(RunStatus::Running),
            "Succeeded" => Some(RunStatus::Succeeded),
            "Failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Why a step failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepFailure {
    /// The command exited with a non-zero status
    ExitCode(i32),
    /// The command succeeded but reported warnings while warnings are denied
    WarningsDenied { warnings: usize },
    /// The command did not finish in time
    TimedOut { secs: u64 },
    /// The command could not be started
    SpawnFailed(String),
}

impl StepFailure {
    /// The process exit code, when the command ran to completion
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            StepFailure::ExitCode(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepFailure::ExitCode(code) => write!(f, "exited with code {}", code),
            StepFailure::WarningsDenied { warnings } => {
                write!(f, "{} warning(s) reported with warnings denied", warnings)
            }
            StepFailure::TimedOut { secs } => write!(f, "timed out after {}s", secs),
            StepFailure::SpawnFailed(err) => write!(f, "failed to start: {}", err),
        }
    }
}

/// Outcome of one step within one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Position of the step in the pipeline
    pub index: usize,

    /// Step name
    pub name: String,

    /// Process exit code (absent on timeout or spawn failure)
    pub exit_code: Option<i32>,

    /// Whether the step passed
    pub success: bool,

    /// Failure reason, if any
    pub failure: Option<StepFailure>,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Tail of the combined stdout/stderr
    pub output_tail: String,
}

impl StepResult {
    pub fn passed(
        index: usize,
        name: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        output_tail: String,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            exit_code: Some(0),
            success: true,
            failure: None,
            duration_ms,
            started_at,
            finished_at: Utc::now(),
            output_tail,
        }
    }

    pub fn failed(
        index: usize,
        name: impl Into<String>,
        failure: StepFailure,
        exit_code: Option<i32>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        output_tail: String,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            exit_code,
            success: false,
            failure: Some(failure),
            duration_ms,
            started_at,
            finished_at: Utc::now(),
            output_tail,
        }
    }
}
