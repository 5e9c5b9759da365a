//! checkrun - a declarative, fail-fast CI pipeline for Cargo projects

pub mod cache;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod provision;
pub mod runner;

// Re-export commonly used types
pub use cache::{CacheManager, CacheStore, Fingerprint};
pub use core::{Event, EventKind, ExecutionContext, Pipeline, PipelineRun, RunStatus, Step, StepResult, TriggerRule};
pub use execution::{ExecutionEngine, ExecutionEvent, ResultReporter, RunExitCode, RunOutcome, StepExecutor};
pub use provision::{LocalProvisioner, Provisioner};
pub use runner::{CommandRunner, ProcessRunner};
