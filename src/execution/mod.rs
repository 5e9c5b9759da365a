//! Pipeline execution: step sequencing, reporting and orchestration

pub mod engine;
pub mod executor;
pub mod reporter;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent, RunOutcome};
pub use executor::{ExecutionResult, NoopObserver, StepExecutor, StepObserver, OUTPUT_TAIL_LINES};
pub use reporter::{ResultReporter, RunExitCode};
