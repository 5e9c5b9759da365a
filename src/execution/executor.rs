//! Step executor - runs the ordered step list inside a provisioned context

use crate::{
    core::{ExecutionContext, PipelineRun, Step, StepFailure, StepResult},
    runner::{tail_lines, CommandRunner, CommandSpec, RunnerError},
};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lines of combined output kept per step
pub const OUTPUT_TAIL_LINES: usize = 50;

/// How a call to [`StepExecutor::run`] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Every step ran and passed
    AllPassed,
    /// A step failed and nothing after it ran
    Halted { index: usize, step: String },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::AllPassed)
    }
}

/// Callback for step progress
pub trait StepObserver: Send + Sync {
    fn step_started(&self, _step: &Step, _total: usize) {}

    fn step_finished(&self, _result: &StepResult) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl StepObserver for NoopObserver {}

/// Executes steps sequentially, stopping at the first failure
pub struct StepExecutor<R> {
    runner: R,
    steps: Arc<[Step]>,
}

impl<R: CommandRunner> StepExecutor<R> {
    pub fn new(runner: R, steps: Arc<[Step]>) -> Self {
        Self { runner, steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Run every step in declared order.
    pub async fn run(&self, context: &mut ExecutionContext, run: &mut PipelineRun) -> ExecutionResult {
        self.run_with_observer(context, run, &NoopObserver).await
    }

    /// Run every step in declared order, reporting progress to `observer`.
    ///
    /// The first failing step is recorded as the last result of `run` and
    /// the loop returns immediately.
    pub async fn run_with_observer(
        &self,
        context: &mut ExecutionContext,
        run: &mut PipelineRun,
        observer: &dyn StepObserver,
    ) -> ExecutionResult {
        let total = self.steps.len();

        for step in self.steps.iter() {
            observer.step_started(step, total);
            let result = self.execute_step(step, context).await;
            observer.step_finished(&result);

            let passed = result.success;
            if let Err(e) = run.record(result) {
                error!(step = %step.name, "Step result rejected: {}", e);
                return ExecutionResult::Halted {
                    index: step.index,
                    step: step.name.clone(),
                };
            }

            if !passed {
                info!(step = %step.name, index = step.index, "Halting pipeline after failed step");
                return ExecutionResult::Halted {
                    index: step.index,
                    step: step.name.clone(),
                };
            }
        }

        ExecutionResult::AllPassed
    }

    /// Execute one step and build its result
    pub async fn execute_step(&self, step: &Step, context: &mut ExecutionContext) -> StepResult {
        context.current_step = Some(step.name.clone());

        let variables = context.get_rendering_variables();
        let command = CommandSpec::new(step.render_command(&variables), &context.workspace)
            .with_env(context.step_env(step))
            .with_timeout(Duration::from_secs(step.timeout_secs));

        info!(step = %step.name, command = %command.display(), "Executing step");

        let started_at = Utc::now();
        let clock = Instant::now();
        let outcome = self.runner.run(&command).await;
        let duration_ms = clock.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(output) => {
                let combined = output.combined();
                let tail = tail_lines(&combined, OUTPUT_TAIL_LINES);
                match step.evaluate(output.exit_code, &combined) {
                    None => {
                        debug!(step = %step.name, duration_ms, "Step passed");
                        StepResult::passed(step.index, &step.name, started_at, duration_ms, tail)
                    }
                    Some(failure) => {
                        warn!(step = %step.name, exit_code = output.exit_code, "Step failed: {}", failure);
                        StepResult::failed(
                            step.index,
                            &step.name,
                            failure,
                            Some(output.exit_code),
                            started_at,
                            duration_ms,
                            tail,
                        )
                    }
                }
            }
            Err(e) => {
                let failure = match e {
                    RunnerError::Timeout(_) => StepFailure::TimedOut {
                        secs: step.timeout_secs,
                    },
                    other => StepFailure::SpawnFailed(other.to_string()),
                };
                error!(step = %step.name, "Step failed: {}", failure);
                StepResult::failed(step.index, &step.name, failure, None, started_at, duration_ms, String::new())
            }
        };

        context.set_step_output(&step.name, result.output_tail.clone());
        context.current_step = None;
        result
    }
}
