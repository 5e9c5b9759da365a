//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    cache::{CacheLookup, CacheManager, Fingerprint, SaveOutcome},
    core::{CacheOutcome, Event, ExecutionContext, Pipeline, PipelineRun, RunStatus, Step, StepFailure, StepResult},
    execution::{ExecutionResult, ResultReporter, RunExitCode, StepExecutor, StepObserver},
    provision::Provisioner,
    runner::CommandRunner,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a pipeline run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    TriggerRejected {
        event: Event,
        reason: String,
    },
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        event: Event,
        total_steps: usize,
    },
    Provisioned {
        workspace: PathBuf,
        toolchain: String,
    },
    ProvisionFailed {
        error: String,
    },
    CacheRestored {
        outcome: CacheOutcome,
    },
    StepStarted {
        index: usize,
        total: usize,
        name: String,
        command: String,
    },
    StepCompleted {
        index: usize,
        name: String,
        duration_ms: u64,
    },
    StepFailed {
        index: usize,
        name: String,
        failure: StepFailure,
        output_tail: String,
    },
    CacheSaved {
        key: String,
        outcome: SaveOutcome,
    },
    CacheError {
        error: String,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
        exit_code: RunExitCode,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// What became of an event
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The trigger rule did not admit the event; nothing ran
    Skipped { event: Event, reason: String },
    /// A run was created and finalized
    Completed { run: PipelineRun, exit_code: RunExitCode },
}

impl RunOutcome {
    /// A skipped event is not a failure
    pub fn exit_code(&self) -> RunExitCode {
        match self {
            RunOutcome::Skipped { .. } => RunExitCode::SUCCESS,
            RunOutcome::Completed { exit_code, .. } => *exit_code,
        }
    }

    pub fn run(&self) -> Option<&PipelineRun> {
        match self {
            RunOutcome::Skipped { .. } => None,
            RunOutcome::Completed { run, .. } => Some(run),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped { .. })
    }
}

/// Main pipeline execution engine
pub struct ExecutionEngine<P, R> {
    pipeline: Pipeline,
    provisioner: P,
    executor: StepExecutor<R>,
    cache: Option<CacheManager>,
    reporter: ResultReporter,
    event_handlers: Vec<EventHandler>,
}

impl<P: Provisioner, R: CommandRunner> ExecutionEngine<P, R> {
    pub fn new(pipeline: Pipeline, provisioner: P, runner: R) -> Self {
        let executor = StepExecutor::new(runner, pipeline.shared_steps());
        Self {
            pipeline,
            provisioner,
            executor,
            cache: None,
            reporter: ResultReporter::new(),
            event_handlers: Vec::new(),
        }
    }

    /// Enable the dependency cache
    pub fn with_cache(mut self, cache: CacheManager) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_reporter(mut self, reporter: ResultReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Evaluate `event` against the trigger rule and, if admitted, run the
    /// pipeline to completion
    pub async fn execute(&self, event: Event) -> RunOutcome {
        if !self.pipeline.admits(&event) {
            let reason = self.pipeline.trigger.rejection_reason(&event);
            info!(event = %event, "Event not admitted: {}", reason);
            self.emit_event(ExecutionEvent::TriggerRejected {
                event: event.clone(),
                reason: reason.clone(),
            });
            return RunOutcome::Skipped { event, reason };
        }

        let mut run = self.pipeline.new_run(event);
        run.start();

        info!(run_id = %run.id, pipeline = %run.pipeline_name, event = %run.event, "Starting pipeline run");
        self.emit_event(ExecutionEvent::RunStarted {
            run_id: run.id,
            pipeline_name: run.pipeline_name.clone(),
            event: run.event.clone(),
            total_steps: run.total_steps,
        });

        let mut context = match self.provisioner.provision(&run).await {
            Ok(context) => context,
            Err(e) => {
                error!(run_id = %run.id, "Provisioning failed: {}", e);
                run.fail_provisioning(e.to_string());
                self.emit_event(ExecutionEvent::ProvisionFailed { error: e.to_string() });
                return self.finish(run).await;
            }
        };

        self.emit_event(ExecutionEvent::Provisioned {
            workspace: context.workspace.clone(),
            toolchain: context
                .toolchain
                .version
                .clone()
                .unwrap_or_else(|| context.toolchain.channel.clone()),
        });

        let fingerprint = self.restore_cache(&mut context, &mut run).await;

        let result = self
            .executor
            .run_with_observer(&mut context, &mut run, &EventObserver { engine: self })
            .await;

        if let Some(fingerprint) = fingerprint {
            self.save_cache(&fingerprint, &context, &result).await;
        }

        self.provisioner.release(&context).await;
        self.finish(run).await
    }

    async fn finish(&self, mut run: PipelineRun) -> RunOutcome {
        let exit_code = self.reporter.finalize(&mut run).await;
        info!(run_id = %run.id, status = ?run.status, "Pipeline run finished");
        self.emit_event(ExecutionEvent::RunFinished {
            run_id: run.id,
            status: run.status,
            exit_code,
        });
        RunOutcome::Completed { run, exit_code }
    }

    /// Restore the cache for the workspace's manifest.
    ///
    /// Returns the fingerprint to save under once the steps are done.
    async fn restore_cache(&self, context: &mut ExecutionContext, run: &mut PipelineRun) -> Option<Fingerprint> {
        let cache = self.cache.as_ref().filter(|c| c.config().enabled)?;

        let fingerprint = match cache.fingerprint(context).await {
            Ok(Some(fingerprint)) => fingerprint,
            Ok(None) => {
                self.emit_event(ExecutionEvent::CacheRestored {
                    outcome: CacheOutcome::Disabled,
                });
                return None;
            }
            Err(e) => {
                warn!("Cache unavailable, starting cold: {}", e);
                run.cache = CacheOutcome::Unavailable { reason: e.to_string() };
                self.emit_event(ExecutionEvent::CacheRestored {
                    outcome: run.cache.clone(),
                });
                return None;
            }
        };

        let key = fingerprint.key().to_string();
        run.cache = match cache.restore(&fingerprint, context).await {
            Ok(CacheLookup::Hit(_)) => CacheOutcome::Hit { key },
            Ok(CacheLookup::Miss) => CacheOutcome::Miss { key },
            Err(e) => {
                warn!(key = %key, "Cache restore failed, starting cold: {}", e);
                CacheOutcome::Unavailable { reason: e.to_string() }
            }
        };
        self.emit_event(ExecutionEvent::CacheRestored {
            outcome: run.cache.clone(),
        });

        Some(fingerprint)
    }

    /// Persist the dependency state of a successful run
    async fn save_cache(&self, fingerprint: &Fingerprint, context: &ExecutionContext, result: &ExecutionResult) {
        let Some(cache) = &self.cache else { return };
        if !result.is_success() {
            info!(key = %fingerprint, "Run failed, cache not saved");
            return;
        }

        match cache.save(fingerprint, context).await {
            Ok(outcome) => self.emit_event(ExecutionEvent::CacheSaved {
                key: fingerprint.key().to_string(),
                outcome,
            }),
            Err(e) => {
                warn!(key = %fingerprint, "Cache save failed: {}", e);
                self.emit_event(ExecutionEvent::CacheError { error: e.to_string() });
            }
        }
    }
}

/// Forwards executor progress as engine events
struct EventObserver<'a, P, R> {
    engine: &'a ExecutionEngine<P, R>,
}

impl<P: Provisioner, R: CommandRunner> StepObserver for EventObserver<'_, P, R> {
    fn step_started(&self, step: &Step, total: usize) {
        self.engine.emit_event(ExecutionEvent::StepStarted {
            index: step.index,
            total,
            name: step.name.clone(),
            command: step.command_line(),
        });
    }

    fn step_finished(&self, result: &StepResult) {
        let event = match &result.failure {
            None => ExecutionEvent::StepCompleted {
                index: result.index,
                name: result.name.clone(),
                duration_ms: result.duration_ms,
            },
            Some(failure) => ExecutionEvent::StepFailed {
                index: result.index,
                name: result.name.clone(),
                failure: failure.clone(),
                output_tail: result.output_tail.clone(),
            },
        };
        self.engine.emit_event(event);
    }
}
