//! Test utility functions for checkrun scenarios

use async_trait::async_trait;
use checkrun::cache::{CacheManager, InMemoryCacheStore};
use checkrun::core::config::PipelineConfig;
use checkrun::core::{Event, Pipeline, PipelineRun, RunStatus, StepFailure};
use checkrun::execution::{ExecutionEngine, ExecutionEvent, ResultReporter, RunOutcome};
use checkrun::persistence::InMemoryPersistence;
use checkrun::provision::{LocalProvisioner, WorkspaceMode};
use checkrun::runner::{CommandOutput, CommandRunner, CommandSpec, RunnerError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Scripted reply for commands starting with a prefix
#[derive(Debug, Clone)]
pub struct Script {
    prefix: String,
    output: CommandOutput,
    /// Files (workspace-relative) the command creates
    writes: Vec<(String, String)>,
}

impl Script {
    pub fn ok(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            output: CommandOutput::new(0, "", ""),
            writes: Vec::new(),
        }
    }

    pub fn fail(prefix: &str, exit_code: i32, stderr: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            output: CommandOutput::new(exit_code, "", stderr),
            writes: Vec::new(),
        }
    }

    pub fn stderr(mut self, stderr: &str) -> Self {
        self.output.stderr = stderr.to_string();
        self
    }

    pub fn writes(mut self, path: &str, contents: &str) -> Self {
        self.writes.push((path.to_string(), contents.to_string()));
        self
    }
}

/// Command runner that answers from scripts and records every call.
///
/// Unscripted commands succeed with no output; `rustc --version` reports a
/// fixed version.
pub struct ScriptedRunner {
    scripts: Mutex<Vec<Script>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Add a script; later scripts win over earlier ones
    pub fn script(&self, script: Script) {
        self.scripts.lock().unwrap().insert(0, script);
    }

    pub fn clear_scripts(&self) {
        self.scripts.lock().unwrap().clear();
    }

    /// Command lines run so far
    pub fn command_lines(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.display()).collect()
    }

    /// Command lines run so far, minus toolchain provisioning
    pub fn step_commands(&self) -> Vec<String> {
        self.command_lines()
            .into_iter()
            .filter(|c| !c.starts_with("rustup ") && !c.starts_with("rustc "))
            .collect()
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        self.calls.lock().unwrap().push(command.clone());
        let line = command.display();

        let script = self
            .scripts
            .lock()
            .unwrap()
            .iter()
            .find(|s| line.starts_with(&s.prefix))
            .cloned();

        match script {
            Some(script) => {
                for (path, contents) in &script.writes {
                    let target = command.cwd.join(path);
                    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
                    std::fs::write(target, contents).unwrap();
                }
                Ok(script.output)
            }
            None if line.starts_with("rustc ") => Ok(CommandOutput::new(0, "rustc 1.80.0 (051478957 2024-07-21)\n", "")),
            None => Ok(CommandOutput::new(0, "", "")),
        }
    }
}

/// A minimal Cargo project on disk
pub fn fixture_source(lockfile: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "Cargo.toml", "[package]\nname = \"ps-mem\"\nversion = \"0.1.0\"\n");
    write_file(dir.path(), "Cargo.lock", lockfile);
    write_file(dir.path(), "src/main.rs", "fn main() {}\n");
    dir
}

pub fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// The built-in Rust pipeline
pub fn default_pipeline() -> Pipeline {
    PipelineConfig::rust_default().unwrap().to_pipeline().unwrap()
}

/// Parse a pipeline from YAML string
pub fn pipeline_from_yaml(yaml: &str) -> Pipeline {
    PipelineConfig::from_yaml(yaml)
        .unwrap_or_else(|e| panic!("Failed to parse pipeline YAML: {}", e))
        .to_pipeline()
        .unwrap()
}

/// Everything one or more runs share: source tree, runner, cache and history
pub struct Harness {
    pub source: tempfile::TempDir,
    pub workspaces: tempfile::TempDir,
    pub runner: Arc<ScriptedRunner>,
    pub cache: Arc<InMemoryCacheStore>,
    pub history: Arc<InMemoryPersistence>,
    pub events: Arc<Mutex<Vec<ExecutionEvent>>>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_pipeline(default_pipeline())
    }

    pub fn with_pipeline(pipeline: Pipeline) -> Self {
        Self {
            source: fixture_source("# lockfile v1\nserde 1.0.200\n"),
            workspaces: tempfile::tempdir().unwrap(),
            runner: Arc::new(ScriptedRunner::new()),
            cache: Arc::new(InMemoryCacheStore::new()),
            history: Arc::new(InMemoryPersistence::new()),
            events: Arc::new(Mutex::new(Vec::new())),
            pipeline,
        }
    }

    pub fn source_path(&self) -> &Path {
        self.source.path()
    }

    /// Root under which per-run snapshots are created
    pub fn workspace_root(&self) -> PathBuf {
        self.workspaces.path().to_path_buf()
    }

    /// Run the pipeline once for `event`
    pub async fn run(&self, event: Event) -> RunOutcome {
        let provisioner = LocalProvisioner::new(self.source.path(), &self.pipeline, self.runner.clone())
            .with_mode(WorkspaceMode::Snapshot {
                root: self.workspace_root(),
            });

        let mut engine = ExecutionEngine::new(self.pipeline.clone(), provisioner, self.runner.clone())
            .with_cache(CacheManager::new(self.cache.clone(), self.pipeline.cache.clone()))
            .with_reporter(ResultReporter::with_history(self.history.clone()));

        let events = self.events.clone();
        engine.add_event_handler(move |event| events.lock().unwrap().push(event));

        engine.execute(event).await
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }
}

/// Unwrap the run of a completed outcome
pub fn completed_run(outcome: &RunOutcome) -> &PipelineRun {
    outcome
        .run()
        .unwrap_or_else(|| panic!("Expected a run, but the event was skipped: {:?}", outcome))
}

/// Assert the run succeeded with exit code 0
pub fn assert_run_succeeded(outcome: &RunOutcome) {
    let run = completed_run(outcome);
    assert_eq!(
        run.status,
        RunStatus::Succeeded,
        "Run should have succeeded, steps: {:?}, failure: {:?}",
        run.executed_steps(),
        run.failed_step().and_then(|r| r.failure.clone())
    );
    assert_eq!(outcome.exit_code().code(), 0);
}

/// Assert the run failed at `step` and nothing ran after it
pub fn assert_failed_at(outcome: &RunOutcome, step: &str, failure: StepFailure) {
    let run = completed_run(outcome);
    assert_eq!(run.status, RunStatus::Failed);

    let failed = run
        .failed_step()
        .unwrap_or_else(|| panic!("Run has no failed step, steps: {:?}", run.executed_steps()));
    assert_eq!(failed.name, step);
    assert_eq!(failed.failure.as_ref(), Some(&failure));
    assert_eq!(
        run.results.iter().filter(|r| !r.success).count(),
        1,
        "only the last result may be a failure"
    );
}

/// Assert the steps that produced results, in order
pub fn assert_execution_order(outcome: &RunOutcome, expected: &[&str]) {
    let actual = completed_run(outcome).executed_steps();
    assert_eq!(actual, expected, "Expected execution order: {:?}\nActual: {:?}", expected, actual);
}

/// Assert the event was rejected without creating a run
pub fn assert_skipped(outcome: &RunOutcome) {
    assert!(outcome.is_skipped(), "Expected the event to be skipped: {:?}", outcome);
    assert_eq!(outcome.exit_code().code(), 0);
}

/// The full default step order
pub const ALL_STEPS: [&str; 6] = ["fetch", "fmt", "build", "clippy", "test-build", "test"];
