use anyhow::{Context, Result};
use checkrun::cache::{CacheManager, DirectoryCacheStore, Fingerprint, FingerprintInputs};
use checkrun::cli::commands::{FingerprintCommand, HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use checkrun::cli::output::*;
use checkrun::cli::terminal_output::TerminalOutput;
use checkrun::cli::{Cli, Command};
use checkrun::core::config::PipelineConfig;
use checkrun::core::RunStatus;
use checkrun::execution::{ExecutionEngine, ResultReporter, RunExitCode, RunOutcome};
use checkrun::persistence::{ExecutionSummary, PersistenceBackend};
use checkrun::provision::{LocalProvisioner, WorkspaceMode};
use checkrun::runner::ProcessRunner;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::from_args();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let history_db = cli.history_db.as_deref();
    match &cli.command {
        Command::Run(cmd) => Ok(run_pipeline(cmd, history_db, cli.verbose).await?.into()),
        Command::Validate(cmd) => validate_pipeline(cmd),
        Command::Fingerprint(cmd) => print_fingerprint(cmd),
        Command::List(cmd) => list_pipelines(cmd, history_db).await,
        Command::History(cmd) => show_history(cmd, history_db).await,
    }
}

async fn run_pipeline(cmd: &RunCommand, history_db: Option<&Path>, verbose: bool) -> Result<RunExitCode> {
    let mut config = PipelineConfig::load(cmd.file.as_deref()).context("Failed to load pipeline config")?;
    if cmd.no_cache {
        config.cache.enabled = false;
    }
    if cmd.no_install {
        config.toolchain.install = false;
    }

    let event = cmd.event().context("Invalid event")?;
    let mut pipeline = config.to_pipeline()?;

    println!("{}Loaded pipeline: {}", INFO, style(&pipeline.name).bold());

    // Rejected events must not touch the source, workspaces, cache or history
    if !pipeline.admits(&event) {
        println!(
            "{}Nothing to do for {}: {}",
            INFO,
            style(&event).cyan(),
            pipeline.trigger.rejection_reason(&event)
        );
        return Ok(RunExitCode::SUCCESS);
    }

    // Apply variable overrides
    for (key, value) in &cmd.variable {
        pipeline.variables.insert(key.clone(), value.clone());
        println!(
            "{}Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let runner = Arc::new(ProcessRunner::new());

    let mode = if cmd.in_place {
        WorkspaceMode::InPlace
    } else {
        let root = cmd
            .workspace
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("checkrun-workspaces"));
        WorkspaceMode::Snapshot { root }
    };
    let source = cmd
        .source
        .canonicalize()
        .with_context(|| format!("Source directory {} not found", cmd.source.display()))?;
    let provisioner = LocalProvisioner::new(source, &pipeline, runner.clone())
        .with_mode(mode)
        .keep_workspace(cmd.keep_workspace);

    let reporter = if cmd.no_history {
        ResultReporter::new()
    } else {
        match open_history(history_db).await {
            Ok(history) => ResultReporter::with_history(history),
            Err(e) => {
                warn!("History unavailable, run will not be archived: {:#}", e);
                ResultReporter::new()
            }
        }
    };

    let cache = pipeline.cache.enabled.then(|| {
        let store = match &cmd.cache_dir {
            Some(dir) => DirectoryCacheStore::new(dir),
            None => DirectoryCacheStore::with_default_path(),
        };
        CacheManager::new(Arc::new(store), pipeline.cache.clone())
    });

    let pipeline_name = pipeline.name.clone();
    let mut engine = ExecutionEngine::new(pipeline, provisioner, runner).with_reporter(reporter);
    if let Some(cache) = cache {
        engine = engine.with_cache(cache);
    }

    let show_progress = !verbose && console::Term::stdout().is_term();
    let terminal = Arc::new(TerminalOutput::new(cmd.tail, show_progress));
    engine.add_event_handler(move |event| terminal.on_event(&event));

    println!();
    let outcome = engine.execute(event).await;

    match &outcome {
        RunOutcome::Skipped { .. } => {
            println!("\n{}Nothing to do for {}", INFO, style(&pipeline_name).bold());
        }
        RunOutcome::Completed { run, .. } if run.status == RunStatus::Succeeded => {
            println!(
                "\n{}{} completed {} ({})",
                CHECK,
                style(&pipeline_name).bold(),
                style("successfully").green(),
                style(format_duration(run.duration().unwrap_or_default())).dim()
            );
        }
        RunOutcome::Completed { run, exit_code } => {
            let at = run
                .failed_step()
                .map(|r| format!(" at step {}", style(&r.name).red()))
                .unwrap_or_default();
            println!(
                "\n{}{} {}{} (exit code {})",
                CROSS,
                style(&pipeline_name).bold(),
                style("failed").red(),
                at,
                exit_code
            );
        }
    }

    Ok(outcome.exit_code())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<ExitCode> {
    println!("{}Validating pipeline...", INFO);

    match PipelineConfig::load(cmd.file.as_deref()) {
        Ok(config) => {
            println!("{}Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Toolchain: {}", style(&config.toolchain.channel).cyan());
            println!("  Steps: {}", style(config.steps.len()).cyan());
            for step in &config.steps {
                println!("    - {}", step.name);
            }
            println!("  Variables: {}", style(config.variables.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{}Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_fingerprint(cmd: &FingerprintCommand) -> Result<ExitCode> {
    let config = PipelineConfig::load(cmd.file.as_deref()).context("Failed to load pipeline config")?;
    let manifest_path = cmd.source.join(&config.cache.manifest);
    let manifest = std::fs::read(&manifest_path)
        .with_context(|| format!("Failed to read manifest {}", manifest_path.display()))?;

    let inputs = FingerprintInputs {
        prefix: config.cache.key_prefix.clone(),
        os: std::env::consts::OS.to_string(),
        channel: config.toolchain.channel.clone(),
        toolchain_version: cmd.toolchain_version.clone(),
    };
    println!("{}", Fingerprint::compute(&manifest, &inputs));
    Ok(ExitCode::SUCCESS)
}

async fn open_history(path: Option<&Path>) -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(checkrun::persistence::SqliteExecutionStore::default_path);
        let store = checkrun::persistence::SqliteExecutionStore::at_path(&path).await?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        if let Some(path) = path {
            warn!(path = %path.display(), "Built without sqlite support, history is not persisted");
        }
        Ok(Arc::new(checkrun::persistence::InMemoryPersistence::new()))
    }
}

async fn list_pipelines(cmd: &ListCommand, history_db: Option<&Path>) -> Result<ExitCode> {
    let store = open_history(history_db).await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}No pipelines found in history", INFO);
        return Ok(ExitCode::SUCCESS);
    }

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let executions = store.list_executions(pipeline).await?;
            json_data.push(serde_json::json!({
                "name": pipeline,
                "run_count": executions.len(),
                "succeeded": executions.iter().filter(|e| e.status == RunStatus::Succeeded).count(),
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}Pipelines in history:", INFO);

    for pipeline_name in &pipelines {
        if cmd.with_counts {
            let executions = store.list_executions(pipeline_name).await?;
            let succeeded = executions.iter().filter(|e| e.status == RunStatus::Succeeded).count();
            let failed = executions.iter().filter(|e| e.status == RunStatus::Failed).count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(pipeline_name).bold(),
                style(executions.len()).cyan(),
                style(succeeded).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn show_history(cmd: &HistoryCommand, history_db: Option<&Path>) -> Result<ExitCode> {
    let store = open_history(history_db).await?;

    // If specific execution ID is requested
    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;

        match store.load_execution(exec_id).await? {
            Some(summary) => print_execution_details(&summary, cmd.verbose)?,
            None => println!("{}Execution not found", WARN),
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut executions = match &cmd.pipeline {
        Some(pipeline_name) => store.list_executions(pipeline_name).await?,
        None => {
            let mut all = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all.extend(store.list_executions(&pipeline).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    };
    executions.truncate(cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(ExitCode::SUCCESS);
    }

    if executions.is_empty() {
        println!("{}No executions found", INFO);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}Run history (showing latest {}):", INFO, executions.len());
    for summary in &executions {
        println!("  {}", format_execution_summary(summary));
    }

    Ok(ExitCode::SUCCESS)
}

fn print_execution_details(summary: &ExecutionSummary, verbose: bool) -> Result<()> {
    println!("{}Run Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    match &summary.branch {
        Some(branch) => println!("  Event: {} ({})", summary.event_kind, branch),
        None => println!("  Event: {}", summary.event_kind),
    }
    println!("  Status: {}", format_status(summary.status));
    println!("  Exit code: {}", summary.exit_code);
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Steps: {} ({}/{})",
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan(),
        summary.steps_run,
        summary.total_steps
    );
    println!("  Cache: {}", summary.cache);
    if let Some(step) = &summary.failed_step {
        println!("  Failed step: {}", style(step).red());
    }
    if let Some(failure) = &summary.failure {
        println!("  Failure: {}", style(failure).red());
    }

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
