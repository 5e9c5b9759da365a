//! Test: Environment provisioning

use crate::helpers::*;
use checkrun::core::{Event, RunStatus};
use checkrun::execution::ExecutionEvent;
use checkrun::persistence::PersistenceBackend;

/// A toolchain that cannot be installed fails the run before any step
#[tokio::test]
async fn test_toolchain_failure_runs_no_steps() {
    let harness = Harness::new();
    harness.runner.script(Script::fail(
        "rustup toolchain install",
        1,
        "error: toolchain 'stable' is not installable",
    ));

    let outcome = harness.run(Event::pull_request()).await;

    let run = completed_run(&outcome);
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.results.is_empty());
    assert!(run.provision_error.as_deref().unwrap_or_default().contains("stable"));
    assert_eq!(outcome.exit_code().code(), 1);
    assert!(harness.runner.step_commands().is_empty());
    assert!(harness.cache.is_empty().await);

    let events = harness.events();
    assert!(events.iter().any(|e| matches!(e, ExecutionEvent::ProvisionFailed { .. })));
    assert!(!events.iter().any(|e| matches!(e, ExecutionEvent::StepStarted { .. })));

    let summary = harness
        .history
        .latest_execution("rust-ci")
        .await
        .unwrap()
        .expect("archived run");
    assert_eq!(summary.status, RunStatus::Failed);
    assert!(summary
        .failure
        .as_deref()
        .unwrap_or_default()
        .starts_with("provisioning failed"));
}

/// The toolchain is installed with the configured profile and components
#[tokio::test]
async fn test_toolchain_install_command() {
    let harness = Harness::new();
    harness.run(Event::pull_request()).await;

    let lines = harness.runner.command_lines();
    assert_eq!(
        lines[0],
        "rustup toolchain install stable --profile minimal --component rustfmt,clippy"
    );
    assert_eq!(lines[1], "rustc +stable --version");
}

/// Steps run in a per-run snapshot that is removed afterwards
#[tokio::test]
async fn test_steps_run_in_disposable_snapshot() {
    let harness = Harness::new();
    harness
        .runner
        .script(Script::ok("cargo build").writes("target/debug/ps-mem", "binary"));

    let outcome = harness.run(Event::pull_request()).await;
    assert_run_succeeded(&outcome);

    let root = harness.workspace_root();
    let run_id = completed_run(&outcome).id.to_string();
    for call in harness.runner.calls() {
        assert!(call.cwd.starts_with(&root), "{} ran outside the workspace root", call.display());
        assert!(call.cwd.ends_with(&run_id));
    }

    assert!(!harness.source_path().join("target").exists());
    assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
}

/// A failed toolchain install leaves no workspace behind
#[tokio::test]
async fn test_failed_provisioning_cleans_up() {
    let harness = Harness::new();
    harness
        .runner
        .script(Script::fail("rustup toolchain install", 1, "network unreachable"));

    harness.run(Event::pull_request()).await;

    assert_eq!(std::fs::read_dir(harness.workspace_root()).unwrap().count(), 0);
}

/// Pipeline env reaches every step with the workspace substituted
#[tokio::test]
async fn test_step_environment() {
    let harness = Harness::new();
    let outcome = harness.run(Event::pull_request()).await;
    assert_run_succeeded(&outcome);

    let fetch = harness
        .runner
        .calls()
        .into_iter()
        .find(|c| c.display().starts_with("cargo fetch"))
        .expect("fetch was run");
    let cargo_home = fetch.env.get("CARGO_HOME").expect("CARGO_HOME set");
    assert_eq!(cargo_home, &fetch.cwd.join(".cargo").display().to_string());
}
