//! Test: Trigger gating - which events create runs

use crate::helpers::*;
use checkrun::core::{CacheOutcome, Event, EventKind};
use checkrun::execution::ExecutionEvent;
use checkrun::persistence::PersistenceBackend;

/// A pull request runs every step and exits 0
#[tokio::test]
async fn test_pull_request_runs_all_steps() {
    let harness = Harness::new();

    let outcome = harness.run(Event::pull_request()).await;

    assert_run_succeeded(&outcome);
    assert_execution_order(&outcome, &ALL_STEPS);
    assert_eq!(
        harness.runner.step_commands(),
        vec![
            "cargo fetch --locked",
            "cargo fmt --all -- --check",
            "cargo build --all-targets --locked",
            "cargo clippy --all-targets --locked -- -D warnings",
            "cargo test --no-run --locked",
            "cargo test --locked",
        ]
    );
}

/// Provisioning and cache restore happen before the first step
#[tokio::test]
async fn test_event_order() {
    let harness = Harness::new();
    harness.run(Event::pull_request()).await;

    let events = harness.events();
    assert!(matches!(events[0], ExecutionEvent::RunStarted { total_steps: 6, .. }));
    assert!(matches!(events[1], ExecutionEvent::Provisioned { .. }));
    assert!(matches!(
        events[2],
        ExecutionEvent::CacheRestored {
            outcome: CacheOutcome::Miss { .. }
        }
    ));
    assert!(matches!(events[3], ExecutionEvent::StepStarted { index: 0, .. }));
    assert!(matches!(events.last(), Some(ExecutionEvent::RunFinished { .. })));
}

/// Pull requests are admitted whatever their branch
#[tokio::test]
async fn test_pull_request_on_any_branch() {
    let harness = Harness::new();

    let outcome = harness
        .run(Event::new(EventKind::PullRequest, Some("feature-x".to_string())))
        .await;

    assert_run_succeeded(&outcome);
}

/// A push to main runs; refs are normalized
#[tokio::test]
async fn test_push_to_main() {
    let harness = Harness::new();

    assert_run_succeeded(&harness.run(Event::push("main")).await);
    assert_run_succeeded(&harness.run(Event::push("refs/heads/main")).await);
}

/// A push to another branch creates no run and touches nothing
#[tokio::test]
async fn test_push_to_feature_branch_is_skipped() {
    let harness = Harness::new();

    let outcome = harness.run(Event::push("feature-x")).await;

    assert_skipped(&outcome);
    assert!(harness.runner.command_lines().is_empty());
    assert_eq!(std::fs::read_dir(harness.workspace_root()).unwrap().count(), 0);
    assert!(harness.cache.is_empty().await);
    assert!(harness.history.list_pipelines().await.unwrap().is_empty());

    let events = harness.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ExecutionEvent::TriggerRejected { .. }));
}

/// Unknown kinds and branchless pushes are not admitted
#[tokio::test]
async fn test_unknown_and_branchless_events_are_skipped() {
    let harness = Harness::new();

    assert_skipped(&harness.run(Event::new(EventKind::Unknown, Some("main".to_string()))).await);
    assert_skipped(&harness.run(Event::new(EventKind::Push, None)).await);
    assert!(harness.runner.command_lines().is_empty());
}

/// Configured triggers replace the defaults
#[tokio::test]
async fn test_configured_triggers() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "release-ci"
on:
  pull_request: false
  push:
    branches: ["release", "main"]
toolchain:
  install: false
steps:
  - name: "check"
    run: ["cargo", "check"]
"#,
    );
    let harness = Harness::with_pipeline(pipeline);

    assert_skipped(&harness.run(Event::pull_request()).await);
    assert_skipped(&harness.run(Event::push("develop")).await);

    let outcome = harness.run(Event::push("release")).await;
    assert_run_succeeded(&outcome);
    assert_eq!(harness.runner.step_commands(), vec!["cargo check"]);
}
