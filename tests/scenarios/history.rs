//! Test: Run history archived by the reporter

use crate::helpers::*;
use checkrun::core::{Event, RunStatus};
use checkrun::persistence::PersistenceBackend;

/// The archived summary mirrors the finished run
#[tokio::test]
async fn test_summary_matches_run() {
    let harness = Harness::new();
    harness
        .runner
        .script(Script::fail("cargo clippy", 101, "error: could not compile `ps-mem`"));

    let outcome = harness.run(Event::push("refs/heads/main")).await;
    let run = completed_run(&outcome);

    let summary = harness
        .history
        .load_execution(run.id)
        .await
        .unwrap()
        .expect("run archived");
    assert_eq!(summary.pipeline_name, "rust-ci");
    assert_eq!(summary.event_kind, "push");
    assert_eq!(summary.branch.as_deref(), Some("main"));
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.steps_run, 4);
    assert_eq!(summary.total_steps, 6);
    assert_eq!(summary.failed_step.as_deref(), Some("clippy"));
    assert_eq!(summary.failure.as_deref(), Some("exited with code 101"));
    assert_eq!(summary.exit_code, 101);
    assert_eq!(summary.cache, "miss");
    assert!(summary.completed_at.is_some());
}

/// Runs are listed newest first
#[tokio::test]
async fn test_history_lists_newest_first() {
    let harness = Harness::new();

    let first = harness.run(Event::pull_request()).await;
    harness.runner.script(Script::fail("cargo test --locked", 101, "1 failed"));
    let second = harness.run(Event::pull_request()).await;

    let listed = harness.history.list_executions("rust-ci").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].execution_id, completed_run(&second).id);
    assert_eq!(listed[1].execution_id, completed_run(&first).id);
    assert_eq!(listed[1].status, RunStatus::Succeeded);
    assert_eq!(listed[1].exit_code, 0);
}

/// Rejected events leave no trace in history
#[tokio::test]
async fn test_skipped_events_are_not_archived() {
    let harness = Harness::new();

    harness.run(Event::push("feature-x")).await;
    assert!(harness.history.list_executions("rust-ci").await.unwrap().is_empty());

    harness.run(Event::push("main")).await;
    assert_eq!(harness.history.list_pipelines().await.unwrap(), vec!["rust-ci"]);
}
