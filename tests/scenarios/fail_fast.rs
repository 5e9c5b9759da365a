//! Test: Fail-fast sequencing - the first failing step ends the run

use crate::helpers::*;
use checkrun::core::{Event, StepFailure};
use checkrun::execution::ExecutionEvent;

/// A format failure on push halts before build and reports fmt's exit code
#[tokio::test]
async fn test_fmt_failure_halts_before_build() {
    let harness = Harness::new();
    harness
        .runner
        .script(Script::fail("cargo fmt", 1, "Diff in src/main.rs at line 1"));

    let outcome = harness.run(Event::push("main")).await;

    assert_failed_at(&outcome, "fmt", StepFailure::ExitCode(1));
    assert_execution_order(&outcome, &["fetch", "fmt"]);
    assert_eq!(completed_run(&outcome).results.len(), 2);
    assert_eq!(outcome.exit_code().code(), 1);
    assert!(!harness
        .runner
        .step_commands()
        .iter()
        .any(|c| c.starts_with("cargo build")));
}

/// Whichever step fails, exactly the steps before it and itself have results
#[tokio::test]
async fn test_results_are_prefix_complete_for_every_step() {
    let prefixes = [
        "cargo fetch",
        "cargo fmt",
        "cargo build",
        "cargo clippy",
        "cargo test --no-run",
        "cargo test --locked",
    ];

    for (i, prefix) in prefixes.iter().enumerate() {
        let harness = Harness::new();
        let code = 10 + i as i32;
        harness.runner.script(Script::fail(prefix, code, "boom"));

        let outcome = harness.run(Event::pull_request()).await;

        assert_failed_at(&outcome, ALL_STEPS[i], StepFailure::ExitCode(code));
        assert_execution_order(&outcome, &ALL_STEPS[..=i]);
        assert_eq!(outcome.exit_code().code(), code);
        assert_eq!(harness.runner.step_commands().len(), i + 1);
    }
}

/// Lint warnings fail the clippy step even when it exits 0
#[tokio::test]
async fn test_clippy_warnings_fail_the_run() {
    let harness = Harness::new();
    harness.runner.script(
        Script::ok("cargo clippy").stderr("warning: unused variable: `rss`\n  --> src/main.rs:3:9\n"),
    );

    let outcome = harness.run(Event::pull_request()).await;

    assert_failed_at(&outcome, "clippy", StepFailure::WarningsDenied { warnings: 1 });
    assert_execution_order(&outcome, &["fetch", "fmt", "build", "clippy"]);
    assert_eq!(outcome.exit_code().code(), 1);
}

/// Compiler warnings outside the lint step are tolerated
#[tokio::test]
async fn test_build_warnings_are_tolerated() {
    let harness = Harness::new();
    harness
        .runner
        .script(Script::ok("cargo build").stderr("warning: field `pss` is never read\n"));

    assert_run_succeeded(&harness.run(Event::pull_request()).await);
}

/// The failing step's output tail reaches event handlers
#[tokio::test]
async fn test_failure_event_carries_output() {
    let harness = Harness::new();
    harness
        .runner
        .script(Script::fail("cargo test --locked", 101, "test smaps::parse ... FAILED\n"));

    harness.run(Event::pull_request()).await;

    let failed = harness
        .events()
        .into_iter()
        .find_map(|e| match e {
            ExecutionEvent::StepFailed { name, output_tail, .. } => Some((name, output_tail)),
            _ => None,
        })
        .expect("a StepFailed event");
    assert_eq!(failed.0, "test");
    assert!(failed.1.contains("smaps::parse ... FAILED"));
}

/// Custom steps follow the same rules
#[tokio::test]
async fn test_custom_step_deny_warnings() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "custom"
toolchain:
  install: false
steps:
  - name: "audit"
    run: ["cargo", "audit"]
    deny_warnings: true
    warning_pattern: "Warning:"
  - name: "doc"
    run: ["cargo", "doc", "--no-deps"]
"#,
    );
    let harness = Harness::with_pipeline(pipeline);
    harness
        .runner
        .script(Script::ok("cargo audit").stderr("Warning: 2 unmaintained crates\n"));

    let outcome = harness.run(Event::pull_request()).await;

    assert_failed_at(&outcome, "audit", StepFailure::WarningsDenied { warnings: 1 });
    assert_eq!(harness.runner.step_commands(), vec!["cargo audit"]);
}
