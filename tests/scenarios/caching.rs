//! Test: Dependency cache across runs

use crate::helpers::*;
use checkrun::cache::{SaveOutcome, Snapshot};
use checkrun::core::{CacheOutcome, Event};
use checkrun::execution::ExecutionEvent;

const CRATE_PATH: &str = ".cargo/registry/cache/serde-1.0.200.crate";

fn fetch_writes_registry() -> Script {
    Script::ok("cargo fetch").writes(CRATE_PATH, "serde crate bytes")
}

/// Entry names of the archive stored under `key`
async fn stored_entries(harness: &Harness, key: &str) -> Vec<String> {
    let blob = harness.cache.get(key).await.expect("stored archive");
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("entry.tar.gz");
    std::fs::write(&archive, blob).unwrap();
    Snapshot::list(&archive).unwrap()
}

fn save_outcomes(harness: &Harness) -> Vec<SaveOutcome> {
    harness
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ExecutionEvent::CacheSaved { outcome, .. } => Some(outcome),
            _ => None,
        })
        .collect()
}

/// Miss then save, hit then no-op, new lockfile misses again
#[tokio::test]
async fn test_cache_lifecycle() {
    let harness = Harness::new();
    harness.runner.script(fetch_writes_registry());

    // Cold run populates the cache
    let first = harness.run(Event::pull_request()).await;
    assert_run_succeeded(&first);
    let key = match &completed_run(&first).cache {
        CacheOutcome::Miss { key } => key.clone(),
        other => panic!("Expected a miss, got {:?}", other),
    };
    assert!(key.starts_with("cargo-"));
    assert!(matches!(save_outcomes(&harness)[..], [SaveOutcome::Saved { .. }]));

    assert!(stored_entries(&harness, &key).await.contains(&CRATE_PATH.to_string()));

    // Warm run restores the same state; fetch adds nothing
    harness.clear_events();
    harness.runner.clear_scripts();
    let second = harness.run(Event::pull_request()).await;
    assert_run_succeeded(&second);
    assert_eq!(completed_run(&second).cache, CacheOutcome::Hit { key: key.clone() });
    assert!(matches!(save_outcomes(&harness)[..], [SaveOutcome::Unchanged]));
    assert_eq!(harness.cache.len().await, 1);

    // Changing the lockfile changes the key
    write_file(harness.source_path(), "Cargo.lock", "# lockfile v1\nserde 1.0.201\n");
    harness.clear_events();
    harness.runner.script(fetch_writes_registry());
    let third = harness.run(Event::pull_request()).await;
    assert_run_succeeded(&third);
    match &completed_run(&third).cache {
        CacheOutcome::Miss { key: new_key } => assert_ne!(new_key, &key),
        other => panic!("Expected a miss, got {:?}", other),
    }
    assert_eq!(harness.cache.len().await, 2);
}

/// Restored files never leak into the source tree
#[tokio::test]
async fn test_restore_targets_workspace_only() {
    let harness = Harness::new();
    harness.runner.script(fetch_writes_registry());

    harness.run(Event::pull_request()).await;
    harness.run(Event::pull_request()).await;

    assert!(!harness.source_path().join(".cargo").exists());
}

/// A failed run leaves the cache untouched
#[tokio::test]
async fn test_failed_run_is_not_saved() {
    let harness = Harness::new();
    harness.runner.script(fetch_writes_registry());
    harness.runner.script(Script::fail("cargo build", 101, "error[E0425]: cannot find value"));

    let outcome = harness.run(Event::pull_request()).await;

    assert_failed_at(&outcome, "build", checkrun::core::StepFailure::ExitCode(101));
    assert!(harness.cache.is_empty().await);
    assert!(save_outcomes(&harness).is_empty());
}

/// An unreadable entry makes the run start cold and is then replaced
#[tokio::test]
async fn test_corrupt_entry_is_replaced() {
    let harness = Harness::new();
    harness.runner.script(fetch_writes_registry());

    let first = harness.run(Event::pull_request()).await;
    let key = match &completed_run(&first).cache {
        CacheOutcome::Miss { key } => key.clone(),
        other => panic!("Expected a miss, got {:?}", other),
    };
    harness.cache.insert(&key, b"not a snapshot".to_vec()).await;

    harness.clear_events();
    let second = harness.run(Event::pull_request()).await;

    assert_run_succeeded(&second);
    assert!(matches!(
        completed_run(&second).cache,
        CacheOutcome::Unavailable { .. }
    ));
    assert!(matches!(save_outcomes(&harness)[..], [SaveOutcome::Saved { .. }]));

    assert!(stored_entries(&harness, &key).await.contains(&CRATE_PATH.to_string()));
}

/// Without a lockfile there is nothing to key on
#[tokio::test]
async fn test_missing_manifest_disables_cache() {
    let harness = Harness::new();
    std::fs::remove_file(harness.source_path().join("Cargo.lock")).unwrap();
    harness.runner.script(fetch_writes_registry());

    let outcome = harness.run(Event::pull_request()).await;

    assert_run_succeeded(&outcome);
    assert_eq!(completed_run(&outcome).cache, CacheOutcome::Disabled);
    assert!(harness.cache.is_empty().await);
}

/// Caching turned off in the pipeline file
#[tokio::test]
async fn test_cache_disabled_by_config() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "no-cache"
toolchain:
  install: false
cache:
  enabled: false
steps:
  - name: "fetch"
    builtin: fetch
"#,
    );
    let harness = Harness::with_pipeline(pipeline);
    harness.runner.script(fetch_writes_registry());

    let outcome = harness.run(Event::pull_request()).await;

    assert_run_succeeded(&outcome);
    assert_eq!(completed_run(&outcome).cache, CacheOutcome::Disabled);
    assert!(harness.cache.is_empty().await);
    assert!(!harness
        .events()
        .iter()
        .any(|e| matches!(e, ExecutionEvent::CacheRestored { .. })));
}
