//! Test: Cache short-circuit across runs

use crate::common::*;
use orchestrator::cache::{FsCache, InMemoryCache};
use orchestrator::core::{AggregateOutcome, JobStatus};
use std::sync::Arc;

const CACHED: &str = r#"
name: cached
jobs:
  - id: deps
    cache:
      key: deps
      inputs: [Cargo.lock, vendor]
    steps: [{ run: cargo fetch }]
  - id: build
    needs: [deps]
    steps: [{ run: cargo build }]
"#;

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Cargo.lock"), "serde 1.0").unwrap();
    std::fs::create_dir(dir.path().join("vendor")).unwrap();
    std::fs::write(dir.path().join("vendor").join("a.txt"), "a").unwrap();
    dir
}

#[tokio::test]
async fn test_second_run_hits_the_cache() {
    let project = project();
    let pipeline = pipeline(CACHED);
    let cache = Arc::new(InMemoryCache::new());

    let first_runner = MockRunner::new();
    let first = TestEngine::with_project_root(first_runner.clone(), project.path())
        .with_cache(cache.clone())
        .run(&pipeline)
        .await;
    let deps = &first.instance("deps").unwrap().result;
    assert!(!deps.cache_hit);
    assert!(deps.cache_key.is_some());
    assert_eq!(first_runner.calls_for("deps"), 1);
    assert_eq!(cache.len().await, 1);

    let second_runner = MockRunner::new();
    let second = TestEngine::with_project_root(second_runner.clone(), project.path())
        .with_cache(cache.clone())
        .run(&pipeline)
        .await;
    let deps = &second.instance("deps").unwrap().result;
    assert!(deps.cache_hit);
    assert_eq!(deps.status, JobStatus::Success);
    assert_eq!(deps.cache_key, first.instance("deps").unwrap().result.cache_key);
    assert_eq!(second_runner.calls_for("deps"), 0);

    // Dependents still run; only the cached job is short-circuited
    assert_eq!(second_runner.calls_for("build"), 1);
    assert_eq!(second.outcome, AggregateOutcome::Success);
}

#[tokio::test]
async fn test_changed_input_misses() {
    let project = project();
    let pipeline = pipeline(CACHED);
    let cache = Arc::new(InMemoryCache::new());

    TestEngine::with_project_root(MockRunner::new(), project.path())
        .with_cache(cache.clone())
        .run(&pipeline)
        .await;

    std::fs::write(project.path().join("vendor").join("b.txt"), "b").unwrap();

    let runner = MockRunner::new();
    let report = TestEngine::with_project_root(runner.clone(), project.path())
        .with_cache(cache.clone())
        .run(&pipeline)
        .await;

    assert!(!report.instance("deps").unwrap().result.cache_hit);
    assert_eq!(runner.calls_for("deps"), 1);
    assert_eq!(cache.len().await, 2);
}

#[tokio::test]
async fn test_failed_job_is_not_cached() {
    let project = project();
    let pipeline = pipeline(CACHED);
    let cache = Arc::new(InMemoryCache::new());

    let runner = MockRunner::new().script("deps", &[1]);
    let report = TestEngine::with_project_root(runner, project.path())
        .with_cache(cache.clone())
        .run(&pipeline)
        .await;

    assert_eq!(report.status_of("deps"), Some(JobStatus::Failure));
    assert_eq!(cache.len().await, 0);
}

#[tokio::test]
async fn test_filesystem_cache_survives_engines() {
    let project = project();
    let store = tempfile::tempdir().unwrap();
    let pipeline = pipeline(CACHED);

    TestEngine::with_project_root(MockRunner::new(), project.path())
        .with_cache(Arc::new(FsCache::new(store.path())))
        .run(&pipeline)
        .await;

    let runner = MockRunner::new();
    let report = TestEngine::with_project_root(runner.clone(), project.path())
        .with_cache(Arc::new(FsCache::new(store.path())))
        .run(&pipeline)
        .await;

    assert!(report.instance("deps").unwrap().result.cache_hit);
    assert_eq!(runner.calls_for("deps"), 0);
}

#[tokio::test]
async fn test_changed_command_misses() {
    let project = tempfile::tempdir().unwrap();
    std::fs::write(project.path().join("in.txt"), "fixtures").unwrap();
    let cache = Arc::new(InMemoryCache::new());

    let first = pipeline(
        r#"
name: edited
jobs:
  - id: tests
    cache: { key: tests, inputs: [in.txt] }
    steps: [{ run: pytest }]
"#,
    );
    TestEngine::with_project_root(MockRunner::new(), project.path())
        .with_cache(cache.clone())
        .run(&first)
        .await;

    let edited = pipeline(
        r#"
name: edited
jobs:
  - id: tests
    cache: { key: tests, inputs: [in.txt] }
    steps: [{ run: "exit 3" }]
"#,
    );
    let runner = MockRunner::new();
    let report = TestEngine::with_project_root(runner.clone(), project.path())
        .with_cache(cache.clone())
        .run(&edited)
        .await;

    let tests = &report.instance("tests").unwrap().result;
    assert!(!tests.cache_hit);
    assert_eq!(tests.status, JobStatus::Failure);
    assert_eq!(runner.calls_for("tests"), 1);
}
