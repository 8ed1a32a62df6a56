//! Test: Matrix runs - expanded instances executed end to end

use crate::common::*;
use orchestrator::core::{AggregateOutcome, JobStatus};
use std::collections::HashSet;

const MATRIX: &str = r#"
name: tox
jobs:
  - id: tests
    matrix:
      os: [ubuntu, macos]
      python: ["3.8", "3.9"]
      include:
        - { os: windows, python: "3.9" }
        - { os: ubuntu, experimental: true }
      exclude:
        - { os: macos, python: "3.8" }
    env:
      TOX_ENV: py
    steps: [{ run: tox }]
  - id: publish
    needs: [tests]
    steps: [{ run: ./publish.sh }]
"#;

#[tokio::test]
async fn test_every_cell_runs_once() {
    let pipeline = pipeline(MATRIX);
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let report = engine.run(&pipeline).await;

    let ids: Vec<&str> = report
        .instances
        .iter()
        .filter(|i| i.template == "tests")
        .map(|i| i.id.as_str())
        .collect();
    assert_eq!(ids.len(), 4);
    assert!(ids.contains(&"tests (windows, 3.9)"));
    assert!(!ids.iter().any(|id| id.contains("macos, 3.8")));

    let called: HashSet<String> = runner.call_order().into_iter().collect();
    assert_eq!(called.len(), 5);
    for id in &ids {
        assert_eq!(runner.calls_for(id), 1, "{} ran more than once", id);
    }

    assert_eq!(report.job("tests"), Some(JobStatus::Success));
    assert_eq!(report.outcome, AggregateOutcome::Success);
}

#[tokio::test]
async fn test_matrix_values_reach_the_environment() {
    let pipeline = pipeline(MATRIX);
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    engine.run(&pipeline).await;

    let windows = runner
        .calls()
        .into_iter()
        .find(|r| r.instance_id == "tests (windows, 3.9)")
        .unwrap();
    assert_eq!(windows.env["MATRIX_OS"], "windows");
    assert_eq!(windows.env["MATRIX_PYTHON"], "3.9");
    assert_eq!(windows.env["TOX_ENV"], "py");
    assert_eq!(windows.matrix["os"], "windows");
    assert_eq!(windows.env["CI_JOB"], "tests");

    let experimental = runner
        .calls()
        .into_iter()
        .find(|r| r.env.get("MATRIX_EXPERIMENTAL").map(String::as_str) == Some("true"))
        .unwrap();
    assert_eq!(experimental.env["MATRIX_OS"], "ubuntu");
}

#[tokio::test]
async fn test_sibling_instances_get_separate_workspaces() {
    let pipeline = pipeline(MATRIX);
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    engine.run(&pipeline).await;

    let workdirs: HashSet<_> = runner.calls().into_iter().map(|r| r.workdir).collect();
    assert_eq!(workdirs.len(), 5);
    assert!(workdirs.iter().all(|dir| dir.starts_with(engine.dir.path())));
}

#[tokio::test]
async fn test_one_failing_cell_fails_the_job() {
    let pipeline = pipeline(MATRIX);
    let runner = MockRunner::new().script("tests (macos, 3.9)", &[1]);
    let engine = TestEngine::new(runner.clone());

    let report = engine.run(&pipeline).await;

    assert_eq!(report.status_of("tests (macos, 3.9)"), Some(JobStatus::Failure));
    assert_eq!(report.status_of("tests (ubuntu, 3.8, true)"), Some(JobStatus::Success));
    assert_eq!(report.job("tests"), Some(JobStatus::Failure));
    assert_eq!(report.status_of("publish"), Some(JobStatus::Skipped));
    assert_eq!(report.outcome, AggregateOutcome::Failure);
}

#[tokio::test]
async fn test_cell_guards_gate_individual_instances() {
    let pipeline = pipeline(
        r#"
name: per-cell
jobs:
  - id: build
    if: "matrix.os != 'windows'"
    matrix:
      os: [linux, windows]
    steps: [{ run: make }]
"#,
    );
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let report = engine.run(&pipeline).await;

    assert_eq!(report.status_of("build (linux)"), Some(JobStatus::Success));
    assert_eq!(report.status_of("build (windows)"), Some(JobStatus::Skipped));
    assert_eq!(report.job("build"), Some(JobStatus::Success));
    assert_eq!(report.outcome, AggregateOutcome::Success);
}

#[tokio::test]
async fn test_fully_excluded_job_is_skipped() {
    let pipeline = pipeline(
        r#"
name: empty-matrix
jobs:
  - id: build
    matrix:
      os: [linux]
      exclude:
        - { os: linux }
    steps: [{ run: make }]
  - id: after
    needs: [build]
    if: always()
    steps: [{ run: make }]
"#,
    );
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let report = engine.run(&pipeline).await;

    assert_eq!(report.job("build"), Some(JobStatus::Skipped));
    assert_eq!(report.status_of("after"), Some(JobStatus::Success));
    assert_eq!(runner.call_order(), vec!["after"]);
}
