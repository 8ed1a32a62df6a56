//! Test: Retries, timeouts and continue-on-error

use crate::common::*;
use orchestrator::core::{AggregateOutcome, JobStatus};

#[tokio::test]
async fn test_flaky_job_recovers_on_retry() {
    let pipeline = pipeline(
        r#"
name: flaky
jobs:
  - id: integration
    retries: 2
    steps: [{ run: make integration }]
  - id: deploy
    needs: [integration]
    steps: [{ run: ./deploy.sh }]
"#,
    );
    let runner = MockRunner::new().script("integration", &[1, 0]);
    let engine = TestEngine::new(runner.clone());

    let report = engine.run(&pipeline).await;

    let integration = &report.instance("integration").unwrap().result;
    assert_eq!(integration.status, JobStatus::Success);
    assert_eq!(integration.attempts, 2);
    assert_eq!(runner.calls_for("integration"), 2);
    assert_eq!(report.status_of("deploy"), Some(JobStatus::Success));
    assert_eq!(report.outcome, AggregateOutcome::Success);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let pipeline = pipeline(
        r#"
name: broken
defaults:
  retries: 1
jobs:
  - id: build
    steps: [{ run: "exit 3" }]
"#,
    );
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let report = engine.run(&pipeline).await;

    let build = &report.instance("build").unwrap().result;
    assert_eq!(build.status, JobStatus::Failure);
    assert_eq!(build.attempts, 2);
    assert_eq!(build.exit_code, Some(3));
    assert_eq!(runner.calls_for("build"), 2);
    assert_eq!(report.outcome, AggregateOutcome::Failure);
}

#[tokio::test]
async fn test_continue_on_error_does_not_fail_the_run() {
    let pipeline = pipeline(
        r#"
name: optional-lint
jobs:
  - id: lint
    continue_on_error: true
    steps: [{ run: "exit 1" }]
  - id: test
    steps: [{ run: make test }]
"#,
    );
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let report = engine.run(&pipeline).await;

    let lint = &report.instance("lint").unwrap().result;
    assert_eq!(lint.status, JobStatus::Failure);
    assert!(!lint.required);
    assert_eq!(report.job("lint"), Some(JobStatus::Failure));
    assert_eq!(report.status_of("test"), Some(JobStatus::Success));
    assert_eq!(report.outcome, AggregateOutcome::Success);
}

#[tokio::test]
async fn test_timeout_fails_the_instance() {
    let pipeline = pipeline(
        r#"
name: slow
jobs:
  - id: hang
    timeout_secs: 1
    steps: [{ run: sleep 5000 }]
  - id: quick
    steps: [{ run: make }]
"#,
    );
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let report = engine.run(&pipeline).await;

    let hang = &report.instance("hang").unwrap().result;
    assert_eq!(hang.status, JobStatus::Failure);
    assert!(hang.timed_out);
    assert_eq!(runner.killed(), 1);
    assert_eq!(report.status_of("quick"), Some(JobStatus::Success));
    assert_eq!(report.outcome, AggregateOutcome::Failure);
}
