//! Test: Dependency gating - needs, guards and the default success policy

use crate::common::*;
use orchestrator::core::{AggregateOutcome, JobStatus, LoadError, Pipeline};

/// A -> B where A fails: B never runs and the run fails
#[tokio::test]
async fn test_failed_dependency_skips_dependent() {
    let pipeline = pipeline(
        r#"
name: chain
jobs:
  - id: a
    steps: [{ run: "exit 1" }]
  - id: b
    needs: [a]
    steps: [{ run: make }]
"#,
    );
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let report = engine.run(&pipeline).await;

    assert_eq!(report.status_of("a"), Some(JobStatus::Failure));
    assert_eq!(report.status_of("b"), Some(JobStatus::Skipped));
    assert_eq!(report.outcome, AggregateOutcome::Failure);
    assert_eq!(runner.calls_for("b"), 0);
    assert_eq!(
        report.instance("b").unwrap().result.reason.as_deref(),
        Some("needs not successful: a (failure)")
    );
}

/// B needs A with guard `a == success`; A fails: B is skipped
#[tokio::test]
async fn test_status_guard_on_failed_dependency() {
    let pipeline = pipeline(
        r#"
name: guarded-chain
jobs:
  - id: a
    steps: [{ run: "exit 1" }]
  - id: b
    needs: [a]
    if: "a == success"
    steps: [{ run: make }]
"#,
    );
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let report = engine.run(&pipeline).await;

    assert_eq!(report.status_of("a"), Some(JobStatus::Failure));
    assert_eq!(report.status_of("b"), Some(JobStatus::Skipped));
    assert_eq!(report.outcome, AggregateOutcome::Failure);
    assert_eq!(runner.calls_for("b"), 0);
}

/// A guard that never reads status does not lift the success requirement
#[tokio::test]
async fn test_plain_guard_does_not_run_after_failure() {
    let pipeline = pipeline(
        r#"
name: plain-guard
jobs:
  - id: a
    steps: [{ run: "exit 1" }]
  - id: deploy
    needs: [a]
    if: "commit.branch == ''"
    steps: [{ run: ./deploy.sh }]
  - id: notify
    needs: [a]
    if: "failure() && commit.branch == ''"
    steps: [{ run: ./notify.sh }]
"#,
    );
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let report = engine.run(&pipeline).await;

    assert_eq!(report.status_of("a"), Some(JobStatus::Failure));
    assert_eq!(report.status_of("deploy"), Some(JobStatus::Skipped));
    assert_eq!(runner.calls_for("deploy"), 0);
    assert_eq!(report.status_of("notify"), Some(JobStatus::Success));
    assert_eq!(report.outcome, AggregateOutcome::Failure);
}

/// A, B (guard false) -> C requiring both: C is skipped, the run succeeds
#[tokio::test]
async fn test_skipped_dependency_is_not_a_failure() {
    let pipeline = pipeline(
        r#"
name: diamond
jobs:
  - id: a
    steps: [{ run: make }]
  - id: b
    if: "event == 'release'"
    steps: [{ run: make }]
  - id: c
    needs: [a, b]
    if: "needs.a.result == 'success' && needs.b.result == 'success'"
    steps: [{ run: make }]
"#,
    );
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let report = engine.run(&pipeline).await;

    assert_eq!(report.status_of("a"), Some(JobStatus::Success));
    assert_eq!(report.status_of("b"), Some(JobStatus::Skipped));
    assert_eq!(report.status_of("c"), Some(JobStatus::Skipped));
    assert_eq!(report.outcome, AggregateOutcome::Success);
    assert_eq!(runner.call_order(), vec!["a"]);
}

#[tokio::test]
async fn test_cleanup_job_runs_after_failure() {
    let pipeline = pipeline(
        r#"
name: cleanup
jobs:
  - id: build
    steps: [{ run: "exit 2" }]
  - id: report
    needs: [build]
    if: failure()
    steps: [{ run: ./report.sh }]
  - id: teardown
    needs: [build]
    if: always()
    steps: [{ run: ./teardown.sh }]
  - id: deploy
    needs: [build]
    if: success()
    steps: [{ run: ./deploy.sh }]
"#,
    );
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let report = engine.run(&pipeline).await;

    assert_eq!(report.status_of("report"), Some(JobStatus::Success));
    assert_eq!(report.status_of("teardown"), Some(JobStatus::Success));
    assert_eq!(report.status_of("deploy"), Some(JobStatus::Skipped));
    assert_eq!(report.outcome, AggregateOutcome::Failure);
}

#[tokio::test]
async fn test_guard_error_fails_only_that_instance() {
    let pipeline = pipeline(
        r#"
name: broken-guard
jobs:
  - id: lint
    steps: [{ run: make lint }]
  - id: odd
    if: "matches(commit.message, '(unclosed')"
    steps: [{ run: make }]
"#,
    );
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let report = engine.run(&pipeline).await;

    assert_eq!(report.status_of("lint"), Some(JobStatus::Success));
    assert_eq!(report.status_of("odd"), Some(JobStatus::Failure));
    assert!(report
        .instance("odd")
        .unwrap()
        .result
        .reason
        .as_deref()
        .unwrap()
        .contains("could not be evaluated"));
    assert_eq!(runner.calls_for("odd"), 0);
    assert_eq!(report.outcome, AggregateOutcome::Failure);
}

#[tokio::test]
async fn test_guards_see_commit_and_variables() {
    let pipeline = pipeline(
        r#"
name: guards
variables:
  deploy: "yes"
jobs:
  - id: tests
    if: "!contains(commit.message, '[ci skip]')"
    steps: [{ run: make test }]
  - id: deploy
    needs: [tests]
    if: "success() && vars.deploy == 'yes' && commit.branch == 'main'"
    steps: [{ run: ./deploy.sh }]
"#,
    );
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let seed = orchestrator::RunContext::new().with_commit(orchestrator::core::CommitInfo {
        message: "fix parser".to_string(),
        sha: "abc123".to_string(),
        branch: "main".to_string(),
    });
    let report = engine.run_with(&pipeline, seed).await;
    assert_eq!(report.status_of("deploy"), Some(JobStatus::Success));

    let seed = orchestrator::RunContext::new()
        .with_commit(orchestrator::core::CommitInfo {
            message: "docs [ci skip]".to_string(),
            ..Default::default()
        })
        .with_variable("deploy", "no");
    let report = engine.run_with(&pipeline, seed).await;
    assert_eq!(report.status_of("tests"), Some(JobStatus::Skipped));
    assert_eq!(report.status_of("deploy"), Some(JobStatus::Skipped));
    assert_eq!(report.outcome, AggregateOutcome::Skipped);
}

#[tokio::test]
async fn test_dependencies_run_in_order() {
    let pipeline = pipeline(
        r#"
name: ordered
jobs:
  - id: deploy
    needs: [test]
    steps: [{ run: ./deploy.sh }]
  - id: test
    needs: [build]
    steps: [{ run: make test }]
  - id: build
    steps: [{ run: make }]
"#,
    );
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let report = engine.run(&pipeline).await;

    assert_eq!(report.outcome, AggregateOutcome::Success);
    assert_eq!(runner.call_order(), vec!["build", "test", "deploy"]);
}

#[test]
fn test_cycle_rejected_before_anything_runs() {
    let result = Pipeline::from_yaml(
        r#"
name: cyclic
jobs:
  - id: a
    needs: [c]
    steps: [{ run: make }]
  - id: b
    needs: [a]
    steps: [{ run: make }]
  - id: c
    needs: [b]
    steps: [{ run: make }]
"#,
    );

    match result {
        Err(LoadError::Cycle(cycle)) => {
            assert_eq!(cycle.path.first(), cycle.path.last());
            assert_eq!(cycle.path.len(), 4);
        }
        other => panic!("expected cycle error, got {:?}", other.map(|p| p.name)),
    }
}
