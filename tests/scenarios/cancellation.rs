//! Test: Cancellation through the run handle

use crate::common::*;
use orchestrator::core::{AggregateOutcome, JobStatus, RunContext};
use orchestrator::execution::{ExecutionEvent, RunStatus};
use std::time::Duration;

const LONG: &str = r#"
name: long
jobs:
  - id: a
    steps: [{ run: sleep 10000 }]
  - id: b
    needs: [a]
    steps: [{ run: make }]
  - id: notify
    needs: [b]
    if: always()
    steps: [{ run: ./notify.sh }]
"#;

#[tokio::test]
async fn test_cancel_stops_running_and_pending_instances() {
    let pipeline = pipeline(LONG);
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let handle = engine.engine.start(pipeline.clone(), RunContext::new());
    runner.wait_active(1).await;
    handle.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("cancelled run did not finish")
        .unwrap();

    assert_eq!(report.outcome, AggregateOutcome::Cancelled);
    assert_eq!(report.status_of("a"), Some(JobStatus::Cancelled));
    assert_eq!(report.status_of("b"), Some(JobStatus::Cancelled));
    assert_eq!(report.status_of("notify"), Some(JobStatus::Cancelled));
    assert_eq!(runner.killed(), 1);
    assert_eq!(runner.calls_for("b"), 0);
    assert_eq!(runner.calls_for("notify"), 0);

    let events = engine.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::RunCancelled { .. })));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunFinished {
            outcome: AggregateOutcome::Cancelled,
            ..
        })
    ));
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let pipeline = pipeline(LONG);
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let handle = engine.engine.start(pipeline.clone(), RunContext::new());
    runner.wait_active(1).await;
    let canceller = handle.canceller();
    handle.cancel();
    canceller.cancel();
    handle.cancel();

    let report = handle.wait().await.unwrap();
    assert_eq!(report.outcome, AggregateOutcome::Cancelled);

    let cancelled_events = engine
        .events()
        .into_iter()
        .filter(|e| matches!(e, ExecutionEvent::RunCancelled { .. }))
        .count();
    assert_eq!(cancelled_events, 1);
}

#[tokio::test]
async fn test_cancel_after_completion_changes_nothing() {
    let pipeline = pipeline(
        r#"
name: quick
jobs:
  - id: a
    steps: [{ run: make }]
"#,
    );
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let handle = engine.engine.start(pipeline.clone(), RunContext::new());
    let canceller = handle.canceller();
    let report = handle.wait().await.unwrap();
    canceller.cancel();

    assert_eq!(report.outcome, AggregateOutcome::Success);
    assert_eq!(report.status_of("a"), Some(JobStatus::Success));
}

#[tokio::test]
async fn test_poll_reports_progress_then_outcome() {
    let pipeline = pipeline(
        r#"
name: polled
jobs:
  - id: slow
    steps: [{ run: sleep 300 }]
"#,
    );
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    let handle = engine.engine.start(pipeline.clone(), RunContext::new());
    runner.wait_active(1).await;
    assert_eq!(
        handle.poll(),
        RunStatus::Pending {
            finished: 0,
            total: 1
        }
    );

    let mut status = handle.poll();
    for _ in 0..300 {
        status = handle.poll();
        if matches!(status, RunStatus::Finished(_)) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, RunStatus::Finished(AggregateOutcome::Success));

    let report = handle.wait().await.unwrap();
    assert_eq!(report.outcome, AggregateOutcome::Success);
}
