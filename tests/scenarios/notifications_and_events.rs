//! Test: Notifications, execution events and concurrency limits

use crate::common::*;
use orchestrator::core::{AggregateOutcome, JobStatus, RunContext};
use orchestrator::execution::ExecutionEvent;
use orchestrator::SchedulingStrategy;
use std::sync::Arc;

const FAN_OUT: &str = r#"
name: fan-out
jobs:
  - id: build
    steps: [{ run: make }]
  - id: unit
    needs: [build]
    steps: [{ run: sleep 100 }]
  - id: lint
    needs: [build]
    steps: [{ run: sleep 100 }]
  - id: docs
    needs: [build]
    steps: [{ run: sleep 100 }]
"#;

#[tokio::test]
async fn test_notifier_called_once_with_outcome() {
    let pipeline = pipeline(FAN_OUT);
    let runner = MockRunner::new().script("lint", &[1]);
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = TestEngine::new(runner).with_notifier(notifier.clone());

    let seed = RunContext::new().with_commit(orchestrator::core::CommitInfo {
        message: "bump".to_string(),
        sha: "deadbeef".to_string(),
        branch: "main".to_string(),
    });
    let report = engine.run_with(&pipeline, seed).await;

    let events = notifier.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.run_id, report.run_id);
    assert_eq!(event.pipeline, "fan-out");
    assert_eq!(event.outcome, AggregateOutcome::Failure);
    assert_eq!(event.jobs["lint"], JobStatus::Failure);
    assert_eq!(event.jobs["unit"], JobStatus::Success);
    assert_eq!(event.jobs, report.jobs);
    assert_eq!(event.branch.as_deref(), Some("main"));
    assert_eq!(event.commit_sha.as_deref(), Some("deadbeef"));
}

#[tokio::test]
async fn test_events_bracket_the_run() {
    let pipeline = pipeline(FAN_OUT);
    let engine = TestEngine::new(MockRunner::new());

    let report = engine.run(&pipeline).await;
    let events = engine.events();

    assert!(matches!(
        events.first(),
        Some(ExecutionEvent::RunStarted { instances: 4, .. })
    ));
    assert_eq!(
        events.last(),
        Some(&ExecutionEvent::RunFinished {
            run_id: report.run_id,
            outcome: AggregateOutcome::Success,
        })
    );

    let mut completed: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::JobCompleted { template, .. } => Some(template.clone()),
            _ => None,
        })
        .collect();
    completed.sort();
    assert_eq!(completed, vec!["build", "docs", "lint", "unit"]);

    let started = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::InstanceStarted { .. }))
        .count();
    let finished = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::InstanceFinished { .. }))
        .count();
    assert_eq!(started, 4);
    assert_eq!(finished, 4);
}

#[tokio::test]
async fn test_sequential_runs_one_at_a_time() {
    let pipeline = pipeline(FAN_OUT);
    let runner = MockRunner::new();
    let engine = TestEngine::with_strategy(runner.clone(), SchedulingStrategy::Sequential);

    let report = engine.run(&pipeline).await;

    assert_eq!(report.outcome, AggregateOutcome::Success);
    assert_eq!(runner.max_active(), 1);
    assert_eq!(runner.call_order()[0], "build");
}

#[tokio::test]
async fn test_limited_parallel_caps_concurrency() {
    let pipeline = pipeline(FAN_OUT);
    let runner = MockRunner::new();
    let engine =
        TestEngine::with_strategy(runner.clone(), SchedulingStrategy::LimitedParallel(2));

    engine.run(&pipeline).await;

    assert_eq!(runner.max_active(), 2);
}

#[tokio::test]
async fn test_parallel_runs_siblings_together() {
    let pipeline = pipeline(FAN_OUT);
    let runner = MockRunner::new();
    let engine = TestEngine::new(runner.clone());

    engine.run(&pipeline).await;

    assert_eq!(runner.max_active(), 3);
}
