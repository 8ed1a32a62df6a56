//! Test utilities: a scripted job runner and engine helpers

#![allow(dead_code)]

use async_trait::async_trait;
use orchestrator::cache::CacheBackend;
use orchestrator::core::Pipeline;
use orchestrator::execution::{EngineConfig, ExecutionEngine, ExecutionEvent, RunReport};
use orchestrator::notify::{NotificationEvent, Notifier, NotifyError};
use orchestrator::runner::{ExecutorError, JobRunner, RunOutput, RunRequest};
use orchestrator::{RunContext, SchedulingStrategy};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Runner that interprets a tiny command language instead of spawning
/// processes:
///
/// - `exit N` returns exit code N
/// - `sleep MS` sleeps, then returns 0
/// - anything else returns 0
///
/// Scripted exit codes per instance id take precedence, one per call.
#[derive(Default)]
pub struct MockRunner {
    scripts: Mutex<HashMap<String, VecDeque<i32>>>,
    calls: Mutex<Vec<RunRequest>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    killed: AtomicUsize,
}

impl MockRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Exit codes for successive calls made by `instance_id`
    pub fn script(self: &Arc<Self>, instance_id: &str, exit_codes: &[i32]) -> Arc<Self> {
        self.scripts
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), exit_codes.iter().copied().collect());
        self.clone()
    }

    pub fn calls(&self) -> Vec<RunRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls made by `instance_id`
    pub fn calls_for(&self, instance_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.instance_id == instance_id)
            .count()
    }

    /// Instance ids in call order, one per call
    pub fn call_order(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.instance_id.clone())
            .collect()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Calls dropped before they returned
    pub fn killed(&self) -> usize {
        self.killed.load(Ordering::SeqCst)
    }

    /// Wait until `n` calls are in flight
    pub async fn wait_active(&self, n: usize) {
        for _ in 0..500 {
            if self.active() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("never reached {} active calls", n);
    }
}

/// Tracks one in-flight call; counts it as killed if dropped early
struct InFlight<'a> {
    runner: &'a MockRunner,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.runner.active.fetch_sub(1, Ordering::SeqCst);
        if !self.finished {
            self.runner.killed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl JobRunner for MockRunner {
    async fn run(&self, request: &RunRequest) -> Result<RunOutput, ExecutorError> {
        self.calls.lock().unwrap().push(request.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let mut guard = InFlight {
            runner: self,
            finished: false,
        };

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.instance_id)
            .and_then(|codes| codes.pop_front());

        let mut words = request.command.split_whitespace();
        let exit_code = match (words.next(), words.next().and_then(|w| w.parse::<u64>().ok())) {
            (Some("exit"), Some(code)) => code as i32,
            (Some("sleep"), Some(ms)) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                0
            }
            _ => 0,
        };

        guard.finished = true;
        Ok(RunOutput {
            exit_code: scripted.unwrap_or(exit_code),
            log_ref: Some(format!("mock://{}", request.instance_id)),
        })
    }
}

/// Notifier that keeps every event it receives
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Engine over `runner` with workspaces in a fresh temp dir
pub struct TestEngine {
    pub engine: ExecutionEngine,
    pub dir: TempDir,
    pub events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl TestEngine {
    pub fn new(runner: Arc<MockRunner>) -> Self {
        Self::with_strategy(runner, SchedulingStrategy::Parallel)
    }

    pub fn with_strategy(runner: Arc<MockRunner>, strategy: SchedulingStrategy) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        Self::build(runner, strategy, dir, &root)
    }

    /// Engine resolving cache inputs relative to `project_root`
    pub fn with_project_root(runner: Arc<MockRunner>, project_root: &Path) -> Self {
        Self::build(
            runner,
            SchedulingStrategy::Parallel,
            tempfile::tempdir().unwrap(),
            project_root,
        )
    }

    fn build(
        runner: Arc<MockRunner>,
        strategy: SchedulingStrategy,
        dir: TempDir,
        project_root: &Path,
    ) -> Self {
        let config = EngineConfig {
            strategy,
            workspace_root: dir.path().join("workspaces"),
            log_dir: dir.path().join("logs"),
            cache_dir: None,
            project_root: project_root.to_path_buf(),
        };
        let mut engine = ExecutionEngine::new(runner, config);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

        Self {
            engine,
            dir,
            events,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.engine = self.engine.with_cache(cache);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.engine = self.engine.with_notifier(notifier);
        self
    }

    pub async fn run(&self, pipeline: &Arc<Pipeline>) -> RunReport {
        self.run_with(pipeline, RunContext::new()).await
    }

    pub async fn run_with(&self, pipeline: &Arc<Pipeline>, seed: RunContext) -> RunReport {
        self.engine.execute(pipeline.clone(), seed).await.unwrap()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }
}

pub fn pipeline(yaml: &str) -> Arc<Pipeline> {
    Arc::new(Pipeline::from_yaml(yaml).unwrap())
}
