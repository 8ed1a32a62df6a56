//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    cache::{CacheBackend, CacheKeyResolver, FsCache},
    core::{
        AggregateOutcome, InstanceState, JobResult, JobStatus, Pipeline, RunContext,
        StatusAggregator, StatusCounts,
    },
    execution::{
        gate,
        run::{cancellation, InstanceReport, RunError, RunHandle, RunReport, RunShared},
        ExecutionScheduler, Gate, JobExecutor, SchedulingStrategy,
    },
    notify::{NotificationEvent, Notifier},
    runner::{JobRunner, WorkspaceManager},
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline: String,
        instances: usize,
    },
    InstanceStarted {
        index: usize,
        instance_id: String,
    },
    InstanceFinished {
        index: usize,
        instance_id: String,
        status: JobStatus,
        attempts: u32,
        cache_hit: bool,
    },
    /// Every instance of a job is terminal; carries the job aggregate
    JobCompleted {
        template: String,
        status: JobStatus,
    },
    RunCancelled {
        run_id: Uuid,
    },
    RunFinished {
        run_id: Uuid,
        outcome: AggregateOutcome,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Runtime settings of the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub strategy: SchedulingStrategy,

    /// Per-instance workspaces are created below this directory
    pub workspace_root: PathBuf,

    /// Where runners write instance logs
    pub log_dir: PathBuf,

    /// Directory of the filesystem cache; no cache when unset
    pub cache_dir: Option<PathBuf>,

    /// Cache inputs are resolved relative to this directory
    pub project_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("orchestrator");
        Self {
            strategy: SchedulingStrategy::default(),
            workspace_root: base.join("workspaces"),
            log_dir: base.join("logs"),
            cache_dir: None,
            project_root: PathBuf::from("."),
        }
    }
}

/// Main pipeline execution engine
pub struct ExecutionEngine {
    runner: Arc<dyn JobRunner>,
    config: EngineConfig,
    cache: Option<Arc<dyn CacheBackend>>,
    notifier: Option<Arc<dyn Notifier>>,
    event_handlers: Vec<EventHandler>,
}

impl ExecutionEngine {
    pub fn new(runner: Arc<dyn JobRunner>, config: EngineConfig) -> Self {
        let cache = config
            .cache_dir
            .as_ref()
            .map(|dir| Arc::new(FsCache::new(dir)) as Arc<dyn CacheBackend>);

        Self {
            runner,
            config,
            cache,
            notifier: None,
            event_handlers: Vec::new(),
        }
    }

    /// Use `cache` instead of the configured filesystem cache
    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Start a run in the background
    ///
    /// `seed` carries the trigger metadata and variable overrides; pipeline
    /// variables fill in whatever it leaves unset.
    pub fn start(&self, pipeline: Arc<Pipeline>, seed: RunContext) -> RunHandle {
        let mut executor = JobExecutor::new(
            self.runner.clone(),
            WorkspaceManager::new(&self.config.workspace_root),
            CacheKeyResolver::new(&self.config.project_root),
        );
        if let Some(cache) = &self.cache {
            executor = executor.with_cache(cache.clone());
        }

        let run_id = seed.run_id;
        let shared = Arc::new(RunShared::new(pipeline.instances().len()));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let driver = RunDriver {
            pipeline,
            executor: Arc::new(executor),
            notifier: self.notifier.clone(),
            handlers: self.event_handlers.clone().into(),
            shared: shared.clone(),
            slots: Arc::new(Semaphore::new(self.config.strategy.slots())),
        };
        let join = tokio::spawn(driver.run(seed, cancel_rx));

        RunHandle::new(run_id, shared, Arc::new(cancel_tx), join)
    }

    /// Execute the entire pipeline and wait for the report
    pub async fn execute(
        &self,
        pipeline: Arc<Pipeline>,
        seed: RunContext,
    ) -> Result<RunReport, RunError> {
        self.start(pipeline, seed).wait().await
    }
}

/// Single-task run loop; workers report back over a channel
struct RunDriver {
    pipeline: Arc<Pipeline>,
    executor: Arc<JobExecutor>,
    notifier: Option<Arc<dyn Notifier>>,
    handlers: Arc<[EventHandler]>,
    shared: Arc<RunShared>,
    slots: Arc<Semaphore>,
}

impl RunDriver {
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in self.handlers.iter() {
            handler(event.clone());
        }
    }

    async fn run(self, mut context: RunContext, mut cancel: watch::Receiver<bool>) -> RunReport {
        let started_at = Utc::now();
        let pipeline = self.pipeline.clone();
        let run_id = context.run_id;

        context.merge_defaults(&pipeline.variables);

        info!(
            "Starting run {} of '{}' ({} instances)",
            run_id,
            pipeline.name,
            pipeline.instances().len()
        );
        self.emit_event(ExecutionEvent::RunStarted {
            run_id,
            pipeline: pipeline.name.clone(),
            instances: pipeline.instances().len(),
        });

        let mut scheduler = ExecutionScheduler::new(&pipeline);
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, JobResult)>();
        let mut queue: VecDeque<usize> = VecDeque::new();
        let mut running = 0usize;
        let mut cancelled = false;

        loop {
            if !cancelled && *cancel.borrow() {
                cancelled = true;
                self.cancel_pending(&mut context, &mut queue);
            }

            if !cancelled {
                self.advance(&mut scheduler, &mut context, &mut queue);
            }

            while let Some(&index) = queue.front() {
                let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                    break;
                };
                queue.pop_front();
                running += 1;

                self.shared.table.mark_started(index);
                let instance_id = pipeline
                    .instance(index)
                    .map(|i| i.id.clone())
                    .unwrap_or_default();
                debug!("Dispatching {}", instance_id);
                self.emit_event(ExecutionEvent::InstanceStarted { index, instance_id });

                let executor = self.executor.clone();
                let worker_pipeline = pipeline.clone();
                let worker_context = context.clone();
                let worker_cancel = cancel.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let result = executor
                        .execute(&worker_pipeline, index, &worker_context, worker_cancel)
                        .await;
                    drop(permit);
                    if tx.send((index, result)).is_err() {
                        debug!("Run loop gone, dropping result of instance {}", index);
                    }
                });
            }

            if self.shared.table.all_terminal() {
                break;
            }

            if running == 0 && queue.is_empty() {
                error!("No runnable instances left, skipping the rest");
                self.settle_remaining(|| JobResult::skipped("dependencies never completed", true));
                break;
            }

            tokio::select! {
                received = rx.recv() => {
                    if let Some((index, mut result)) = received {
                        running = running.saturating_sub(1);
                        if result.started_at.is_none() {
                            result.started_at = self
                                .shared
                                .table
                                .mark_started(index);
                        }
                        self.settle(index, result);
                    }
                }
                _ = cancellation(&mut cancel), if !cancelled => {
                    cancelled = true;
                    self.cancel_pending(&mut context, &mut queue);
                }
            }
        }

        // Templates released after the last publish pass
        for (template, status) in
            scheduler.publish_completed(&pipeline, &self.shared.table, &mut context)
        {
            self.emit_event(ExecutionEvent::JobCompleted { template, status });
        }

        let outcome =
            StatusAggregator::outcome(self.shared.table.terminal_results(), cancelled);
        let report = self.report(run_id, outcome, started_at);

        let _ = self.shared.outcome.set(outcome);
        info!(
            "Run {} finished: {} ({} succeeded, {} failed, {} skipped, {} cancelled)",
            run_id,
            outcome,
            report.counts.success,
            report.counts.failure,
            report.counts.skipped,
            report.counts.cancelled
        );
        self.emit_event(ExecutionEvent::RunFinished { run_id, outcome });

        if let Some(notifier) = &self.notifier {
            let event = notification_event(&report, &context);
            if let Err(e) = notifier.notify(&event).await {
                warn!("Notification for run {} failed: {}", run_id, e);
            }
        }

        report
    }

    /// Release, gate and publish until nothing changes
    fn advance(
        &self,
        scheduler: &mut ExecutionScheduler,
        context: &mut RunContext,
        queue: &mut VecDeque<usize>,
    ) {
        let pipeline = self.pipeline.clone();

        loop {
            let released = scheduler.release_ready(&pipeline, context);
            let mut progressed = !released.is_empty();

            for template_id in released {
                let Some(template) = pipeline.template(&template_id) else {
                    continue;
                };
                let required = template.is_required();

                for &index in pipeline.instances_of(&template_id) {
                    let Some(instance) = pipeline.instance(index) else {
                        continue;
                    };
                    match gate(template, &instance.cell, context) {
                        Gate::Run => queue.push_back(index),
                        Gate::Skip(reason) => {
                            debug!("Skipping {}: {}", instance.id, reason);
                            self.settle(index, JobResult::skipped(reason, required));
                        }
                        Gate::Fail(reason) => {
                            warn!("Failing {}: {}", instance.id, reason);
                            self.settle(index, JobResult::failure(reason, required));
                        }
                    }
                }
            }

            for (template, status) in
                scheduler.publish_completed(&pipeline, &self.shared.table, context)
            {
                progressed = true;
                info!("Job {} completed: {}", template, status);
                self.emit_event(ExecutionEvent::JobCompleted { template, status });
            }

            if !progressed {
                break;
            }
        }
    }

    /// Record a terminal result and report it
    fn settle(&self, index: usize, result: JobResult) {
        let status = result.status;
        let attempts = result.attempts;
        let cache_hit = result.cache_hit;

        if self.shared.table.record(index, result) {
            let instance_id = self
                .pipeline
                .instance(index)
                .map(|i| i.id.clone())
                .unwrap_or_default();
            debug!("{} -> {}", instance_id, status);
            self.emit_event(ExecutionEvent::InstanceFinished {
                index,
                instance_id,
                status,
                attempts,
                cache_hit,
            });
        }
    }

    /// Record `make()` for every instance that has not started
    fn settle_remaining(&self, make: impl Fn() -> JobResult) {
        for index in 0..self.shared.table.len() {
            if matches!(self.shared.table.state(index), InstanceState::Pending) {
                let required = self
                    .pipeline
                    .instance(index)
                    .and_then(|i| self.pipeline.template(&i.template))
                    .map(|t| t.is_required())
                    .unwrap_or(true);
                let mut result = make();
                result.required = required;
                self.settle(index, result);
            }
        }
    }

    /// Cancel everything not yet running; running workers see the signal
    fn cancel_pending(&self, context: &mut RunContext, queue: &mut VecDeque<usize>) {
        warn!("Run {} cancelled", context.run_id);
        context.cancel_requested = true;
        self.emit_event(ExecutionEvent::RunCancelled {
            run_id: context.run_id,
        });

        queue.clear();
        self.settle_remaining(|| JobResult::cancelled("run cancelled before start", true));
    }

    fn report(
        &self,
        run_id: Uuid,
        outcome: AggregateOutcome,
        started_at: DateTime<Utc>,
    ) -> RunReport {
        let pipeline = &self.pipeline;
        let table = &self.shared.table;

        let instances: Vec<InstanceReport> = pipeline
            .instances()
            .iter()
            .map(|instance| InstanceReport {
                index: instance.index,
                id: instance.id.clone(),
                template: instance.template.clone(),
                result: table.get(instance.index).cloned().unwrap_or_else(|| {
                    JobResult::cancelled("no result recorded", true)
                }),
            })
            .collect();

        let jobs: BTreeMap<String, JobStatus> = pipeline
            .templates()
            .iter()
            .map(|template| {
                let status = StatusAggregator::template_status(
                    instances
                        .iter()
                        .filter(|i| i.template == template.id)
                        .map(|i| i.result.status),
                );
                (template.id.clone(), status)
            })
            .collect();

        let counts: StatusCounts = instances.iter().map(|i| &i.result).collect();

        RunReport {
            run_id,
            pipeline: pipeline.name.clone(),
            outcome,
            jobs,
            instances,
            counts,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// The single notification for a finished run
pub fn notification_event(report: &RunReport, context: &RunContext) -> NotificationEvent {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    NotificationEvent {
        run_id: report.run_id,
        pipeline: report.pipeline.clone(),
        outcome: report.outcome,
        jobs: report.jobs.clone(),
        counts: report.counts,
        branch: non_empty(&context.commit.branch),
        commit_sha: non_empty(&context.commit.sha),
        finished_at: report.finished_at,
    }
}
