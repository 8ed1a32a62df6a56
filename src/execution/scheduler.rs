//! Execution scheduler - decides which instances may start and how they are gated

use crate::core::{
    Condition, EvalScope, JobStatus, JobTemplate, MatrixCell, Pipeline, ResultTable, RunContext,
    StatusAggregator,
};
use tracing::debug;

/// Strategy for scheduling instance execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One instance at a time
    Sequential,

    /// Every eligible instance at once
    #[default]
    Parallel,

    /// At most N instances at once
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Strategy for a `--max-parallel` style setting; zero means unbounded
    pub fn from_max_parallel(max: usize) -> Self {
        match max {
            0 => SchedulingStrategy::Parallel,
            1 => SchedulingStrategy::Sequential,
            n => SchedulingStrategy::LimitedParallel(n),
        }
    }

    /// Number of execution slots
    pub fn slots(&self) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => tokio::sync::Semaphore::MAX_PERMITS,
            SchedulingStrategy::LimitedParallel(n) => (*n).max(1),
        }
    }
}

/// Decision for one instance whose needs are all terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Run,
    Skip(String),
    Fail(String),
}

/// Gate one instance against the run context
///
/// The instance runs only if every needed job succeeded, unless its guard
/// calls a status function (`success()`, `failure()`, `cancelled()`,
/// `always()`) and so decides on its own. Any other guard is checked after
/// the success requirement.
pub fn gate(template: &JobTemplate, cell: &MatrixCell, context: &RunContext) -> Gate {
    let overrides_needs = template
        .condition
        .as_ref()
        .is_some_and(Condition::checks_status);

    if !overrides_needs {
        let blocked: Vec<String> = template
            .needs
            .iter()
            .filter_map(|need| match context.result(need) {
                Some(JobStatus::Success) => None,
                Some(status) => Some(format!("{} ({})", need, status)),
                None => Some(format!("{} (pending)", need)),
            })
            .collect();

        if !blocked.is_empty() {
            return Gate::Skip(format!("needs not successful: {}", blocked.join(", ")));
        }
    }

    let Some(condition) = &template.condition else {
        return Gate::Run;
    };

    let scope = EvalScope::for_job(context, template, cell);
    match condition.evaluate(&scope) {
        Ok(true) => Gate::Run,
        Ok(false) => Gate::Skip(format!(
            "condition `{}` evaluated to false",
            condition.source()
        )),
        Err(e) => Gate::Fail(format!(
            "condition `{}` could not be evaluated: {}",
            condition.source(),
            e
        )),
    }
}

/// Tracks which templates have been released and published
pub struct ExecutionScheduler {
    /// Not yet released, dependencies first
    pending: Vec<String>,

    /// Released but not yet published
    released: Vec<String>,
}

impl ExecutionScheduler {
    pub fn new(pipeline: &Pipeline) -> Self {
        Self {
            pending: pipeline
                .execution_order()
                .into_iter()
                .map(str::to_string)
                .collect(),
            released: Vec::new(),
        }
    }

    /// Templates whose needs are all published, in execution order
    pub fn release_ready(&mut self, pipeline: &Pipeline, context: &RunContext) -> Vec<String> {
        let (ready, waiting): (Vec<String>, Vec<String>) =
            std::mem::take(&mut self.pending).into_iter().partition(|id| {
                pipeline
                    .graph()
                    .predecessors(id)
                    .iter()
                    .all(|need| context.result(need).is_some())
            });

        self.pending = waiting;
        self.released.extend(ready.iter().cloned());
        if !ready.is_empty() {
            debug!("Released jobs: {:?}", ready);
        }
        ready
    }

    /// Publish every released template whose instances are all terminal
    pub fn publish_completed(
        &mut self,
        pipeline: &Pipeline,
        table: &ResultTable,
        context: &mut RunContext,
    ) -> Vec<(String, JobStatus)> {
        let mut published = Vec::new();

        self.released.retain(|id| {
            let indices = pipeline.instances_of(id);
            if !indices.iter().all(|&i| table.is_terminal(i)) {
                return true;
            }

            let status = StatusAggregator::template_status(
                indices.iter().filter_map(|&i| table.get(i)).map(|r| r.status),
            );
            context.publish(id, status);
            published.push((id.clone(), status));
            false
        });

        published
    }

    /// Templates not yet released
    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty() && self.released.is_empty()
    }
}
