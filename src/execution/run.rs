//! Run control surface - handle, status polling and the final report

use crate::core::{AggregateOutcome, JobResult, JobStatus, ResultTable, StatusCounts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("run task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// State shared between a running engine task and its handle
#[derive(Debug)]
pub(crate) struct RunShared {
    pub(crate) table: ResultTable,
    pub(crate) outcome: OnceLock<AggregateOutcome>,
}

impl RunShared {
    pub(crate) fn new(instances: usize) -> Self {
        Self {
            table: ResultTable::new(instances),
            outcome: OnceLock::new(),
        }
    }
}

/// Snapshot returned by [`RunHandle::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending { finished: usize, total: usize },
    Finished(AggregateOutcome),
}

/// Requests cancellation of a run; cloneable and usable after the handle moves
#[derive(Debug, Clone)]
pub struct Canceller {
    tx: Arc<watch::Sender<bool>>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Handle to a started run
pub struct RunHandle {
    run_id: Uuid,
    shared: Arc<RunShared>,
    cancel_tx: Arc<watch::Sender<bool>>,
    join: JoinHandle<RunReport>,
}

impl RunHandle {
    pub(crate) fn new(
        run_id: Uuid,
        shared: Arc<RunShared>,
        cancel_tx: Arc<watch::Sender<bool>>,
        join: JoinHandle<RunReport>,
    ) -> Self {
        Self {
            run_id,
            shared,
            cancel_tx,
            join,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Cancel the run. Idempotent; a no-op once the outcome is settled.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn canceller(&self) -> Canceller {
        Canceller {
            tx: self.cancel_tx.clone(),
        }
    }

    pub fn poll(&self) -> RunStatus {
        match self.shared.outcome.get() {
            Some(outcome) => RunStatus::Finished(*outcome),
            None => RunStatus::Pending {
                finished: self.shared.table.finished_count(),
                total: self.shared.table.len(),
            },
        }
    }

    /// Wait for the run to finish
    pub async fn wait(self) -> Result<RunReport, RunError> {
        Ok(self.join.await?)
    }
}

/// Resolves once the run is cancelled; never, if the sender is gone
pub(crate) async fn cancellation(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Terminal result of one instance in a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceReport {
    pub index: usize,
    pub id: String,
    pub template: String,
    pub result: JobResult,
}

/// Full result of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub outcome: AggregateOutcome,

    /// Aggregate state per template, in id order
    pub jobs: BTreeMap<String, JobStatus>,

    /// One entry per instance, in expansion order
    pub instances: Vec<InstanceReport>,

    pub counts: StatusCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn instance(&self, id: &str) -> Option<&InstanceReport> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn status_of(&self, id: &str) -> Option<JobStatus> {
        self.instance(id).map(|i| i.result.status)
    }

    pub fn job(&self, template: &str) -> Option<JobStatus> {
        self.jobs.get(template).copied()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
