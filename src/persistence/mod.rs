//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{AggregateOutcome, JobStatus, StatusCounts};
use crate::execution::RunReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub pipeline: String,
    pub outcome: AggregateOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: StatusCounts,

    /// Aggregate state per job
    pub jobs: BTreeMap<String, JobStatus>,
}

impl From<&RunReport> for RunSummary {
    fn from(report: &RunReport) -> Self {
        Self {
            run_id: report.run_id,
            pipeline: report.pipeline.clone(),
            outcome: report.outcome,
            started_at: report.started_at,
            finished_at: report.finished_at,
            counts: report.counts,
            jobs: report.jobs.clone(),
        }
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run, replacing any earlier summary with the same id
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Runs of one pipeline, newest first
    async fn list_runs(&self, pipeline: &str, limit: usize) -> Result<Vec<RunSummary>>;

    /// Runs of every pipeline, newest first
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>>;

    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    async fn newest_first(&self, pipeline: Option<&str>, limit: usize) -> Vec<RunSummary> {
        let runs = self.runs.read().await;
        let mut selected: Vec<RunSummary> = runs
            .values()
            .filter(|run| pipeline.map_or(true, |p| run.pipeline == p))
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        selected.truncate(limit);
        selected
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline: &str, limit: usize) -> Result<Vec<RunSummary>> {
        Ok(self.newest_first(Some(pipeline), limit).await)
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        Ok(self.newest_first(None, limit).await)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|r| r.pipeline.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
