//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use tracing::warn;

/// Terminal status of a job instance, also used for template aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Failure,
    Skipped,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Success,
        JobStatus::Failure,
        JobStatus::Skipped,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Skipped => "skipped",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall outcome of a run, derived once after every instance is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOutcome {
    Success,
    Failure,
    Skipped,
    Cancelled,
}

impl AggregateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOutcome::Success => "success",
            AggregateOutcome::Failure => "failure",
            AggregateOutcome::Skipped => "skipped",
            AggregateOutcome::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(AggregateOutcome::Success),
            "failure" => Some(AggregateOutcome::Failure),
            "skipped" => Some(AggregateOutcome::Skipped),
            "cancelled" => Some(AggregateOutcome::Cancelled),
            _ => None,
        }
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            AggregateOutcome::Success | AggregateOutcome::Skipped => 0,
            AggregateOutcome::Failure => 1,
            AggregateOutcome::Cancelled => 130,
        }
    }
}

impl fmt::Display for AggregateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one job instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,

    /// Exit code of the last executed step, if any ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Where the runner wrote the instance's output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,

    #[serde(default)]
    pub cache_hit: bool,

    /// Attempts made, zero when the runner was never invoked
    #[serde(default)]
    pub attempts: u32,

    #[serde(default)]
    pub timed_out: bool,

    /// False for continue-on-error instances
    pub required: bool,

    /// Human-readable explanation for non-success results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    pub fn new(status: JobStatus, required: bool) -> Self {
        Self {
            status,
            exit_code: None,
            log_ref: None,
            cache_key: None,
            cache_hit: false,
            attempts: 0,
            timed_out: false,
            required,
            reason: None,
            started_at: None,
            finished_at: Utc::now(),
        }
    }

    pub fn success(required: bool) -> Self {
        Self::new(JobStatus::Success, required)
    }

    pub fn failure(reason: impl Into<String>, required: bool) -> Self {
        Self::new(JobStatus::Failure, required).with_reason(reason)
    }

    pub fn skipped(reason: impl Into<String>, required: bool) -> Self {
        Self::new(JobStatus::Skipped, required).with_reason(reason)
    }

    pub fn cancelled(reason: impl Into<String>, required: bool) -> Self {
        Self::new(JobStatus::Cancelled, required).with_reason(reason)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self
    }

    /// Wall-clock duration in milliseconds, when the instance actually started
    pub fn duration_ms(&self) -> Option<i64> {
        self.started_at
            .map(|start| (self.finished_at - start).num_milliseconds())
    }
}

/// Observable state of a single instance
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceState {
    Pending,
    Running { started_at: DateTime<Utc> },
    Finished(JobResult),
}

impl InstanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Finished(_))
    }
}

/// Count of instances per terminal status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub success: usize,
    pub failure: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: JobStatus) {
        match status {
            JobStatus::Success => self.success += 1,
            JobStatus::Failure => self.failure += 1,
            JobStatus::Skipped => self.skipped += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.failure + self.skipped + self.cancelled
    }
}

impl<'a> FromIterator<&'a JobResult> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = &'a JobResult>>(iter: I) -> Self {
        let mut counts = StatusCounts::default();
        for result in iter {
            counts.add(result.status);
        }
        counts
    }
}

/// Append-only result table, one write-once slot per instance
///
/// Slots are indexed by instance index. A result, once recorded, is never
/// replaced; later writes are rejected.
#[derive(Debug)]
pub struct ResultTable {
    results: Vec<OnceLock<JobResult>>,
    started: Vec<OnceLock<DateTime<Utc>>>,
}

impl ResultTable {
    pub fn new(len: usize) -> Self {
        Self {
            results: (0..len).map(|_| OnceLock::new()).collect(),
            started: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Record the instance as running. Returns the start time.
    pub fn mark_started(&self, index: usize) -> Option<DateTime<Utc>> {
        self.started.get(index).map(|slot| *slot.get_or_init(Utc::now))
    }

    /// Record a terminal result. Returns false if the slot was already terminal
    /// or does not exist; the stored result is left untouched.
    pub fn record(&self, index: usize, result: JobResult) -> bool {
        let Some(slot) = self.results.get(index) else {
            warn!(index, "Rejected result for unknown instance");
            return false;
        };

        match slot.set(result) {
            Ok(()) => true,
            Err(rejected) => {
                warn!(
                    index,
                    status = %rejected.status,
                    "Rejected second result for terminal instance"
                );
                false
            }
        }
    }

    pub fn get(&self, index: usize) -> Option<&JobResult> {
        self.results.get(index).and_then(|slot| slot.get())
    }

    pub fn state(&self, index: usize) -> InstanceState {
        if let Some(result) = self.get(index) {
            return InstanceState::Finished(result.clone());
        }
        match self.started.get(index).and_then(|slot| slot.get()) {
            Some(started_at) => InstanceState::Running {
                started_at: *started_at,
            },
            None => InstanceState::Pending,
        }
    }

    pub fn is_terminal(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    pub fn finished_count(&self) -> usize {
        self.results.iter().filter(|slot| slot.get().is_some()).count()
    }

    pub fn all_terminal(&self) -> bool {
        self.results.iter().all(|slot| slot.get().is_some())
    }

    /// Every terminal result, in instance order
    pub fn terminal_results(&self) -> Vec<&JobResult> {
        self.results.iter().filter_map(|slot| slot.get()).collect()
    }

    pub fn snapshot(&self) -> Vec<Option<JobResult>> {
        self.results.iter().map(|slot| slot.get().cloned()).collect()
    }
}
