//! Run notifications
//!
//! Exactly one [`NotificationEvent`] is produced per run, after the outcome
//! is settled. Transports implement [`Notifier`].

use crate::core::state::{AggregateOutcome, JobStatus, StatusCounts};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

/// The single classified event of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub run_id: Uuid,
    pub pipeline: String,
    pub outcome: AggregateOutcome,

    /// Aggregate state per template
    pub jobs: BTreeMap<String, JobStatus>,

    pub counts: StatusCounts,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,

    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Transport-neutral rendering of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub color: String,
    pub event: NotificationEvent,
}

impl NotificationPayload {
    pub fn from_event(event: &NotificationEvent) -> Self {
        let jobs_with = |status: JobStatus| -> Vec<&str> {
            event
                .jobs
                .iter()
                .filter(|(_, s)| **s == status)
                .map(|(id, _)| id.as_str())
                .collect()
        };

        let (severity, color, title, message) = match event.outcome {
            AggregateOutcome::Success => (
                Severity::Info,
                "#36a64f",
                format!("{} passed", event.pipeline),
                format!("{} instance(s) succeeded", event.counts.success),
            ),
            AggregateOutcome::Failure => (
                Severity::Error,
                "#dc3545",
                format!("{} failed", event.pipeline),
                format!("Failed jobs: {}", jobs_with(JobStatus::Failure).join(", ")),
            ),
            AggregateOutcome::Skipped => (
                Severity::Info,
                "#6c757d",
                format!("{} skipped", event.pipeline),
                "No required job ran".to_string(),
            ),
            AggregateOutcome::Cancelled => (
                Severity::Warning,
                "#6c757d",
                format!("{} cancelled", event.pipeline),
                format!(
                    "{} instance(s) cancelled before completion",
                    event.counts.cancelled
                ),
            ),
        };

        Self {
            title,
            message,
            severity,
            color: color.to_string(),
            event: event.clone(),
        }
    }
}

/// Trait for notification transports.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError>;
}

/// Writes the notification to the log
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let payload = NotificationPayload::from_event(event);
        match payload.severity {
            Severity::Info => info!(run_id = %event.run_id, outcome = %event.outcome, "{}: {}", payload.title, payload.message),
            Severity::Warning => warn!(run_id = %event.run_id, outcome = %event.outcome, "{}: {}", payload.title, payload.message),
            Severity::Error => error!(run_id = %event.run_id, outcome = %event.outcome, "{}: {}", payload.title, payload.message),
        }
        Ok(())
    }
}

/// Appends one JSON payload per line to a file
#[derive(Debug, Clone)]
pub struct JsonLinesNotifier {
    path: PathBuf,
}

impl JsonLinesNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Notifier for JsonLinesNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let payload = NotificationPayload::from_event(event);
        let line = serde_json::to_string(&payload)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<(), NotifyError> {
            let io_err = |source| NotifyError::Io {
                path: path.clone(),
                source,
            };
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(io_err)?;
            writeln!(file, "{}", line).map_err(io_err)?;
            Ok(())
        })
        .await
        .map_err(|e| NotifyError::DeliveryFailed(e.to_string()))?
    }
}

/// Fans an event out to several notifiers; every one is attempted
pub struct MultiNotifier {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let mut first_error = None;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(event).await {
                warn!("Notifier failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
