//! Run context - the read-only view guards are evaluated against

use crate::core::{state::JobStatus, value::Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Commit that triggered the run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub message: String,
    pub sha: String,
    pub branch: String,
}

/// Execution context for a pipeline run
///
/// Holds trigger metadata, pipeline variables, the cancellation flag and the
/// aggregate state of every template whose instances are all terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: Uuid,

    /// Trigger event, e.g. `push` or `pull_request`
    pub event: String,

    /// Who triggered the run
    pub actor: String,

    pub commit: CommitInfo,

    /// Pipeline variables, after overrides
    pub variables: BTreeMap<String, Value>,

    pub cancel_requested: bool,

    /// Published template aggregates (template id -> status)
    results: BTreeMap<String, JobStatus>,
}

impl RunContext {
    /// Create a new context for a `push` event
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            event: "push".to_string(),
            actor: String::new(),
            commit: CommitInfo::default(),
            variables: BTreeMap::new(),
            cancel_requested: false,
            results: BTreeMap::new(),
        }
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_commit(mut self, commit: CommitInfo) -> Self {
        self.commit = commit;
        self
    }

    /// Set a variable, replacing any existing value
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Fill in variables not already set
    pub fn merge_defaults(&mut self, defaults: &BTreeMap<String, Value>) {
        for (key, value) in defaults {
            self.variables
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Publish a template's aggregate. A template is published at most once.
    pub fn publish(&mut self, template: &str, status: JobStatus) -> bool {
        if self.results.contains_key(template) {
            return false;
        }
        self.results.insert(template.to_string(), status);
        true
    }

    pub fn result(&self, template: &str) -> Option<JobStatus> {
        self.results.get(template).copied()
    }

    pub fn results(&self) -> &BTreeMap<String, JobStatus> {
        &self.results
    }

    /// Environment describing the run to job commands
    pub fn env(&self, pipeline: &str) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("CI".to_string(), "true".to_string());
        env.insert("CI_PIPELINE".to_string(), pipeline.to_string());
        env.insert("CI_RUN_ID".to_string(), self.run_id.to_string());
        env.insert("CI_EVENT".to_string(), self.event.clone());
        env.insert("CI_ACTOR".to_string(), self.actor.clone());
        env.insert("CI_COMMIT_SHA".to_string(), self.commit.sha.clone());
        env.insert("CI_COMMIT_MESSAGE".to_string(), self.commit.message.clone());
        env.insert("CI_BRANCH".to_string(), self.commit.branch.clone());
        env
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
