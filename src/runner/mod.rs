//! Job runner boundary - executes one step command of a job instance

pub mod shell;
pub mod workspace;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use shell::ShellRunner;
pub use workspace::WorkspaceManager;

/// Error types for runner operations
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to provision workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open log {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timeout after {0} seconds")]
    Timeout(u64),

    #[error("internal error: {0}")]
    Internal(String),
}

/// One command invocation
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Display id of the instance, e.g. `test (ubuntu, 3.9)`
    pub instance_id: String,

    /// Step name within the job
    pub step: String,

    /// Shell command
    pub command: String,

    /// Matrix values of the instance
    pub matrix: BTreeMap<String, String>,

    /// Complete environment; nothing else is inherited
    pub env: BTreeMap<String, String>,

    /// Per-instance working directory
    pub workdir: PathBuf,

    /// Time left in the attempt
    pub timeout: Duration,
}

/// What a finished command reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_code: i32,

    /// Where the output was captured
    pub log_ref: Option<String>,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait for command execution - allows for different implementations
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// Dropping the returned future must stop the command.
    async fn run(&self, request: &RunRequest) -> Result<RunOutput, ExecutorError>;
}
