//! Shell runner - runs step commands through `sh -c`

use crate::runner::{workspace::slug, ExecutorError, JobRunner, RunOutput, RunRequest};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// PATH handed to commands when the orchestrator's own is unavailable
const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Runs commands with a cleared environment, appending output to one log
/// file per instance
#[derive(Debug, Clone)]
pub struct ShellRunner {
    /// Shell executable
    shell: String,

    /// Directory receiving `<instance>.log` files
    log_dir: PathBuf,

    /// PATH forwarded to commands
    path: String,
}

impl ShellRunner {
    /// Create a new shell runner
    ///
    /// # Arguments
    /// * `log_dir` - Directory for per-instance log files, created on demand
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            shell: "sh".to_string(),
            log_dir: log_dir.into(),
            path: std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string()),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Log file of an instance
    pub fn log_path(&self, instance_id: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", slug(instance_id)))
    }

    /// Open the instance log for appending and write the step header
    fn open_log(&self, request: &RunRequest) -> Result<(std::fs::File, PathBuf), ExecutorError> {
        let path = self.log_path(&request.instance_id);
        let log_err = |source| ExecutorError::Log {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(&self.log_dir).map_err(log_err)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(log_err)?;
        writeln!(file, "## {} $ {}", request.step, request.command).map_err(log_err)?;

        Ok((file, path))
    }
}

#[async_trait]
impl JobRunner for ShellRunner {
    /// Run the command and wait for its exit status
    ///
    /// # Errors
    /// Returns `ExecutorError` if:
    /// - The log file cannot be opened
    /// - The shell cannot be spawned
    /// - The command outlives `request.timeout`
    async fn run(&self, request: &RunRequest) -> Result<RunOutput, ExecutorError> {
        debug!(
            "Running step '{}' of {} in {}",
            request.step,
            request.instance_id,
            request.workdir.display()
        );

        let (log, log_path) = self.open_log(request)?;
        let stderr = log.try_clone().map_err(|source| ExecutorError::Log {
            path: log_path.clone(),
            source,
        })?;

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&request.command)
            .current_dir(&request.workdir)
            .env_clear()
            .env("PATH", &self.path)
            .env("HOME", &request.workdir)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                command: self.shell.clone(),
                source,
            })?;

        let status = timeout(request.timeout, child.wait())
            .await
            .map_err(|_| ExecutorError::Timeout(request.timeout.as_secs()))?
            .map_err(|e| ExecutorError::Internal(format!("failed to wait for command: {}", e)))?;

        // Killed by a signal: no exit code
        let exit_code = status.code().unwrap_or(-1);
        if exit_code != 0 {
            warn!(
                "Step '{}' of {} exited with code {}",
                request.step, request.instance_id, exit_code
            );
        }

        Ok(RunOutput {
            exit_code,
            log_ref: Some(log_path.display().to_string()),
        })
    }
}
