//! CLI command definitions

use crate::core::{CommitInfo, RunContext};
use crate::execution::{EngineConfig, SchedulingStrategy};
use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Variable overrides (key=value)
    #[arg(long = "var", value_parser = parse_key_value)]
    pub variables: Vec<(String, String)>,

    /// Trigger event
    #[arg(long, env = "ORCHESTRATOR_EVENT", default_value = "push")]
    pub event: String,

    /// Who triggered the run
    #[arg(long, env = "ORCHESTRATOR_ACTOR", default_value = "")]
    pub actor: String,

    #[arg(long, env = "ORCHESTRATOR_COMMIT_MESSAGE", default_value = "")]
    pub commit_message: String,

    #[arg(long, env = "ORCHESTRATOR_COMMIT_SHA", default_value = "")]
    pub commit_sha: String,

    #[arg(long, env = "ORCHESTRATOR_BRANCH", default_value = "")]
    pub branch: String,

    /// Maximum concurrently running instances (0 = unbounded)
    #[arg(long, env = "ORCHESTRATOR_MAX_PARALLEL", default_value_t = 0)]
    pub max_parallel: usize,

    /// Root directory for per-instance workspaces
    #[arg(long, env = "ORCHESTRATOR_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Directory for instance logs
    #[arg(long, env = "ORCHESTRATOR_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Enable the job cache in this directory
    #[arg(long, env = "ORCHESTRATOR_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Cache inputs are resolved relative to this directory
    #[arg(long, env = "ORCHESTRATOR_PROJECT_ROOT", default_value = ".")]
    pub project_root: PathBuf,

    /// Append the run notification to this JSON-lines file
    #[arg(long, env = "ORCHESTRATOR_NOTIFY_FILE")]
    pub notify_file: Option<PathBuf>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunCommand {
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            strategy: SchedulingStrategy::from_max_parallel(self.max_parallel),
            workspace_root: self.workspace.clone().unwrap_or(defaults.workspace_root),
            log_dir: self.log_dir.clone().unwrap_or(defaults.log_dir),
            cache_dir: self.cache_dir.clone(),
            project_root: self.project_root.clone(),
        }
    }

    /// Run context seeded from the trigger flags and `--var` overrides
    pub fn seed_context(&self) -> RunContext {
        let mut context = RunContext::new()
            .with_event(&self.event)
            .with_actor(&self.actor)
            .with_commit(CommitInfo {
                message: self.commit_message.clone(),
                sha: self.commit_sha.clone(),
                branch: self.branch.clone(),
            });
        for (key, value) in &self.variables {
            context = context.with_variable(key.clone(), value.as_str());
        }
        context
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show execution waves and expanded instances
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
