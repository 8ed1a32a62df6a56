//! Job executor - runs one job instance to completion

use crate::{
    cache::{ArtifactRef, CacheBackend, CacheKey, CacheKeyResolver},
    core::{
        condition::StepScope, EvalScope, JobInstance, JobResult, JobStatus, JobTemplate,
        Pipeline, RunContext,
    },
    execution::run::cancellation,
    runner::{ExecutorError, JobRunner, RunRequest, WorkspaceManager},
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

/// Result of one attempt
#[derive(Debug, Clone, PartialEq)]
enum AttemptOutcome {
    Passed {
        exit_code: Option<i32>,
        log_ref: Option<String>,
    },
    Failed {
        exit_code: Option<i32>,
        log_ref: Option<String>,
        reason: String,
    },
    TimedOut {
        log_ref: Option<String>,
    },
    Cancelled,
}

/// Runs job instances through a [`JobRunner`]
///
/// Handles the cache short-circuit, workspace provisioning, step guards,
/// retries, timeouts and cancellation.
pub struct JobExecutor {
    runner: Arc<dyn JobRunner>,
    workspaces: WorkspaceManager,
    cache: Option<Arc<dyn CacheBackend>>,
    resolver: CacheKeyResolver,
}

impl JobExecutor {
    pub fn new(
        runner: Arc<dyn JobRunner>,
        workspaces: WorkspaceManager,
        resolver: CacheKeyResolver,
    ) -> Self {
        Self {
            runner,
            workspaces,
            cache: None,
            resolver,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Execute one instance and return its terminal result
    ///
    /// `context` is the run context as of dispatch; `cancel` flips to true
    /// when the run is cancelled.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        index: usize,
        context: &RunContext,
        mut cancel: watch::Receiver<bool>,
    ) -> JobResult {
        let started_at = Utc::now();
        let Some(instance) = pipeline.instance(index) else {
            error!("No instance at index {}", index);
            return JobResult::failure(format!("unknown instance {}", index), true);
        };
        let Some(template) = pipeline.template(&instance.template) else {
            error!("No template '{}' for instance {}", instance.template, instance.id);
            return JobResult::failure(format!("unknown job {}", instance.template), true);
        };
        let required = template.is_required();

        if *cancel.borrow() {
            return JobResult::cancelled("run cancelled before start", required)
                .with_started_at(started_at);
        }

        info!("Executing {}", instance.id);

        let cache_key = self.resolve_cache_key(template, instance);
        if let Some(key) = &cache_key {
            if let Some(artifact) = self.lookup(key).await {
                info!("Cache hit for {} ({})", instance.id, key);
                let mut result = JobResult::success(required).with_started_at(started_at);
                result.cache_key = Some(key.to_string());
                result.cache_hit = true;
                result.log_ref = artifact.log_ref;
                return result;
            }
            debug!("Cache miss for {} ({})", instance.id, key);
        }

        let env = build_env(pipeline, template, instance, context);
        let max_attempts = template.retries + 1;
        let mut attempt = 0;

        let mut result = loop {
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancellation(&mut cancel) => AttemptOutcome::Cancelled,
                outcome = timeout(
                    template.timeout,
                    self.run_attempt(template, instance, context, &env, attempt),
                ) => outcome.unwrap_or_else(|_| AttemptOutcome::TimedOut { log_ref: None }),
            };

            let retry_reason = match outcome {
                AttemptOutcome::Passed { exit_code, log_ref } => {
                    let mut result = JobResult::success(required);
                    result.exit_code = exit_code;
                    result.log_ref = log_ref;
                    break result;
                }
                AttemptOutcome::Cancelled => {
                    info!("{} cancelled during attempt {}", instance.id, attempt);
                    break JobResult::cancelled("run cancelled while running", required);
                }
                AttemptOutcome::TimedOut { log_ref } => {
                    let reason = format!(
                        "timed out after {} seconds",
                        template.timeout.as_secs()
                    );
                    if attempt >= max_attempts {
                        let mut result = JobResult::failure(reason, required);
                        result.timed_out = true;
                        result.log_ref = log_ref;
                        break result;
                    }
                    reason
                }
                AttemptOutcome::Failed {
                    exit_code,
                    log_ref,
                    reason,
                } => {
                    if attempt >= max_attempts {
                        let mut result = JobResult::failure(reason, required);
                        result.exit_code = exit_code;
                        result.log_ref = log_ref;
                        break result;
                    }
                    reason
                }
            };

            warn!(
                "{} attempt {}/{} failed ({}), retrying",
                instance.id, attempt, max_attempts, retry_reason
            );
        };

        result.attempts = attempt;
        result.started_at = Some(started_at);
        result.finished_at = Utc::now();

        if result.status == JobStatus::Success {
            if let Some(key) = cache_key {
                self.store(&key, instance, &result).await;
                result.cache_key = Some(key.to_string());
            }
            info!("{} succeeded after {} attempt(s)", instance.id, attempt);
        } else if result.status == JobStatus::Failure {
            error!("{} failed: {}", instance.id, result.reason.as_deref().unwrap_or("unknown"));
        }

        result
    }

    /// One pass over the job's steps in a fresh workspace
    async fn run_attempt(
        &self,
        template: &JobTemplate,
        instance: &JobInstance,
        context: &RunContext,
        env: &BTreeMap<String, String>,
        attempt: u32,
    ) -> AttemptOutcome {
        let deadline = Instant::now() + template.timeout;
        let workdir = match self
            .workspaces
            .provision(context.run_id, instance.index, &instance.id, attempt)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                error!("{}: {}", instance.id, e);
                return AttemptOutcome::Failed {
                    exit_code: None,
                    log_ref: None,
                    reason: e.to_string(),
                };
            }
        };

        let matrix: BTreeMap<String, String> = instance
            .cell
            .entries()
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();

        let mut failure: Option<String> = None;
        let mut exit_code = None;
        let mut log_ref = None;

        for step in &template.steps {
            let should_run = match &step.condition {
                None => failure.is_none(),
                Some(condition) if !condition.checks_status() && failure.is_some() => false,
                Some(condition) => {
                    let scope = EvalScope::for_job(context, template, &instance.cell).with_step(
                        StepScope {
                            failed: failure.is_some(),
                        },
                    );
                    match condition.evaluate(&scope) {
                        Ok(run) => run,
                        Err(e) => {
                            warn!("{}: step '{}' guard failed: {}", instance.id, step.name, e);
                            failure.get_or_insert_with(|| {
                                format!("step '{}' condition error: {}", step.name, e)
                            });
                            false
                        }
                    }
                }
            };

            if !should_run {
                debug!("{}: skipping step '{}'", instance.id, step.name);
                continue;
            }

            let request = RunRequest {
                instance_id: instance.id.clone(),
                step: step.name.clone(),
                command: step.run.clone(),
                matrix: matrix.clone(),
                env: env.clone(),
                workdir: workdir.clone(),
                timeout: deadline.saturating_duration_since(Instant::now()),
            };

            match self.runner.run(&request).await {
                Ok(output) => {
                    exit_code = Some(output.exit_code);
                    if output.log_ref.is_some() {
                        log_ref = output.log_ref;
                    }
                    if output.exit_code != 0 {
                        failure.get_or_insert_with(|| {
                            format!("step '{}' exited with code {}", step.name, output.exit_code)
                        });
                    }
                }
                Err(ExecutorError::Timeout(_)) => return AttemptOutcome::TimedOut { log_ref },
                Err(e) => {
                    error!("{}: step '{}' could not run: {}", instance.id, step.name, e);
                    failure.get_or_insert_with(|| format!("step '{}': {}", step.name, e));
                }
            }
        }

        match failure {
            None => AttemptOutcome::Passed { exit_code, log_ref },
            Some(reason) => AttemptOutcome::Failed {
                exit_code,
                log_ref,
                reason,
            },
        }
    }

    fn resolve_cache_key(&self, template: &JobTemplate, instance: &JobInstance) -> Option<CacheKey> {
        self.cache.as_ref()?;
        let spec = template.cache.as_ref()?;
        match self.resolver.resolve(template, spec, &instance.cell) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("{}: cache key unavailable, running uncached: {}", instance.id, e);
                None
            }
        }
    }

    async fn lookup(&self, key: &CacheKey) -> Option<ArtifactRef> {
        let cache = self.cache.as_ref()?;
        match cache.lookup(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Cache lookup for {} failed, treating as miss: {}", key, e);
                None
            }
        }
    }

    async fn store(&self, key: &CacheKey, instance: &JobInstance, result: &JobResult) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let artifact = ArtifactRef {
            key: key.clone(),
            instance_id: instance.id.clone(),
            log_ref: result.log_ref.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = cache.store(key, &artifact).await {
            warn!("Cache store for {} failed: {}", key, e);
        }
    }
}

/// Environment variable name for a pipeline variable or matrix axis
pub fn env_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// The complete environment of an instance
///
/// Later sources win: run metadata, pipeline variables, job `env`, then
/// `MATRIX_<AXIS>` values.
pub fn build_env(
    pipeline: &Pipeline,
    template: &JobTemplate,
    instance: &JobInstance,
    context: &RunContext,
) -> BTreeMap<String, String> {
    let mut env = context.env(&pipeline.name);
    env.insert("CI_JOB".to_string(), template.id.clone());
    env.insert("CI_JOB_INSTANCE".to_string(), instance.id.clone());

    for (name, value) in &context.variables {
        env.insert(env_name(name), value.to_string());
    }
    env.extend(template.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    for (axis, value) in instance.cell.entries() {
        env.insert(format!("MATRIX_{}", env_name(axis)), value.to_string());
    }

    env
}
