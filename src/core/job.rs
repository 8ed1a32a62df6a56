//! Job domain model

use crate::core::{
    condition::Condition,
    config::{JobConfig, JobDefaults, StepConfig},
    error::SpecError,
    matrix::{Matrix, MatrixCell},
};
use std::collections::BTreeMap;
use std::time::Duration;

/// Cache declaration of a job
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSpec {
    /// Salt mixed into the key so unrelated caches never collide
    pub key: String,

    /// Files or directories, relative to the project root
    pub inputs: Vec<String>,
}

/// A single step of a job
#[derive(Debug, Clone)]
pub struct StepTemplate {
    pub name: String,

    /// Shell command
    pub run: String,

    /// Optional guard, evaluated at step scope
    pub condition: Option<Condition>,
}

impl StepTemplate {
    fn from_config(job: &str, index: usize, config: &StepConfig) -> Result<Self, SpecError> {
        if config.run.trim().is_empty() {
            return Err(SpecError::InvalidJob {
                job: job.to_string(),
                message: format!("step {} has an empty command", index + 1),
            });
        }

        let condition = config
            .condition
            .as_deref()
            .map(|expr| Condition::parse_for(job, expr))
            .transpose()?;

        Ok(StepTemplate {
            name: config
                .name
                .clone()
                .unwrap_or_else(|| format!("step {}", index + 1)),
            run: config.run.clone(),
            condition,
        })
    }
}

/// A job template: a job as declared, before matrix expansion
#[derive(Debug, Clone)]
pub struct JobTemplate {
    /// Unique job identifier
    pub id: String,

    /// Human-readable name
    pub name: Option<String>,

    /// Jobs that must be terminal first, in declaration order
    pub needs: Vec<String>,

    /// Guard; replaces the default predecessor policy only if it checks status
    pub condition: Option<Condition>,

    pub matrix: Matrix,

    pub retries: u32,

    pub continue_on_error: bool,

    /// Bound on each attempt
    pub timeout: Duration,

    pub env: BTreeMap<String, String>,

    pub cache: Option<CacheSpec>,

    pub steps: Vec<StepTemplate>,
}

impl JobTemplate {
    /// Create a job template from its configuration
    pub fn from_config(config: &JobConfig, defaults: &JobDefaults) -> Result<Self, SpecError> {
        if config.id.trim().is_empty() {
            return Err(SpecError::InvalidJob {
                job: config.id.clone(),
                message: "job id must not be empty".to_string(),
            });
        }

        if config.steps.is_empty() {
            return Err(SpecError::InvalidJob {
                job: config.id.clone(),
                message: "job has no steps".to_string(),
            });
        }

        let timeout_secs = config.timeout_secs.unwrap_or(defaults.timeout_secs);
        if timeout_secs == 0 {
            return Err(SpecError::InvalidJob {
                job: config.id.clone(),
                message: "timeout_secs must be greater than zero".to_string(),
            });
        }

        let matrix = match &config.matrix {
            Some(matrix) => Matrix::from_config(&config.id, matrix)?,
            None => Matrix::default(),
        };

        let condition = config
            .condition
            .as_deref()
            .map(|expr| Condition::parse_for(&config.id, expr))
            .transpose()?;

        let steps = config
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| StepTemplate::from_config(&config.id, i, step))
            .collect::<Result<Vec<_>, _>>()?;

        let cache = config.cache.as_ref().map(|cache| CacheSpec {
            key: cache.key.clone(),
            inputs: cache.inputs.clone(),
        });

        Ok(JobTemplate {
            id: config.id.clone(),
            name: config.name.clone(),
            needs: config.needs.clone(),
            condition,
            matrix,
            retries: config.retries.unwrap_or(defaults.retries),
            continue_on_error: config.continue_on_error.unwrap_or(defaults.continue_on_error),
            timeout: Duration::from_secs(timeout_secs),
            env: config.env.clone(),
            cache,
            steps,
        })
    }

    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Whether instances of this job count towards the run outcome
    pub fn is_required(&self) -> bool {
        !self.continue_on_error
    }
}

/// One concrete unit of execution: a template paired with a matrix cell
#[derive(Debug, Clone)]
pub struct JobInstance {
    /// Position in the pipeline's instance list
    pub index: usize,

    pub template: String,

    pub cell: MatrixCell,

    /// Stable display identifier, e.g. `test (ubuntu, 3.9)`
    pub id: String,
}

impl JobInstance {
    pub fn new(index: usize, template: &str, cell: MatrixCell) -> Self {
        let id = if cell.is_empty() {
            template.to_string()
        } else {
            format!("{} ({})", template, cell.label())
        };

        Self {
            index,
            template: template.to_string(),
            cell,
            id,
        }
    }
}

impl PartialEq for JobInstance {
    fn eq(&self, other: &Self) -> bool {
        self.template == other.template && self.cell == other.cell
    }
}
