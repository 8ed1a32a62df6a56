//! Pipeline configuration from YAML

use crate::core::{
    error::{LoadError, SpecError},
    matrix::MatrixConfig,
    value::Value,
    Pipeline,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Variables available to guards as `vars.<name>` and to jobs as env
    #[serde(default)]
    pub variables: BTreeMap<String, serde_yaml::Value>,

    /// Defaults applied to every job
    #[serde(default)]
    pub defaults: JobDefaults,

    /// Job templates, in declaration order
    pub jobs: Vec<JobConfig>,
}

/// Pipeline-level job defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefaults {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retries: u32,

    #[serde(default)]
    pub continue_on_error: bool,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retries: 0,
            continue_on_error: false,
        }
    }
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique job identifier
    pub id: String,

    /// Human-readable job name
    #[serde(default)]
    pub name: Option<String>,

    /// Job ids that must finish first
    #[serde(default)]
    pub needs: Vec<String>,

    /// Guard expression
    #[serde(default, rename = "if")]
    pub condition: Option<String>,

    #[serde(default)]
    pub matrix: Option<MatrixConfig>,

    /// Failures of this job do not fail the run (overrides default)
    #[serde(default)]
    pub continue_on_error: Option<bool>,

    /// Extra attempts after a failure (overrides default)
    #[serde(default)]
    pub retries: Option<u32>,

    /// Timeout per attempt (overrides default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub cache: Option<CacheConfig>,

    pub steps: Vec<StepConfig>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    #[serde(default)]
    pub name: Option<String>,

    /// Shell command
    pub run: String,

    /// Guard expression, evaluated against the earlier steps
    #[serde(default, rename = "if")]
    pub condition: Option<String>,
}

/// Cache declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Salt distinguishing unrelated caches
    pub key: String,

    /// Files or directories whose content makes up the key
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SpecError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, LoadError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml).map_err(SpecError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    ///
    /// Builds every template and the dependency graph, so anything that
    /// passes here converts into a [`Pipeline`].
    pub fn validate(&self) -> Result<(), LoadError> {
        self.to_pipeline().map(|_| ())
    }

    /// Check that every job id is unique
    pub(crate) fn check_unique_ids(&self) -> Result<(), SpecError> {
        if self.jobs.is_empty() {
            return Err(SpecError::NoJobs);
        }

        let mut seen_ids = HashSet::new();
        for job in &self.jobs {
            if !seen_ids.insert(&job.id) {
                return Err(SpecError::DuplicateJob(job.id.clone()));
            }
        }
        Ok(())
    }

    /// Variables as scalar values
    pub fn variables(&self) -> Result<BTreeMap<String, Value>, SpecError> {
        self.variables
            .iter()
            .map(|(name, value)| {
                Value::from_yaml(value)
                    .map(|v| (name.clone(), v))
                    .ok_or_else(|| SpecError::InvalidVariable { name: name.clone() })
            })
            .collect()
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline, LoadError> {
        Pipeline::from_config(self)
    }
}
