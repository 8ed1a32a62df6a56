//! Load-time and evaluation error types

use std::path::PathBuf;
use thiserror::Error;

/// Malformed pipeline description. Always fatal, reported before any job starts.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read pipeline file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pipeline document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("pipeline defines no jobs")]
    NoJobs,

    #[error("duplicate job id: {0}")]
    DuplicateJob(String),

    #[error("job '{job}' needs unknown job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },

    #[error("job '{job}' has an invalid matrix: {message}")]
    InvalidMatrix { job: String, message: String },

    #[error("job '{job}' exclude entry references unknown axis '{axis}'")]
    UnknownAxis { job: String, axis: String },

    #[error("job '{job}' has an invalid condition `{expression}`: {source}")]
    InvalidCondition {
        job: String,
        expression: String,
        #[source]
        source: ConditionError,
    },

    #[error("job '{job}': {message}")]
    InvalidJob { job: String, message: String },

    #[error("variable '{name}' must be a scalar value")]
    InvalidVariable { name: String },
}

/// The `needs` relation is not a DAG.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("dependency cycle detected: {}", .path.join(" -> "))]
pub struct CycleError {
    /// Jobs on the cycle, first and last entries are the same job
    pub path: Vec<String>,
}

/// Errors that abort a run before execution begins
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// Guard expression errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConditionError {
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("undefined reference `{0}`")]
    UndefinedReference(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("function `{name}` expects {expected} argument(s), got {actual}")]
    Arity {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid regular expression `{pattern}`: {message}")]
    InvalidRegex { pattern: String, message: String },
}
