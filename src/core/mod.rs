//! Core domain models for the orchestrator
//!
//! This module defines the pipeline description, the matrix expansion and
//! dependency graph built from it, guard conditions, and the result types
//! the execution layer records.

pub mod aggregate;
pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod job;
pub mod matrix;
pub mod pipeline;
pub mod state;
pub mod value;

pub use aggregate::StatusAggregator;
pub use condition::{Condition, EvalScope};
pub use context::{CommitInfo, RunContext};
pub use error::{ConditionError, CycleError, LoadError, SpecError};
pub use graph::DependencyGraph;
pub use job::{CacheSpec, JobInstance, JobTemplate, StepTemplate};
pub use matrix::{Matrix, MatrixCell, MatrixExpander};
pub use pipeline::Pipeline;
pub use state::*;
pub use value::Value;
