//! orchestrator - a CI pipeline orchestrator with matrix expansion,
//! dependency gating and status aggregation

pub mod cache;
pub mod cli;
pub mod core;
pub mod execution;
pub mod notify;
pub mod persistence;
pub mod runner;

// Re-export commonly used types
pub use cache::{CacheBackend, CacheKey, CacheKeyResolver, FsCache, InMemoryCache};
pub use core::{AggregateOutcome, JobResult, JobStatus, LoadError, Pipeline, RunContext};
pub use execution::{
    EngineConfig, ExecutionEngine, ExecutionEvent, RunHandle, RunReport, RunStatus,
    SchedulingStrategy,
};
pub use notify::{JsonLinesNotifier, NotificationEvent, Notifier, TracingNotifier};
pub use runner::{JobRunner, RunOutput, RunRequest, ShellRunner};
