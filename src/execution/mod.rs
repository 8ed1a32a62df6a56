//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod run;
pub mod scheduler;

pub use engine::{notification_event, EngineConfig, EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{build_env, JobExecutor};
pub use run::{Canceller, InstanceReport, RunError, RunHandle, RunReport, RunStatus};
pub use scheduler::{gate, ExecutionScheduler, Gate, SchedulingStrategy};
