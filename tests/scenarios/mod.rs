//! End-to-end scenarios driven through the execution engine

mod cache;
mod cancellation;
mod dependency_gating;
mod matrix_runs;
mod notifications_and_events;
mod retries;
