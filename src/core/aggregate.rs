//! Status aggregation
//!
//! Folds instance results into per-template states and the run outcome.

use crate::core::state::{AggregateOutcome, JobResult, JobStatus};

/// Pure folding rules over terminal results
pub struct StatusAggregator;

impl StatusAggregator {
    /// Aggregate state of one template from its instances' statuses
    ///
    /// Precedence is failure, cancelled, skipped (every instance skipped, or
    /// no instances at all), then success.
    pub fn template_status<I>(statuses: I) -> JobStatus
    where
        I: IntoIterator<Item = JobStatus>,
    {
        let mut any_failure = false;
        let mut any_cancelled = false;
        let mut all_skipped = true;

        for status in statuses {
            match status {
                JobStatus::Failure => any_failure = true,
                JobStatus::Cancelled => any_cancelled = true,
                JobStatus::Skipped => {}
                JobStatus::Success => {}
            }
            if status != JobStatus::Skipped {
                all_skipped = false;
            }
        }

        if any_failure {
            JobStatus::Failure
        } else if any_cancelled {
            JobStatus::Cancelled
        } else if all_skipped {
            JobStatus::Skipped
        } else {
            JobStatus::Success
        }
    }

    /// Run outcome over every terminal result
    ///
    /// `cancelled` must be true only when cancellation was requested before
    /// every instance completed.
    pub fn outcome<'a, I>(results: I, cancelled: bool) -> AggregateOutcome
    where
        I: IntoIterator<Item = &'a JobResult>,
    {
        if cancelled {
            return AggregateOutcome::Cancelled;
        }

        let results: Vec<&JobResult> = results.into_iter().collect();
        let required: Vec<&JobResult> = results.iter().copied().filter(|r| r.required).collect();

        if required.iter().any(|r| r.status == JobStatus::Failure) {
            return AggregateOutcome::Failure;
        }

        // With nothing required, the whole set decides whether the run was skipped
        let considered = if required.is_empty() { &results } else { &required };
        if considered.iter().all(|r| r.status == JobStatus::Skipped) {
            return AggregateOutcome::Skipped;
        }

        AggregateOutcome::Success
    }
}
