//! CLI output formatting

use crate::{
    core::{AggregateOutcome, JobStatus},
    execution::{ExecutionEvent, RunReport},
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar over job instances
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Horizontal rule spanning the terminal width
pub fn separator() -> String {
    let width = term_size::dimensions_stdout()
        .map(|(w, _)| w)
        .unwrap_or(80);
    "─".repeat(width)
}

pub fn status_icon(status: JobStatus) -> Emoji<'static, 'static> {
    match status {
        JobStatus::Success => CHECK,
        JobStatus::Failure => CROSS,
        JobStatus::Skipped => SKIP,
        JobStatus::Cancelled => WARN,
    }
}

/// Format a job status for display
pub fn format_job_status(status: JobStatus) -> String {
    match status {
        JobStatus::Success => style("SUCCESS").green().to_string(),
        JobStatus::Failure => style("FAILURE").red().to_string(),
        JobStatus::Skipped => style("SKIPPED").dim().to_string(),
        JobStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a run outcome for display
pub fn format_outcome(outcome: AggregateOutcome) -> String {
    match outcome {
        AggregateOutcome::Success => style("SUCCESS").green().bold().to_string(),
        AggregateOutcome::Failure => style("FAILURE").red().bold().to_string(),
        AggregateOutcome::Skipped => style("SKIPPED").dim().bold().to_string(),
        AggregateOutcome::Cancelled => style("CANCELLED").yellow().bold().to_string(),
    }
}

/// Format an execution event for display; `None` for events not shown
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline,
            instances,
        } => Some(format!(
            "{} Starting {} ({}, {} instances)",
            ROCKET,
            style(pipeline).bold(),
            style(short_id(&run_id.to_string())).dim(),
            instances
        )),
        ExecutionEvent::InstanceStarted { instance_id, .. } => {
            Some(format!("{} {}", SPINNER, style(instance_id).cyan()))
        }
        ExecutionEvent::InstanceFinished {
            instance_id,
            status,
            attempts,
            cache_hit,
            ..
        } => {
            let mut line = format!("{} {} {}", status_icon(*status), instance_id, format_job_status(*status));
            if *cache_hit {
                line.push_str(&format!(" {}", style("(cached)").dim()));
            } else if *attempts > 1 {
                line.push_str(&format!(" {}", style(format!("({} attempts)", attempts)).dim()));
            }
            Some(line)
        }
        ExecutionEvent::JobCompleted { .. } => None,
        ExecutionEvent::RunCancelled { .. } => Some(format!(
            "{} {}",
            WARN,
            style("Cancelling run, waiting for running jobs").yellow()
        )),
        ExecutionEvent::RunFinished { outcome, .. } => {
            Some(format!("{} Run finished: {}", INFO, format_outcome(*outcome)))
        }
    }
}

/// Per-job and per-instance table of a finished run
pub fn format_report(report: &RunReport) -> String {
    let mut lines = vec![format!(
        "{} {} {} in {}",
        style(&report.pipeline).bold(),
        format_outcome(report.outcome),
        style(short_id(&report.run_id.to_string())).dim(),
        format_duration(report.duration_ms().max(0) as u64)
    )];

    for (job, status) in &report.jobs {
        lines.push(format!("  {} {} {}", status_icon(*status), style(job).bold(), format_job_status(*status)));
        let instances: Vec<_> = report.instances.iter().filter(|i| &i.template == job).collect();

        // Unexpanded job: the job line already says it all
        if let [single] = instances.as_slice() {
            if single.id == *job {
                if let Some(reason) = &single.result.reason {
                    lines.push(format!("      {}", style(reason).dim()));
                }
                continue;
            }
        }

        for instance in instances {
            let mut line = format!(
                "    {} {} {}",
                status_icon(instance.result.status),
                instance.id,
                format_job_status(instance.result.status)
            );
            if let Some(reason) = &instance.result.reason {
                line.push_str(&format!(" {}", style(reason).dim()));
            }
            lines.push(line);
        }
    }

    lines.push(format!(
        "  {} succeeded, {} failed, {} skipped, {} cancelled",
        style(report.counts.success).green(),
        style(report.counts.failure).red(),
        style(report.counts.skipped).dim(),
        style(report.counts.cancelled).yellow()
    ));
    lines.join("\n")
}

/// One line per stored run
pub fn format_run_summary(summary: &RunSummary) -> String {
    let icon = match summary.outcome {
        AggregateOutcome::Success => CHECK,
        AggregateOutcome::Failure => CROSS,
        AggregateOutcome::Skipped => SKIP,
        AggregateOutcome::Cancelled => WARN,
    };

    format!(
        "{} {} - {} - {} - {} ({}/{} succeeded)",
        icon,
        style(short_id(&summary.run_id.to_string())).dim(),
        style(&summary.pipeline).bold(),
        format_outcome(summary.outcome),
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        summary.counts.success,
        summary.counts.total()
    )
}

pub fn format_duration(ms: u64) -> String {
    let secs = ms / 1000;
    if secs == 0 {
        format!("{}ms", ms)
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
