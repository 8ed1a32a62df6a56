use anyhow::{Context, Result};
use orchestrator::cli::commands::{HistoryCommand, PlanCommand, RunCommand, ValidateCommand};
use orchestrator::cli::output::*;
use orchestrator::cli::{Cli, Command};
use orchestrator::core::Pipeline;
use orchestrator::execution::{ExecutionEngine, ExecutionEvent};
use orchestrator::notify::{JsonLinesNotifier, MultiNotifier, Notifier, TracingNotifier};
use orchestrator::persistence::{InMemoryPersistence, PersistenceBackend, RunSummary};
use orchestrator::runner::ShellRunner;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; stdout is reserved for command output
    let fallback = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Plan(cmd) => plan_pipeline(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn load(file: &std::path::Path) -> Result<Pipeline> {
    Pipeline::load(file).with_context(|| format!("Failed to load pipeline {}", file.display()))
}

async fn run_pipeline(cmd: &RunCommand) -> Result<i32> {
    let pipeline = Arc::new(load(&cmd.file)?);
    let config = cmd.engine_config();

    if !cmd.json {
        println!(
            "{} Loaded pipeline: {} ({} jobs, {} instances)",
            INFO,
            style(&pipeline.name).bold(),
            pipeline.templates().len(),
            pipeline.instances().len()
        );
        for (key, value) in &cmd.variables {
            println!(
                "{} Variable override: {} = {}",
                INFO,
                style(key).cyan(),
                style(value).dim()
            );
        }
    }

    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_history().await?
    };

    let mut notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(TracingNotifier)];
    if let Some(path) = &cmd.notify_file {
        notifiers.push(Box::new(JsonLinesNotifier::new(path)));
    }

    let runner = Arc::new(ShellRunner::new(&config.log_dir));
    let mut engine = ExecutionEngine::new(runner, config)
        .with_notifier(Arc::new(MultiNotifier::new(notifiers)));

    if !cmd.json {
        let progress = create_progress_bar(pipeline.instances().len());
        engine.add_event_handler(move |event| {
            if let Some(line) = format_execution_event(&event) {
                progress.println(line);
            }
            match event {
                ExecutionEvent::InstanceFinished { .. } => progress.inc(1),
                ExecutionEvent::RunFinished { .. } => progress.finish_and_clear(),
                _ => {}
            }
        });
    }

    let handle = engine.start(pipeline.clone(), cmd.seed_context());

    let canceller = handle.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            canceller.cancel();
        }
    });

    let report = handle.wait().await.context("Run did not complete")?;

    if !cmd.no_history {
        if let Err(e) = store.save_run(&RunSummary::from(&report)).await {
            error!("Failed to save run history: {:#}", e);
        }
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", separator());
        println!("{}", format_report(&report));
    }

    Ok(report.outcome.exit_code())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<i32> {
    match Pipeline::load(&cmd.file) {
        Ok(pipeline) => {
            if cmd.json {
                let data = serde_json::json!({
                    "valid": true,
                    "name": pipeline.name,
                    "jobs": pipeline.templates().len(),
                    "instances": pipeline.instances().len(),
                    "order": pipeline.execution_order(),
                });
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("{} Pipeline configuration is valid!", CHECK);
                println!("  Name: {}", style(&pipeline.name).bold());
                println!("  Jobs: {}", style(pipeline.templates().len()).cyan());
                println!("  Instances: {}", style(pipeline.instances().len()).cyan());
                println!("  Variables: {}", style(pipeline.variables.len()).cyan());
            }
            Ok(0)
        }
        Err(e) => {
            if cmd.json {
                let data = serde_json::json!({ "valid": false, "error": e.to_string() });
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("{} Validation failed:", CROSS);
                println!("  {}", style(e).red());
            }
            Ok(1)
        }
    }
}

fn plan_pipeline(cmd: &PlanCommand) -> Result<i32> {
    let pipeline = load(&cmd.file)?;
    let waves: Vec<Vec<Vec<&str>>> = pipeline
        .graph()
        .waves()
        .into_iter()
        .map(|wave| {
            wave.into_iter()
                .map(|template| {
                    pipeline
                        .instances_of(template)
                        .iter()
                        .filter_map(|&i| pipeline.instance(i))
                        .map(|instance| instance.id.as_str())
                        .collect()
                })
                .collect()
        })
        .collect();

    if cmd.json {
        let data: Vec<_> = pipeline
            .graph()
            .waves()
            .into_iter()
            .zip(&waves)
            .map(|(templates, instances)| {
                serde_json::json!({
                    "jobs": templates,
                    "instances": instances.concat(),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "pipeline": pipeline.name,
                "waves": data,
            }))?
        );
        return Ok(0);
    }

    println!("{} Plan for {}", INFO, style(&pipeline.name).bold());
    for (n, (templates, instances)) in pipeline.graph().waves().into_iter().zip(&waves).enumerate() {
        println!("{}", style(format!("Wave {}", n + 1)).bold());
        for (template, ids) in templates.iter().zip(instances) {
            let needs = pipeline.graph().predecessors(template);
            if needs.is_empty() {
                println!("  {}", style(template).cyan());
            } else {
                println!(
                    "  {} {}",
                    style(template).cyan(),
                    style(format!("(needs {})", needs.join(", "))).dim()
                );
            }
            if ids.len() != 1 || ids[0] != *template {
                for id in ids {
                    println!("    - {}", id);
                }
            }
        }
    }
    Ok(0)
}

async fn show_history(cmd: &HistoryCommand) -> Result<i32> {
    let store = open_history().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => print_run_details(&summary),
            None => {
                println!("{} Run not found", WARN);
                return Ok(1);
            }
        }
        return Ok(0);
    }

    let runs = match &cmd.pipeline {
        Some(pipeline) => store.list_runs(pipeline, cmd.limit).await?,
        None => store.recent_runs(cmd.limit).await?,
    };

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(0);
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }
    Ok(0)
}

fn print_run_details(summary: &RunSummary) {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline).bold());
    println!("  Outcome: {}", format_outcome(summary.outcome));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    println!("  Finished: {}", style(summary.finished_at.to_rfc3339()).dim());
    let ms = (summary.finished_at - summary.started_at).num_milliseconds().max(0) as u64;
    println!("  Duration: {}", style(format_duration(ms)).dim());
    println!("  Jobs:");
    for (job, status) in &summary.jobs {
        println!("    {} {} {}", status_icon(*status), job, format_job_status(*status));
    }
}

#[cfg(feature = "sqlite")]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    let store = orchestrator::persistence::SqliteRunStore::with_default_path()
        .await
        .context("Failed to open run history")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    anyhow::bail!("Run history requires the `sqlite` feature; pass --no-history")
}
