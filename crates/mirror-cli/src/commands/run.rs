use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mirror_sync::{load_config, DefaultClientFactory, JobReport, Orchestrator, RunReport};

use crate::output;

#[derive(Args)]
pub struct RunArgs {
    /// Path to the TOML configuration
    config: PathBuf,
    /// List and plan only; change nothing
    #[arg(long)]
    dry_run: bool,
    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,
}

pub async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let config = load_config(&args.config)
        .with_context(|| format!("invalid configuration {}", args.config.display()))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after in-flight work");
            on_signal.cancel();
        }
    });

    let factory = Arc::new(DefaultClientFactory::new(&config.settings));
    let orchestrator =
        Orchestrator::new(factory, config.settings.max_concurrent_jobs).dry_run(args.dry_run);
    info!(jobs = config.jobs.len(), dry_run = args.dry_run, "starting run");
    let report = orchestrator.run(config.jobs, cancel).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(ExitCode::from(report.exit_code()))
}

fn print_report(report: &RunReport) {
    for job in &report.jobs {
        print_job(job, report.dry_run);
        println!();
    }
    println!("{}", output::header("summary"));
    println!(
        "{}",
        output::kv(
            "jobs",
            &format!("{} done, {} failed", report.jobs_done(), report.jobs_failed())
        )
    );
    if !report.dry_run {
        println!(
            "{}",
            output::kv(
                "refs",
                &format!(
                    "{} applied, {} skipped, {} failed",
                    report.refs_applied(),
                    report.refs_skipped(),
                    report.refs_failed()
                )
            )
        );
    }
}

fn print_job(job: &JobReport, dry_run: bool) {
    println!("{}", output::header(&job.job));
    println!("{}", output::kv("source", &job.source));
    println!("{}", output::kv("destination", &job.destination));
    println!("{}", output::kv("state", job.state.name()));
    if let Some(failure) = &job.failure {
        println!(
            "{}",
            output::kv(
                "error",
                &format!("{} (during {})", failure.error, failure.phase.name())
            )
        );
    }

    if let Some(plan) = &job.plan {
        if plan.is_empty() && plan.skipped.is_empty() {
            println!("  in sync");
        }
        if dry_run {
            for update in &plan.updates {
                println!("  {}", output::update_line(update));
            }
            for skipped in &plan.skipped {
                println!("    {:<12} {}  ({})", "skip", skipped.name, skipped.reason);
            }
        }
    }

    if let Some(result) = &job.result {
        for (name, outcome) in &result.outcomes {
            println!("{}", output::outcome_line(name, outcome));
        }
        let stats = &result.transfer;
        if stats.objects_sent > 0 || stats.objects_skipped > 0 {
            println!(
                "{}",
                output::kv(
                    "transfer",
                    &format!(
                        "{} objects, {} bytes in {} chunk(s), {} already present",
                        stats.objects_sent,
                        stats.bytes_sent,
                        stats.chunks_sent,
                        stats.objects_skipped
                    )
                )
            );
        }
    }
}
