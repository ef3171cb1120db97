use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Args;

use mirror_sync::load_config;

use crate::output;

#[derive(Args)]
pub struct CheckArgs {
    /// Path to the TOML configuration
    config: PathBuf,
}

pub fn run(args: CheckArgs) -> anyhow::Result<ExitCode> {
    let config = load_config(&args.config)
        .with_context(|| format!("invalid configuration {}", args.config.display()))?;

    println!("{}", output::header("settings"));
    println!(
        "{}",
        output::kv(
            "concurrency",
            &config.settings.max_concurrent_jobs.to_string()
        )
    );
    if let Some(workdir) = &config.settings.workdir {
        println!("{}", output::kv("workdir", &workdir.display().to_string()));
    }

    for job in &config.jobs {
        println!();
        println!("{}", output::header(&job.name));
        println!("{}", output::kv("source", &job.source.redacted()));
        println!("{}", output::kv("destination", &job.destination.redacted()));
        println!("{}", output::kv("refs", &job.patterns.join(", ")));
        let options = &job.options;
        println!(
            "{}",
            output::kv("allow-force", &options.allow_force.to_string())
        );
        println!("{}", output::kv("strict", &options.strict.to_string()));
        println!(
            "{}",
            output::kv("max-chunk-bytes", &options.max_chunk_bytes.to_string())
        );
    }
    println!();
    println!("{} job(s) ok", config.jobs.len());
    Ok(ExitCode::SUCCESS)
}
