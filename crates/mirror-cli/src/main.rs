use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod output;

use commands::Commands;

#[derive(Parser)]
#[command(name = "mirror", version, about = "Mirror branches and tags between repositories")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command.run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", error::format_error(&err));
            ExitCode::from(error::USAGE_EXIT_CODE)
        }
    }
}
