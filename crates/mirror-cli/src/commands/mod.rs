pub mod check;
pub mod run;

use std::process::ExitCode;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Run every configured mirror job once
    Run(run::RunArgs),
    /// Validate a configuration file and list its jobs
    Check(check::CheckArgs),
}

impl Commands {
    pub async fn run(self) -> anyhow::Result<ExitCode> {
        match self {
            Commands::Run(args) => run::run(args).await,
            Commands::Check(args) => check::run(args),
        }
    }
}
