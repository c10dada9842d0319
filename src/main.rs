//! CLI entry point for the harvester tool.

use std::process::ExitCode;

use clap::Parser;
use tracing::debug;

mod app;
mod cli;
mod commands;

use app::{exit_handler, terminal};
use cli::{Cli, Command};

/// Process exit outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Everything succeeded.
    Success,
    /// The run finished with failures, was interrupted, or the report is failing.
    Failure,
    /// Invalid configuration or request.
    ConfigError,
}

impl From<ProcessExit> for ExitCode {
    fn from(value: ProcessExit) -> Self {
        match value {
            ProcessExit::Success => Self::SUCCESS,
            ProcessExit::Failure => Self::from(1_u8),
            ProcessExit::ConfigError => Self::from(2_u8),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    terminal::init_tracing(terminal::resolve_default_log_level(cli.quiet, cli.verbose));
    debug!(?cli, "CLI arguments parsed");

    let outcome = match run(cli).await {
        Ok(outcome) => outcome,
        Err(err) => {
            debug!(error = ?err, "harvester failed");
            eprintln!("error: {err:#}");
            exit_handler::error_exit(&err)
        }
    };
    outcome.into()
}

async fn run(cli: Cli) -> anyhow::Result<ProcessExit> {
    let config_path = cli.config.as_deref();
    match &cli.command {
        Command::Download(args) => {
            commands::run_download_command(args, config_path, cli.quiet).await
        }
        Command::Health(args) => commands::run_health_command(args, config_path).await,
        Command::Status(args) => commands::run_status_command(args, config_path),
        Command::Reset(args) => commands::run_reset_command(args, config_path),
    }
}
