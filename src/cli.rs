//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Discover, download and health-check academic paper feeds.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/harvester/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover and download papers
    Download(DownloadArgs),
    /// Check the health of every configured instance
    Health(HealthArgs),
    /// Show resume state counts for an output directory
    Status(StatusArgs),
    /// Delete the resume state of an output directory
    Reset(ResetArgs),
}

/// `harvester download`
#[derive(ClapArgs, Debug, Clone)]
pub struct DownloadArgs {
    /// Source to query (repeatable): api-search, journal-a, journal-b
    #[arg(short, long = "source", value_name = "SOURCE")]
    pub sources: Vec<String>,

    /// Category selector (repeatable), e.g. q-fin.CP, cs.*, '*'
    #[arg(long = "category", value_name = "CATEGORY")]
    pub categories: Vec<String>,

    /// last-month, all, or YYYY-MM-DD..YYYY-MM-DD
    #[arg(short, long, default_value = "last-month")]
    pub date_range: String,

    /// Cap on the total number of papers
    #[arg(short = 'n', long)]
    pub max_papers: Option<usize>,

    /// Discover only; write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Ignore the resume state; papers whose file already exists are still skipped
    #[arg(long)]
    pub no_resume: bool,

    /// Output directory (overrides the config file)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Maximum concurrent downloads (1-32)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub concurrency: Option<u8>,

    /// Print run statistics as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

/// `harvester health`
#[derive(ClapArgs, Debug, Clone)]
pub struct HealthArgs {
    /// Print the report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Do not hand failing reports to the alert notifier
    #[arg(long)]
    pub no_alert: bool,
}

/// `harvester status`
#[derive(ClapArgs, Debug, Clone)]
pub struct StatusArgs {
    /// Output directory (overrides the config file)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Print counts as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

/// `harvester reset`
#[derive(ClapArgs, Debug, Clone)]
pub struct ResetArgs {
    /// Output directory (overrides the config file)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,
}
