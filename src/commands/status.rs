//! `harvester status`: resume state counts for one output directory.

use std::path::Path;

use anyhow::{Context, Result};
use harvester_core::state::{self, StateSummary};

use crate::ProcessExit;
use crate::cli::StatusArgs;

pub(crate) fn run_status_command(
    args: &StatusArgs,
    config_path: Option<&Path>,
) -> Result<ProcessExit> {
    let loaded = super::load_config(config_path)?;
    let dir = super::effective_output_dir(&loaded, args.output.as_deref());

    // Read-only: a corrupt file is reported, not quarantined.
    let summary = state::inspect(&dir)
        .with_context(|| format!("reading state in {}", dir.display()))?
        .map(|document| document.summary())
        .unwrap_or_default();

    if args.json {
        let rendered = serde_json::to_string_pretty(&summary).context("rendering state summary")?;
        println!("{rendered}");
    } else {
        print_summary(&dir, &summary);
    }
    Ok(ProcessExit::Success)
}

fn print_summary(dir: &Path, summary: &StateSummary) {
    println!("State: {}", state::state_path(dir).display());
    println!("  tracked    {}", summary.total());
    println!("  downloaded {}", summary.downloaded);
    println!("  failed     {}", summary.failed);
    println!("  pending    {}", summary.discovered);
    match summary.last_run_at {
        Some(at) => println!("  last run   {}", at.to_rfc3339()),
        None => println!("  last run   never"),
    }
}
