//! `harvester download`: discovery plus artifact fetch.

use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use harvester_core::discovery::CategoryOutcome;
use harvester_core::{DownloadOrchestrator, DownloadRequest, RunStatistics};
use tracing::{info, warn};

use crate::ProcessExit;
use crate::app::{exit_handler, progress_manager, terminal};
use crate::cli::DownloadArgs;

pub(crate) async fn run_download_command(
    args: &DownloadArgs,
    config_path: Option<&Path>,
    quiet: bool,
) -> Result<ProcessExit> {
    let loaded = super::load_config(config_path)?;
    let mut pipeline = loaded.config.pipeline.clone();
    pipeline.output_dir = super::effective_output_dir(&loaded, args.output.as_deref());
    if let Some(concurrency) = args.concurrency {
        pipeline.concurrency = usize::from(concurrency);
    }

    let orchestrator = DownloadOrchestrator::from_config(&pipeline)?;
    let request = build_request(args);

    let interrupted = orchestrator.interrupt_handle();
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let use_progress = !args.dry_run
        && terminal::should_use_progress_bar(
            io::stderr().is_terminal(),
            quiet,
            args.json,
            terminal::is_dumb_terminal(),
        );
    let (progress_handle, progress_stop) =
        progress_manager::spawn_progress_ui(use_progress, orchestrator.progress());

    let result = orchestrator.download_papers(&request).await;

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }
    let stats = result?;

    if args.json {
        let rendered = serde_json::to_string_pretty(&stats).context("rendering run statistics")?;
        println!("{rendered}");
    } else if !quiet {
        print_run_summary(&stats, orchestrator.output_dir());
    }

    if stats.interrupted {
        warn!(
            downloaded = stats.total_downloaded,
            discovered = stats.total_discovered,
            "Interrupted. Run again to resume."
        );
    }
    info!(
        downloaded = stats.total_downloaded,
        failed = stats.total_failed,
        skipped = stats.total_skipped,
        "Download complete"
    );

    Ok(exit_handler::download_exit(&stats))
}

fn build_request(args: &DownloadArgs) -> DownloadRequest {
    let defaults = DownloadRequest::default();
    DownloadRequest {
        sources: if args.sources.is_empty() {
            defaults.sources
        } else {
            args.sources.clone()
        },
        categories: (!args.categories.is_empty()).then(|| args.categories.clone()),
        date_range: args.date_range.clone(),
        max_papers: args.max_papers,
        dry_run: args.dry_run,
        resume: !args.no_resume,
    }
}

fn print_run_summary(stats: &RunStatistics, output_dir: &Path) {
    if stats.dry_run {
        println!(
            "Dry run: {} papers discovered, nothing written",
            stats.total_discovered
        );
    } else {
        println!(
            "{} downloaded, {} skipped, {} failed ({} discovered) in {:.1}s",
            stats.total_downloaded,
            stats.total_skipped,
            stats.total_failed,
            stats.total_discovered,
            stats.duration.as_secs_f64()
        );
        println!("Output: {}", output_dir.display());
    }

    for (source, counts) in &stats.per_source {
        println!(
            "  {source:<10} discovered {:>4}  downloaded {:>4}  skipped {:>4}  failed {:>4}",
            counts.discovered, counts.downloaded, counts.skipped, counts.failed
        );
    }
    for report in &stats.failed_categories {
        let reason = match &report.outcome {
            CategoryOutcome::Failed { reason } | CategoryOutcome::Degraded { reason, .. } => {
                reason.as_str()
            }
            CategoryOutcome::Completed { .. } => "",
        };
        println!(
            "  category failed: {}/{}: {reason}",
            report.source, report.category
        );
    }
    for warning in &stats.warnings {
        println!("  warning: {warning}");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::cli::{Cli, Command};

    fn args(argv: &[&str]) -> DownloadArgs {
        let mut full = vec!["harvester", "download"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Download(args) => args,
            other => panic!("expected download, got {other:?}"),
        }
    }

    #[test]
    fn test_build_request_defaults_to_all_sources_and_configured_categories() {
        let request = build_request(&args(&[]));
        assert_eq!(request.sources, DownloadRequest::default().sources);
        assert!(request.categories.is_none());
        assert!(request.resume);
    }

    #[test]
    fn test_build_request_maps_flags() {
        let request = build_request(&args(&[
            "-s",
            "journal-a",
            "--category",
            "q-fin.*",
            "--no-resume",
            "-d",
            "all",
        ]));
        assert_eq!(request.sources, vec!["journal-a"]);
        assert_eq!(request.categories, Some(vec!["q-fin.*".to_string()]));
        assert!(!request.resume);
        assert_eq!(request.date_range, "all");
    }
}
