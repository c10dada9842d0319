//! `harvester health`: run every check across every configured instance.

use std::path::Path;

use anyhow::{Context, Result};
use harvester_core::health::{CheckContext, HealthReport, LogNotifier, dispatch_alerts};
use harvester_core::SystemHealthChecker;
use tracing::debug;

use crate::ProcessExit;
use crate::app::exit_handler;
use crate::cli::HealthArgs;

pub(crate) async fn run_health_command(
    args: &HealthArgs,
    config_path: Option<&Path>,
) -> Result<ProcessExit> {
    let loaded = super::load_config(config_path)?;
    let checker = SystemHealthChecker::new(CheckContext::from_loaded(&loaded));
    let report = checker.run_comprehensive_health_check().await;

    if args.json {
        let rendered = serde_json::to_string_pretty(&report).context("rendering health report")?;
        println!("{rendered}");
    } else {
        print_report(&report);
    }

    if args.no_alert {
        debug!("alert dispatch disabled");
    } else {
        let alerted = dispatch_alerts(&LogNotifier, &report).await;
        debug!(alerted, "alert dispatch finished");
    }

    Ok(exit_handler::health_exit(report.overall_status))
}

fn print_report(report: &HealthReport) {
    println!(
        "Overall: {} ({} passed, {} warnings, {} failed of {})",
        report.overall_status,
        report.summary.passed,
        report.summary.warnings,
        report.summary.failed,
        report.summary.total
    );
    for result in &report.checks {
        println!(
            "[{}] {} ({} ms)",
            result.status,
            result.category.as_str(),
            result.duration_ms
        );
        for leaf in &result.leaves {
            let scope = leaf
                .instance
                .as_deref()
                .map_or_else(String::new, |instance| format!("{instance}: "));
            println!("    {:<8} {scope}{}: {}", leaf.status, leaf.name, leaf.message);
        }
    }
    if !report.critical_issues.is_empty() {
        println!("Issues:");
        for issue in &report.critical_issues {
            println!("  - {issue}");
        }
    }
    if !report.recommendations.is_empty() {
        println!("Recommendations:");
        for recommendation in &report.recommendations {
            println!("  - {recommendation}");
        }
    }
}
