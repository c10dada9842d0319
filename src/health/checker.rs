//! Runs the check descriptors concurrently and reduces their findings.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::checks::default_checks;
use super::monitors::PerformanceMonitor;
use super::report::{CategoryResult, CheckCategory, CheckLeaf, HealthReport, summarize};
use crate::config::{HarvesterConfig, LoadedConfig};

/// A check that could not produce findings.
#[derive(Debug, Error)]
pub enum HealthCheckError {
    /// The probe HTTP client could not be built.
    #[error("failed to build probe HTTP client: {source}")]
    Client {
        /// Builder error.
        #[source]
        source: reqwest::Error,
    },

    /// A required signal could not be read.
    #[error("{what} unavailable: {reason}")]
    Unavailable {
        /// What was being read.
        what: String,
        /// Why it failed.
        reason: String,
    },
}

impl HealthCheckError {
    /// Creates an [`Unavailable`](Self::Unavailable) error.
    #[must_use]
    pub fn unavailable(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

/// Read-only inputs shared by every check.
#[derive(Debug, Clone)]
pub struct CheckContext {
    /// Loaded configuration.
    pub config: Arc<HarvesterConfig>,
    /// Config file the configuration came from, if any.
    pub config_path: Option<PathBuf>,
    /// Host performance source.
    pub performance: PerformanceMonitor,
}

impl CheckContext {
    /// Context over a loaded configuration.
    #[must_use]
    pub fn from_loaded(loaded: &LoadedConfig) -> Self {
        Self {
            config: Arc::clone(&loaded.config),
            config_path: loaded
                .loaded_from_file
                .then(|| loaded.path.clone())
                .flatten(),
            performance: PerformanceMonitor::default(),
        }
    }
}

/// One independently schedulable check category.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Category the findings belong to.
    fn category(&self) -> CheckCategory;

    /// Produces findings.
    ///
    /// # Errors
    ///
    /// Returns [`HealthCheckError`] when the category cannot be evaluated at
    /// all; the checker records it as one `error` finding.
    async fn run(&self, context: &CheckContext) -> Result<Vec<CheckLeaf>, HealthCheckError>;
}

/// Composes the checks into one report. Constructed per invocation.
pub struct SystemHealthChecker {
    context: Arc<CheckContext>,
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl std::fmt::Debug for SystemHealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemHealthChecker")
            .field(
                "checks",
                &self.checks.iter().map(|c| c.category()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl SystemHealthChecker {
    /// Checker with the eight built-in checks.
    #[must_use]
    pub fn new(context: CheckContext) -> Self {
        Self::with_checks(context, default_checks())
    }

    /// Checker with custom checks, run in the given order.
    #[must_use]
    pub fn with_checks(context: CheckContext, checks: Vec<Arc<dyn HealthCheck>>) -> Self {
        Self {
            context: Arc::new(context),
            checks,
        }
    }

    /// Categories in scheduling order.
    #[must_use]
    pub fn categories(&self) -> Vec<CheckCategory> {
        self.checks.iter().map(|check| check.category()).collect()
    }

    /// Runs every check as its own task and aggregates the findings.
    ///
    /// Never fails: a check that errors or panics becomes one `error` finding
    /// for its category, and the other checks are unaffected.
    #[instrument(skip(self), fields(checks = self.checks.len(), instances = self.context.config.instances.len()))]
    pub async fn run_comprehensive_health_check(&self) -> HealthReport {
        let timestamp = Utc::now();

        let handles: Vec<_> = self
            .checks
            .iter()
            .map(|check| {
                let category = check.category();
                let check = Arc::clone(check);
                let context = Arc::clone(&self.context);
                let handle = tokio::spawn(async move {
                    let started = Instant::now();
                    let result = check.run(&context).await;
                    (result, elapsed_ms(started))
                });
                (category, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (category, handle) in handles {
            let result = match handle.await {
                Ok((Ok(leaves), duration_ms)) => CategoryResult::new(category, leaves, duration_ms),
                Ok((Err(error), duration_ms)) => {
                    warn!(%category, error = %error, "health check failed");
                    CategoryResult::new(
                        category,
                        vec![CheckLeaf::error(
                            format!("{category}_check"),
                            format!("{category} check failed: {error}"),
                        )],
                        duration_ms,
                    )
                }
                Err(join_error) => {
                    warn!(%category, error = %join_error, "health check panicked");
                    CategoryResult::new(
                        category,
                        vec![CheckLeaf::error(
                            format!("{category}_check"),
                            format!("{category} check aborted: {join_error}"),
                        )],
                        0,
                    )
                }
            };
            info!(
                category = %result.category,
                status = %result.status,
                findings = result.leaves.len(),
                duration_ms = result.duration_ms,
                "health category evaluated"
            );
            results.push(result);
        }

        let report = summarize(timestamp, results);
        info!(
            overall = %report.overall_status,
            passed = report.summary.passed,
            warnings = report.summary.warnings,
            failed = report.summary.failed,
            "health check complete"
        );
        report
    }
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
