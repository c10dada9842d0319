//! Hand-off of finished reports to alerting.

use async_trait::async_trait;
use tracing::{error, warn};

use super::report::{HealthReport, HealthStatus};

/// Receives reports whose overall status is critical or worse.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    /// Delivers `report`. Delivery failures are the notifier's concern.
    async fn notify(&self, report: &HealthReport);
}

/// Writes one log event per critical issue.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    async fn notify(&self, report: &HealthReport) {
        for issue in &report.critical_issues {
            match report.overall_status {
                HealthStatus::Error => error!(issue = %issue, "health alert"),
                _ => warn!(issue = %issue, "health alert"),
            }
        }
    }
}

/// Calls `notifier` when `report` is critical or worse. Returns whether it did.
pub async fn dispatch_alerts(notifier: &dyn AlertNotifier, report: &HealthReport) -> bool {
    if report.overall_status.is_failing() {
        notifier.notify(report).await;
        true
    } else {
        false
    }
}
