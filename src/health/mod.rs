//! Multi-instance health checking.
//!
//! # Architecture
//!
//! - [`SystemHealthChecker`] - schedules the checks and reduces their findings
//! - [`HealthCheck`] - one category; the eight built-ins live in `checks`
//! - [`StorageMonitor`], [`PerformanceMonitor`] - raw signals
//! - [`ErrorManager`] - failure rates from each instance's resume state
//! - [`summarize`] - pure severity reduction into a [`HealthReport`]
//! - [`AlertNotifier`] - receives failing reports; the checker never calls it
//!
//! Checks run as independent tokio tasks over a shared read-only
//! [`CheckContext`]. A check that errors or panics is recorded as an `error`
//! finding for its category.

mod checker;
mod checks;
mod error_manager;
mod monitors;
mod notify;
mod report;

pub use checker::{CheckContext, HealthCheck, HealthCheckError, SystemHealthChecker};
pub use checks::{
    ConfigurationCheck, DependenciesCheck, InstancesCheck, NetworkCheck, ResourcesCheck,
    SecurityCheck, ServicesCheck, StorageCheck, default_checks,
};
pub use error_manager::{ErrorManager, ErrorStats};
pub use monitors::{PerformanceMonitor, PerformanceSnapshot, StorageMonitor, StorageSnapshot};
pub use notify::{AlertNotifier, LogNotifier, dispatch_alerts};
pub use report::{
    CategoryResult, CheckCategory, CheckLeaf, HealthReport, HealthStatus, HealthSummary,
    summarize,
};
