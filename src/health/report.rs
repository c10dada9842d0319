//! Health report types and the pure severity reduction.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of one finding. Ordered: `Healthy < Warning < Critical < Error`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Nothing to report.
    #[default]
    Healthy,
    /// Degraded but working.
    Warning,
    /// Not working, needs attention.
    Critical,
    /// The check itself could not run.
    Error,
}

impl HealthStatus {
    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Error => "error",
        }
    }

    /// True for `Critical` and `Error`.
    #[must_use]
    pub fn is_failing(self) -> bool {
        self >= Self::Critical
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// The eight check categories, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckCategory {
    /// CPU load and memory.
    Resources,
    /// HTTP client and required executables.
    Dependencies,
    /// Instance settings.
    Configuration,
    /// Source reachability.
    Services,
    /// Per-instance run state.
    Instances,
    /// Storage roots.
    Storage,
    /// DNS resolution of source hosts.
    Network,
    /// Transport and file permission posture.
    Security,
}

impl CheckCategory {
    /// Every category in report order.
    pub const ALL: [CheckCategory; 8] = [
        Self::Resources,
        Self::Dependencies,
        Self::Configuration,
        Self::Services,
        Self::Instances,
        Self::Storage,
        Self::Network,
        Self::Security,
    ];

    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resources => "resources",
            Self::Dependencies => "dependencies",
            Self::Configuration => "configuration",
            Self::Services => "services",
            Self::Instances => "instances",
            Self::Storage => "storage",
            Self::Network => "network",
            Self::Security => "security",
        }
    }
}

impl fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckLeaf {
    /// Short name of what was checked (`disk_usage`, `dns:export.arxiv.org`).
    pub name: String,
    /// Instance the finding belongs to; `None` for host-wide findings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Severity.
    pub status: HealthStatus,
    /// Human-readable finding.
    pub message: String,
    /// Suggested fix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    /// Raw measurements behind the finding.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl CheckLeaf {
    /// Creates a leaf.
    #[must_use]
    pub fn new(name: impl Into<String>, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: None,
            status,
            message: message.into(),
            recommendation: None,
            metrics: BTreeMap::new(),
        }
    }

    /// Healthy leaf.
    #[must_use]
    pub fn healthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Healthy, message)
    }

    /// Warning leaf.
    #[must_use]
    pub fn warning(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Warning, message)
    }

    /// Critical leaf.
    #[must_use]
    pub fn critical(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Critical, message)
    }

    /// Error leaf.
    #[must_use]
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Error, message)
    }

    /// Attaches the finding to `instance`.
    #[must_use]
    pub fn for_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Adds a recommendation.
    #[must_use]
    pub fn recommend(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }

    /// Records a measurement.
    #[must_use]
    pub fn metric(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }
}

/// All findings of one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    /// Category.
    pub category: CheckCategory,
    /// Worst leaf severity; healthy when there are no leaves.
    pub status: HealthStatus,
    /// Findings in the order the check produced them.
    pub leaves: Vec<CheckLeaf>,
    /// How long the check ran.
    pub duration_ms: u64,
}

impl CategoryResult {
    /// Wraps `leaves`, classifying the category by its worst leaf.
    #[must_use]
    pub fn new(category: CheckCategory, leaves: Vec<CheckLeaf>, duration_ms: u64) -> Self {
        Self {
            category,
            status: worst(&leaves),
            leaves,
            duration_ms,
        }
    }
}

fn worst(leaves: &[CheckLeaf]) -> HealthStatus {
    leaves
        .iter()
        .map(|leaf| leaf.status)
        .max()
        .unwrap_or_default()
}

/// Leaf tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    /// Leaves counted.
    pub total: usize,
    /// Healthy leaves.
    pub passed: usize,
    /// Warning leaves.
    pub warnings: usize,
    /// Critical and error leaves.
    pub failed: usize,
}

/// Aggregated result of one health check run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// When the run started.
    pub timestamp: DateTime<Utc>,
    /// Worst severity of any leaf.
    pub overall_status: HealthStatus,
    /// Category results in check order.
    pub checks: Vec<CategoryResult>,
    /// Leaf tallies.
    pub summary: HealthSummary,
    /// De-duplicated recommendations in category-then-instance order.
    pub recommendations: Vec<String>,
    /// Messages of critical and error leaves in category-then-instance order.
    pub critical_issues: Vec<String>,
}

impl HealthReport {
    /// Result for `category`, if it ran.
    #[must_use]
    pub fn category(&self, category: CheckCategory) -> Option<&CategoryResult> {
        self.checks.iter().find(|result| result.category == category)
    }
}

/// Reduces category results into a report.
///
/// Pure: the overall status and tallies do not depend on the order of
/// `checks` or of their leaves. Issue and recommendation lists follow
/// category order, then instance order (host-wide leaves first), then
/// production order.
#[must_use]
pub fn summarize(timestamp: DateTime<Utc>, mut checks: Vec<CategoryResult>) -> HealthReport {
    checks.sort_by_key(|result| result.category);

    let mut summary = HealthSummary::default();
    let mut critical_issues = Vec::new();
    let mut recommendations = Vec::new();
    let mut seen_recommendations = HashSet::new();
    let mut overall = HealthStatus::Healthy;

    for result in &checks {
        let mut ordered: Vec<&CheckLeaf> = result.leaves.iter().collect();
        ordered.sort_by(|a, b| a.instance.cmp(&b.instance));

        for leaf in ordered {
            overall = overall.max(leaf.status);
            summary.total += 1;
            match leaf.status {
                HealthStatus::Healthy => summary.passed += 1,
                HealthStatus::Warning => summary.warnings += 1,
                HealthStatus::Critical | HealthStatus::Error => {
                    summary.failed += 1;
                    critical_issues.push(issue_line(result.category, leaf));
                }
            }
            if let Some(recommendation) = &leaf.recommendation {
                if seen_recommendations.insert(recommendation.clone()) {
                    recommendations.push(recommendation.clone());
                }
            }
        }
    }

    HealthReport {
        timestamp,
        overall_status: overall,
        checks,
        summary,
        recommendations,
        critical_issues,
    }
}

fn issue_line(category: CheckCategory, leaf: &CheckLeaf) -> String {
    match &leaf.instance {
        Some(instance) => format!("[{category}/{instance}] {}", leaf.message),
        None => format!("[{category}] {}", leaf.message),
    }
}
