//! Failure signals from an instance's resume state.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::{self, PaperStatus, StateError};

/// How many recent failures to keep for the report.
const RECENT_FAILURE_LIMIT: usize = 5;

/// Failure figures for one instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorStats {
    /// Ids tracked in the state file.
    pub tracked: usize,
    /// Ids whose last fetch failed.
    pub failed: usize,
    /// `failed / (downloaded + failed)`; 0 when nothing was attempted.
    pub failure_rate: f64,
    /// End of the last run.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Most recent failures, newest first: `(id, error)`.
    pub recent_failures: Vec<(String, String)>,
}

/// Reads failure statistics without modifying the state file.
#[derive(Debug, Clone)]
pub struct ErrorManager {
    storage_root: PathBuf,
}

impl ErrorManager {
    /// Creates a manager for one storage root.
    #[must_use]
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    /// Storage root being inspected.
    #[must_use]
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Computes statistics. `Ok(None)` when the instance has never run.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the state file is unreadable or corrupt.
    pub fn stats(&self) -> Result<Option<ErrorStats>, StateError> {
        let Some(document) = state::inspect(&self.storage_root)? else {
            return Ok(None);
        };
        let summary = document.summary();

        let mut failures: Vec<_> = document
            .papers
            .iter()
            .filter(|(_, entry)| entry.status == PaperStatus::Failed)
            .collect();
        failures.sort_by(|a, b| b.1.updated_at.cmp(&a.1.updated_at));
        let recent_failures = failures
            .into_iter()
            .take(RECENT_FAILURE_LIMIT)
            .map(|(id, entry)| {
                (
                    id.clone(),
                    entry.last_error.clone().unwrap_or_default(),
                )
            })
            .collect();

        Ok(Some(ErrorStats {
            tracked: summary.total(),
            failed: summary.failed,
            failure_rate: failure_rate(summary.downloaded, summary.failed),
            last_run_at: summary.last_run_at,
            recent_failures,
        }))
    }
}

#[allow(clippy::cast_precision_loss)]
fn failure_rate(downloaded: usize, failed: usize) -> f64 {
    let attempted = downloaded + failed;
    if attempted == 0 {
        0.0
    } else {
        failed as f64 / attempted as f64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::state::StateTracker;
    use tempfile::TempDir;

    #[test]
    fn test_never_run_instance_has_no_stats() {
        let dir = TempDir::new().unwrap();
        assert!(ErrorManager::new(dir.path()).stats().unwrap().is_none());
    }

    #[test]
    fn test_failure_rate_ignores_undownloaded_ids() {
        let dir = TempDir::new().unwrap();
        let mut tracker = StateTracker::load(dir.path(), true);
        tracker.mark("api-search:1", PaperStatus::Discovered);
        tracker.mark_downloaded("api-search:2", Some(10), 1);
        tracker.mark_downloaded("api-search:3", Some(10), 1);
        tracker.mark_downloaded("api-search:4", Some(10), 1);
        tracker.mark_failed("api-search:5", "HTTP 503", 3);
        tracker.persist().unwrap();

        let stats = ErrorManager::new(dir.path()).stats().unwrap().unwrap();
        assert_eq!(stats.tracked, 5);
        assert_eq!(stats.failed, 1);
        assert!((stats.failure_rate - 0.25).abs() < 1e-9);
        assert_eq!(
            stats.recent_failures,
            vec![("api-search:5".to_string(), "HTTP 503".to_string())]
        );
        assert!(stats.last_run_at.is_some());
    }
}
