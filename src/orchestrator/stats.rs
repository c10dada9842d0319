//! Run statistics and live progress counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::discovery::CategoryReport;
use crate::model::SourceId;

/// Per-source counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    /// Records discovered (after dedup and cap).
    pub discovered: usize,
    /// Artifacts fetched this run.
    pub downloaded: usize,
    /// Fetches that failed. Unlistable categories go to
    /// [`RunStatistics::failed_categories`] only.
    pub failed: usize,
    /// Records skipped because they were already complete.
    pub skipped: usize,
}

/// Outcome of one [`download_papers`](super::DownloadOrchestrator::download_papers) call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    /// Records discovered after dedup and cap.
    pub total_discovered: usize,
    /// Artifacts fetched this run.
    pub total_downloaded: usize,
    /// Failed fetches; the sum of `per_source[*].failed`.
    pub total_failed: usize,
    /// Records skipped as already complete (resume state or existing file).
    pub total_skipped: usize,
    /// Bytes written this run.
    pub bytes_written: u64,
    /// Counters keyed by source.
    pub per_source: BTreeMap<SourceId, SourceStats>,
    /// Wall-clock run time.
    #[serde(rename = "duration_secs", serialize_with = "serialize_secs")]
    pub duration: Duration,
    /// Whether the fetch phase was skipped.
    pub dry_run: bool,
    /// Whether an interrupt stopped the fetch phase early.
    pub interrupted: bool,
    /// Categories that could not be listed. Not counted in any `failed` field.
    pub failed_categories: Vec<CategoryReport>,
    /// Non-fatal problems: degraded listings, state write failures.
    pub warnings: Vec<String>,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl RunStatistics {
    /// True when nothing failed and the run was not interrupted.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.interrupted && self.total_failed == 0 && self.failed_categories.is_empty()
    }

    pub(crate) fn source_mut(&mut self, source: SourceId) -> &mut SourceStats {
        self.per_source.entry(source).or_default()
    }
}

/// Point-in-time copy of [`RunProgress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Records queued for fetching.
    pub total: usize,
    /// Fetched.
    pub downloaded: usize,
    /// Failed.
    pub failed: usize,
    /// Skipped.
    pub skipped: usize,
}

impl ProgressSnapshot {
    /// Records finished in any way.
    #[must_use]
    pub fn done(&self) -> usize {
        self.downloaded + self.failed + self.skipped
    }
}

/// Live counters read by the CLI progress bar while a run is in flight.
#[derive(Debug, Default)]
pub struct RunProgress {
    total: AtomicUsize,
    downloaded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl RunProgress {
    pub(crate) fn reset(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.downloaded.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.skipped.store(0, Ordering::SeqCst);
    }

    pub(crate) fn record_downloaded(&self) {
        self.downloaded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    /// Reads all counters.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::SeqCst),
            downloaded: self.downloaded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reset_and_snapshot() {
        let progress = RunProgress::default();
        progress.reset(5);
        progress.record_downloaded();
        progress.record_failed();
        progress.record_skipped();
        progress.record_skipped();

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.total, 5);
        assert_eq!(snapshot.done(), 4);

        progress.reset(2);
        assert_eq!(progress.snapshot().done(), 0);
    }

    #[test]
    fn test_statistics_serialize_duration_as_seconds() {
        let mut stats = RunStatistics {
            duration: Duration::from_millis(1500),
            ..RunStatistics::default()
        };
        stats.source_mut(SourceId::JournalA).downloaded = 2;

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["duration_secs"], 1.5);
        assert_eq!(json["per_source"]["journal-a"]["downloaded"], 2);
        assert!(stats.is_clean());
    }
}
