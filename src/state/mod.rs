//! Resume state: which paper ids have been discovered, downloaded or failed.
//!
//! One JSON document per output directory (`.harvester-state.json`). Writes
//! go to a temp file in the same directory, are fsynced, then atomically
//! renamed over the old file under an exclusive `fs2` lock, so a crash
//! between two persists leaves either the old or the new state on disk.
//!
//! A missing file is an empty state. An unreadable or corrupt file is moved
//! aside (`.corrupt`) with a warning and the run starts from empty state.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// State file name inside the output directory.
pub const STATE_FILE_NAME: &str = ".harvester-state.json";

/// Lock file guarding persists.
pub const LOCK_FILE_NAME: &str = ".harvester-state.lock";

/// Suffix appended to a state file that failed to parse.
pub const CORRUPT_SUFFIX: &str = "corrupt";

const STATE_FORMAT_VERSION: u32 = 1;

/// Errors from persisting or resetting state.
///
/// Loading never fails: unreadable state is recovered as empty.
#[derive(Debug, Error)]
pub enum StateError {
    /// File system error on a state-related path.
    #[error("state file error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The state file is not valid JSON (only reported by [`inspect`]).
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        /// State file path.
        path: PathBuf,
        /// Parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The in-memory state could not be serialized.
    #[error("failed to serialize download state: {source}")]
    Serialize {
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Lifecycle of one paper id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperStatus {
    /// Listed by discovery, not yet fetched.
    Discovered,
    /// Artifact fetched and present under its final name.
    Downloaded,
    /// Last fetch attempt failed; retried on the next run.
    Failed,
}

/// Persisted per-id record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperEntry {
    /// Current status.
    pub status: PaperStatus,
    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
    /// Fetch attempts across all runs.
    #[serde(default)]
    pub attempts: u32,
    /// Last fetch error, if the last attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Artifact size once downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

/// On-disk document. Unknown fields are ignored on load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadState {
    /// Format version.
    #[serde(default)]
    pub version: u32,
    /// Entries by qualified paper id.
    #[serde(default)]
    pub papers: BTreeMap<String, PaperEntry>,
    /// End of the last run that persisted this state.
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

impl DownloadState {
    /// Counts entries by status.
    #[must_use]
    pub fn summary(&self) -> StateSummary {
        let mut summary = StateSummary {
            last_run_at: self.last_run_at,
            ..StateSummary::default()
        };
        for entry in self.papers.values() {
            match entry.status {
                PaperStatus::Discovered => summary.discovered += 1,
                PaperStatus::Downloaded => summary.downloaded += 1,
                PaperStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

/// Counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateSummary {
    /// Ids listed but never fetched.
    pub discovered: usize,
    /// Ids fetched.
    pub downloaded: usize,
    /// Ids whose last fetch failed.
    pub failed: usize,
    /// `last_run_at` of the document.
    pub last_run_at: Option<DateTime<Utc>>,
}

impl StateSummary {
    /// Total tracked ids.
    #[must_use]
    pub fn total(&self) -> usize {
        self.discovered + self.downloaded + self.failed
    }
}

/// Owns the resume state for one output directory.
#[derive(Debug)]
pub struct StateTracker {
    dir: PathBuf,
    resume: bool,
    state: DownloadState,
}

impl StateTracker {
    /// Loads state from `dir`.
    ///
    /// With `resume == false` the file is still read (so later writes keep
    /// earlier entries) but [`is_done`](Self::is_done) always answers false.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display(), resume))]
    pub fn load(dir: impl AsRef<Path>, resume: bool) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let state = read_state(&dir);
        debug!(entries = state.papers.len(), "state loaded");
        Self { dir, resume, state }
    }

    /// Path of the state file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        state_path(&self.dir)
    }

    /// Whether `id` is complete and may be skipped.
    #[must_use]
    pub fn is_done(&self, id: &str) -> bool {
        self.resume && self.status(id) == Some(PaperStatus::Downloaded)
    }

    /// Current status of `id`, regardless of resume mode.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<PaperStatus> {
        self.state.papers.get(id).map(|entry| entry.status)
    }

    /// Returns the full entry for `id`.
    #[must_use]
    pub fn entry(&self, id: &str) -> Option<&PaperEntry> {
        self.state.papers.get(id)
    }

    /// Sets `id` to `status`.
    ///
    /// `Discovered` never overwrites an existing entry: rediscovery must not
    /// downgrade a downloaded or failed paper.
    pub fn mark(&mut self, id: &str, status: PaperStatus) {
        let now = Utc::now();
        match (self.state.papers.get_mut(id), status) {
            (Some(_), PaperStatus::Discovered) => {}
            (Some(entry), status) => {
                entry.status = status;
                entry.updated_at = now;
            }
            (None, status) => {
                self.state.papers.insert(
                    id.to_string(),
                    PaperEntry {
                        status,
                        updated_at: now,
                        attempts: 0,
                        last_error: None,
                        bytes: None,
                    },
                );
            }
        }
    }

    /// Records a successful fetch.
    pub fn mark_downloaded(&mut self, id: &str, bytes: Option<u64>, attempts: u32) {
        self.mark(id, PaperStatus::Downloaded);
        if let Some(entry) = self.state.papers.get_mut(id) {
            entry.attempts = entry.attempts.saturating_add(attempts);
            entry.last_error = None;
            if bytes.is_some() {
                entry.bytes = bytes;
            }
        }
    }

    /// Records a failed fetch.
    pub fn mark_failed(&mut self, id: &str, error: &str, attempts: u32) {
        self.mark(id, PaperStatus::Failed);
        if let Some(entry) = self.state.papers.get_mut(id) {
            entry.attempts = entry.attempts.saturating_add(attempts);
            entry.last_error = Some(error.to_string());
        }
    }

    /// Counts entries by status.
    #[must_use]
    pub fn summary(&self) -> StateSummary {
        self.state.summary()
    }

    /// Read-only view of the document.
    #[must_use]
    pub fn state(&self) -> &DownloadState {
        &self.state
    }

    /// Atomically writes the state file, stamping `last_run_at`.
    ///
    /// Blocks on the directory lock and fsync; async callers should write a
    /// [`snapshot`](Self::snapshot) from a blocking task instead.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the lock, temp file, fsync or rename fails.
    /// The previous state file is untouched in that case.
    pub fn persist(&mut self) -> Result<(), StateError> {
        self.snapshot().write()
    }

    /// Stamps `last_run_at` and copies the document for writing elsewhere.
    #[must_use]
    pub fn snapshot(&mut self) -> StateSnapshot {
        self.state.version = STATE_FORMAT_VERSION;
        self.state.last_run_at = Some(Utc::now());
        StateSnapshot {
            dir: self.dir.clone(),
            state: self.state.clone(),
        }
    }
}

/// Point-in-time copy of a tracker's document, detached from the tracker.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    dir: PathBuf,
    state: DownloadState,
}

impl StateSnapshot {
    /// Writes the snapshot under the directory lock: temp file, fsync, rename.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the lock, temp file, fsync or rename fails.
    #[instrument(skip(self), fields(dir = %self.dir.display(), entries = self.state.papers.len()))]
    pub fn write(self) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty(&self.state)
            .map_err(|source| StateError::Serialize { source })?;

        let _lock = acquire_lock(&self.dir)?;
        let target = state_path(&self.dir);

        let mut temp =
            NamedTempFile::new_in(&self.dir).map_err(|e| StateError::io(&self.dir, e))?;
        temp.write_all(&json)
            .map_err(|e| StateError::io(temp.path(), e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| StateError::io(temp.path(), e))?;
        temp.persist(&target)
            .map_err(|e| StateError::io(&target, e.error))?;
        sync_dir(&self.dir);

        debug!("state persisted");
        Ok(())
    }
}

/// Deletes the state file of `dir`. Returns whether a file was removed.
///
/// # Errors
///
/// Returns [`StateError::Io`] when the file exists but cannot be removed.
#[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
pub fn reset(dir: impl AsRef<Path>) -> Result<bool, StateError> {
    let dir = dir.as_ref();
    if !state_path(dir).exists() {
        return Ok(false);
    }
    let _lock = acquire_lock(dir)?;
    let path = state_path(dir);
    match fs::remove_file(&path) {
        Ok(()) => {
            info!(path = %path.display(), "state reset");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StateError::io(path, e)),
    }
}

/// Reads the state of `dir` without recovering or moving anything.
///
/// Returns `Ok(None)` when no state file exists.
///
/// # Errors
///
/// [`StateError::Io`] when the file cannot be read, [`StateError::Corrupt`]
/// when it does not parse.
pub fn inspect(dir: &Path) -> Result<Option<DownloadState>, StateError> {
    let path = state_path(dir);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StateError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StateError::Corrupt { path, source })
}

/// Returns the state file path for `dir`.
#[must_use]
pub fn state_path(dir: &Path) -> PathBuf {
    dir.join(STATE_FILE_NAME)
}

fn read_state(dir: &Path) -> DownloadState {
    let path = state_path(dir);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return DownloadState::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "state file unreadable, starting from empty state");
            return DownloadState::default();
        }
    };

    match serde_json::from_slice::<DownloadState>(&bytes) {
        Ok(state) => state,
        Err(e) => {
            let mut aside = path.clone().into_os_string();
            aside.push(".");
            aside.push(CORRUPT_SUFFIX);
            let aside = PathBuf::from(aside);
            match fs::rename(&path, &aside) {
                Ok(()) => warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "state file corrupt, moved aside and starting from empty state"
                ),
                Err(rename_error) => warn!(
                    path = %path.display(),
                    error = %e,
                    rename_error = %rename_error,
                    "state file corrupt and could not be moved aside, starting from empty state"
                ),
            }
            DownloadState::default()
        }
    }
}

/// Exclusive advisory lock held for the lifetime of the returned file.
fn acquire_lock(dir: &Path) -> Result<File, StateError> {
    let path = dir.join(LOCK_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|e| StateError::io(&path, e))?;
    fs2::FileExt::lock_exclusive(&file).map_err(|e| StateError::io(&path, e))?;
    Ok(file)
}

/// Makes the rename durable. Best effort: not every platform can open directories.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let tracker = StateTracker::load(dir.path(), true);
        assert_eq!(tracker.summary().total(), 0);
        assert!(!tracker.is_done("api-search:1"));
    }

    #[test]
    fn test_persist_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut tracker = StateTracker::load(dir.path(), true);
        tracker.mark("api-search:1", PaperStatus::Discovered);
        tracker.mark_downloaded("api-search:1", Some(10), 1);
        tracker.mark_failed("journal-a:2", "HTTP 503", 3);
        tracker.persist().unwrap();

        let reloaded = StateTracker::load(dir.path(), true);
        assert!(reloaded.is_done("api-search:1"));
        assert!(!reloaded.is_done("journal-a:2"));
        let failed = reloaded.entry("journal-a:2").unwrap();
        assert_eq!(failed.attempts, 3);
        assert_eq!(failed.last_error.as_deref(), Some("HTTP 503"));
        assert!(reloaded.summary().last_run_at.is_some());
    }

    #[test]
    fn test_discovered_never_downgrades() {
        let dir = TempDir::new().unwrap();
        let mut tracker = StateTracker::load(dir.path(), true);
        tracker.mark_downloaded("api-search:1", Some(1), 1);
        tracker.mark("api-search:1", PaperStatus::Discovered);
        assert_eq!(tracker.status("api-search:1"), Some(PaperStatus::Downloaded));

        tracker.mark_failed("api-search:2", "x", 1);
        tracker.mark("api-search:2", PaperStatus::Discovered);
        assert_eq!(tracker.status("api-search:2"), Some(PaperStatus::Failed));
    }

    #[test]
    fn test_resume_false_bypasses_reads_but_keeps_entries() {
        let dir = TempDir::new().unwrap();
        let mut tracker = StateTracker::load(dir.path(), true);
        tracker.mark_downloaded("api-search:1", Some(1), 1);
        tracker.persist().unwrap();

        let mut fresh = StateTracker::load(dir.path(), false);
        assert!(!fresh.is_done("api-search:1"));
        assert_eq!(fresh.status("api-search:1"), Some(PaperStatus::Downloaded));
        fresh.mark_downloaded("api-search:2", Some(2), 1);
        fresh.persist().unwrap();

        let resumed = StateTracker::load(dir.path(), true);
        assert!(resumed.is_done("api-search:1"));
        assert!(resumed.is_done("api-search:2"));
    }

    #[test]
    fn test_corrupt_file_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STATE_FILE_NAME);
        fs::write(&path, b"{ not json").unwrap();

        let tracker = StateTracker::load(dir.path(), true);
        assert_eq!(tracker.summary().total(), 0);
        assert!(!path.exists());
        assert!(dir.path().join(".harvester-state.json.corrupt").exists());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(STATE_FILE_NAME),
            r#"{
                "version": 7,
                "future_field": {"nested": true},
                "papers": {
                    "api-search:123": {
                        "status": "downloaded",
                        "updated_at": "2024-01-01T00:00:00Z",
                        "checksum": "abc"
                    }
                }
            }"#,
        )
        .unwrap();

        let tracker = StateTracker::load(dir.path(), true);
        assert!(tracker.is_done("api-search:123"));
    }

    #[test]
    fn test_persist_replaces_file_atomically() {
        let dir = TempDir::new().unwrap();
        let mut tracker = StateTracker::load(dir.path(), true);
        tracker.mark_downloaded("a:1", Some(1), 1);
        tracker.persist().unwrap();
        tracker.mark_downloaded("a:2", Some(1), 1);
        tracker.persist().unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert!(names.contains(&STATE_FILE_NAME.to_string()));
        // Only the state and lock files remain; no stray temp files.
        assert_eq!(names.len(), 2);
        let on_disk: DownloadState =
            serde_json::from_slice(&fs::read(dir.path().join(STATE_FILE_NAME)).unwrap()).unwrap();
        assert_eq!(on_disk.papers.len(), 2);
    }

    #[test]
    fn test_snapshot_writes_the_state_at_capture_time() {
        let dir = TempDir::new().unwrap();
        let mut tracker = StateTracker::load(dir.path(), true);
        tracker.mark_downloaded("journal-a:1", Some(10), 1);
        let snapshot = tracker.snapshot();
        tracker.mark_failed("journal-a:2", "boom", 1);

        snapshot.write().unwrap();

        let written = inspect(dir.path()).unwrap().unwrap();
        assert!(written.last_run_at.is_some());
        assert_eq!(written.papers.len(), 1);
        assert_eq!(written.papers["journal-a:1"].status, PaperStatus::Downloaded);
    }

    #[test]
    fn test_reset_removes_state() {
        let dir = TempDir::new().unwrap();
        let mut tracker = StateTracker::load(dir.path(), true);
        tracker.mark_downloaded("a:1", Some(1), 1);
        tracker.persist().unwrap();

        assert!(reset(dir.path()).unwrap());
        assert!(!reset(dir.path()).unwrap());
        assert_eq!(StateTracker::load(dir.path(), true).summary().total(), 0);
    }

    #[test]
    fn test_inspect_reports_corruption_without_moving_file() {
        let dir = TempDir::new().unwrap();
        assert!(inspect(dir.path()).unwrap().is_none());

        fs::write(state_path(dir.path()), b"{not json").unwrap();
        assert!(matches!(
            inspect(dir.path()),
            Err(StateError::Corrupt { .. })
        ));
        assert!(state_path(dir.path()).exists());
    }
}
