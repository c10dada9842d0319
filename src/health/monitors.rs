//! Raw health signals: storage roots and host performance.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::download::PARTIAL_SUFFIX;
use crate::orchestrator::MANIFEST_FILE_NAME;

/// File created and removed to prove a root is writable.
const WRITE_PROBE_NAME: &str = ".harvester-write-probe";

/// Measurements of one storage root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageSnapshot {
    /// Root directory.
    pub root: PathBuf,
    /// Whether a probe file could be created.
    pub writable: bool,
    /// Filesystem size.
    pub total_bytes: u64,
    /// Bytes available to unprivileged users.
    pub available_bytes: u64,
    /// Percent of the filesystem in use.
    pub used_percent: f64,
    /// Artifacts under the root (excludes state, manifest and partials).
    pub artifact_count: usize,
    /// Combined artifact size.
    pub artifact_bytes: u64,
}

/// Inspects a storage root.
#[derive(Debug, Clone)]
pub struct StorageMonitor {
    root: PathBuf,
}

impl StorageMonitor {
    /// Creates a monitor for `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root being monitored.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the root exists as a directory.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Measures the root.
    ///
    /// # Errors
    ///
    /// Returns the I/O error when the root cannot be listed or its filesystem
    /// cannot be queried.
    pub fn snapshot(&self) -> io::Result<StorageSnapshot> {
        let total_bytes = fs2::total_space(&self.root)?;
        let available_bytes = fs2::available_space(&self.root)?;
        let (artifact_count, artifact_bytes) = count_artifacts(&self.root)?;

        Ok(StorageSnapshot {
            root: self.root.clone(),
            writable: self.probe_writable(),
            total_bytes,
            available_bytes,
            used_percent: used_percent(total_bytes, available_bytes),
            artifact_count,
            artifact_bytes,
        })
    }

    fn probe_writable(&self) -> bool {
        let probe = self.root.join(WRITE_PROBE_NAME);
        match fs::write(&probe, b"probe") {
            Ok(()) => {
                let _ = fs::remove_file(&probe);
                true
            }
            Err(e) => {
                debug!(root = %self.root.display(), error = %e, "write probe failed");
                false
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn used_percent(total: u64, available: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let used = total.saturating_sub(available);
    used as f64 / total as f64 * 100.0
}

fn count_artifacts(root: &Path) -> io::Result<(usize, u64)> {
    let mut count = 0;
    let mut bytes = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.')
            || name == MANIFEST_FILE_NAME
            || name.ends_with(&format!(".{PARTIAL_SUFFIX}"))
        {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.is_file() {
            count += 1;
            bytes += meta.len();
        }
    }
    Ok((count, bytes))
}

/// Host performance measurements. Fields are `None` where the platform does
/// not expose them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    /// Logical CPUs available to this process.
    pub cpus: usize,
    /// 1-minute load average.
    pub load_1m: Option<f64>,
    /// Percent of memory not available.
    pub memory_used_percent: Option<f64>,
}

impl PerformanceSnapshot {
    /// 1-minute load divided by CPU count.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn load_per_cpu(&self) -> Option<f64> {
        self.load_1m.map(|load| load / self.cpus.max(1) as f64)
    }
}

/// Reads CPU, load and memory figures.
#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    proc_root: PathBuf,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl PerformanceMonitor {
    /// Reads from an alternative procfs root.
    #[must_use]
    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    /// Takes a snapshot. Never fails; missing sources leave fields empty.
    #[must_use]
    pub fn snapshot(&self) -> PerformanceSnapshot {
        let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        let load_1m = fs::read_to_string(self.proc_root.join("loadavg"))
            .ok()
            .as_deref()
            .and_then(parse_loadavg);
        let memory_used_percent = fs::read_to_string(self.proc_root.join("meminfo"))
            .ok()
            .as_deref()
            .and_then(parse_meminfo_used_percent);
        PerformanceSnapshot {
            cpus,
            load_1m,
            memory_used_percent,
        }
    }
}

fn parse_loadavg(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse().ok()
}

#[allow(clippy::cast_precision_loss)]
fn parse_meminfo_used_percent(text: &str) -> Option<f64> {
    let field = |name: &str| -> Option<u64> {
        text.lines()
            .find_map(|line| line.strip_prefix(name)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|value| value.parse().ok())
    };
    let total = field("MemTotal")?;
    let available = field("MemAvailable")?;
    if total == 0 {
        return None;
    }
    Some(total.saturating_sub(available) as f64 / total as f64 * 100.0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_loadavg() {
        assert_eq!(parse_loadavg("0.52 0.58 0.59 1/389 12345\n"), Some(0.52));
        assert_eq!(parse_loadavg(""), None);
    }

    #[test]
    fn test_parse_meminfo() {
        let text = "MemTotal:       16000000 kB\nMemFree:  1000 kB\nMemAvailable:    4000000 kB\n";
        let used = parse_meminfo_used_percent(text).unwrap();
        assert!((used - 75.0).abs() < 1e-9);
        assert_eq!(parse_meminfo_used_percent("MemTotal: 10 kB\n"), None);
    }

    #[test]
    fn test_performance_monitor_with_fake_proc() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("loadavg"), "2.00 1.00 1.00 1/1 1\n").unwrap();
        let snapshot = PerformanceMonitor::with_proc_root(dir.path()).snapshot();
        assert_eq!(snapshot.load_1m, Some(2.0));
        assert!(snapshot.memory_used_percent.is_none());
        assert!(snapshot.cpus >= 1);
    }

    #[test]
    fn test_storage_snapshot_counts_only_artifacts() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.pdf"), b"12345").unwrap();
        fs::write(dir.path().join("b.pdf.part"), b"1").unwrap();
        fs::write(dir.path().join(".harvester-state.json"), b"{}").unwrap();
        fs::write(dir.path().join(MANIFEST_FILE_NAME), b"{}\n").unwrap();

        let snapshot = StorageMonitor::new(dir.path()).snapshot().unwrap();
        assert!(snapshot.writable);
        assert_eq!(snapshot.artifact_count, 1);
        assert_eq!(snapshot.artifact_bytes, 5);
        assert!(snapshot.total_bytes >= snapshot.available_bytes);
        assert!(!dir.path().join(WRITE_PROBE_NAME).exists());
    }

    #[test]
    fn test_used_percent_handles_zero_total() {
        assert!((used_percent(0, 0)).abs() < f64::EPSILON);
        assert!((used_percent(200, 50) - 75.0).abs() < 1e-9);
    }
}
