//! `manifest.jsonl`: one line per newly fetched paper, consumed by ingestion.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::download::FetchOutcome;
use crate::model::{PaperRecord, SourceId};

/// Manifest file name inside the output directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.jsonl";

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Qualified id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Source.
    pub source: SourceId,
    /// Publication date.
    pub published_at: NaiveDate,
    /// Category labels.
    pub categories: Vec<String>,
    /// Where the artifact came from.
    pub artifact_url: String,
    /// File name relative to the output directory.
    pub file: String,
    /// Artifact size.
    pub bytes: u64,
    /// When it was written.
    pub fetched_at: DateTime<Utc>,
}

impl ManifestEntry {
    pub(crate) fn new(record: &PaperRecord, outcome: &FetchOutcome) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            source: record.source,
            published_at: record.published_at,
            categories: record.categories.iter().cloned().collect(),
            artifact_url: record.artifact_url.clone(),
            file: outcome
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            bytes: outcome.bytes_written,
            fetched_at: Utc::now(),
        }
    }
}

/// Path of the manifest in `dir`.
#[must_use]
pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILE_NAME)
}

pub(crate) fn append(dir: &Path, entry: &ManifestEntry) -> std::io::Result<()> {
    let mut line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(manifest_path(dir))?;
    file.write_all(line.as_bytes())
}
