//! Paced, retried artifact fetching for discovered papers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::client::HttpClient;
use super::constants::DEFAULT_ARTIFACT_EXTENSION;
use super::rate_limiter::RateLimiter;
use super::retry::{RetryPolicy, run_with_retry};
use crate::model::PaperRecord;

/// Result of one [`Fetcher::fetch`] call.
///
/// Fetch failures are values, not errors: the orchestrator records them and
/// keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchOutcome {
    /// Whether the artifact is now present under its final name.
    pub success: bool,
    /// Bytes written by this call (0 for the fast path).
    pub bytes_written: u64,
    /// Error description when `success` is false.
    pub error: Option<String>,
    /// True when a complete file already existed and no request was made.
    pub already_present: bool,
    /// Final artifact path.
    pub path: PathBuf,
    /// Number of network attempts made.
    pub attempts: u32,
}

/// Downloads artifacts into one output directory.
///
/// Pacing is per source and independent of discovery pacing: the fetcher owns
/// its own [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: HttpClient,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    output_dir: PathBuf,
}

impl Fetcher {
    /// Creates a fetcher writing into `output_dir`.
    #[must_use]
    pub fn new(
        client: HttpClient,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            limiter,
            policy,
            output_dir: output_dir.into(),
        }
    }

    /// Returns the directory artifacts are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Returns where `record`'s artifact lives once fetched.
    #[must_use]
    pub fn target_path(&self, record: &PaperRecord) -> PathBuf {
        self.output_dir.join(artifact_file_name(record))
    }

    /// Fetches `record`'s artifact unless a non-empty copy already exists.
    #[instrument(skip(self, record), fields(id = %record.id, source = %record.source))]
    pub async fn fetch(&self, record: &PaperRecord) -> FetchOutcome {
        let path = self.target_path(record);

        if is_complete_file(&path).await {
            debug!(path = %path.display(), "artifact already present, skipping network");
            return FetchOutcome {
                success: true,
                bytes_written: 0,
                error: None,
                already_present: true,
                path,
                attempts: 0,
            };
        }

        let result = run_with_retry(
            &self.policy,
            &self.limiter,
            record.source.as_str(),
            || self.client.download_to_path(&record.artifact_url, &path),
        )
        .await;

        match result {
            Ok((bytes_written, attempts)) => {
                info!(bytes = bytes_written, attempts, "fetched artifact");
                FetchOutcome {
                    success: true,
                    bytes_written,
                    error: None,
                    already_present: false,
                    path,
                    attempts,
                }
            }
            Err((error, attempts)) => {
                warn!(attempts, error = %error, "fetch failed");
                FetchOutcome {
                    success: false,
                    bytes_written: 0,
                    error: Some(error.to_string()),
                    already_present: false,
                    path,
                    attempts,
                }
            }
        }
    }
}

async fn is_complete_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

/// Builds the artifact file name: sanitized id plus the URL's extension.
///
/// `:` and `/` (and other path-hostile characters) become `_`, so
/// `api-search:2401.00001` maps to `api-search_2401.00001.pdf`.
#[must_use]
pub fn artifact_file_name(record: &PaperRecord) -> String {
    let stem = sanitize_stem(&record.id);
    let extension = artifact_extension(&record.artifact_url);
    format!("{stem}.{extension}")
}

fn sanitize_stem(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            ':' | '/' | '\\' | '?' | '*' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() || c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

fn artifact_extension(artifact_url: &str) -> String {
    Url::parse(artifact_url)
        .ok()
        .and_then(|url| {
            let last = url.path_segments()?.next_back()?.to_string();
            let (_, ext) = last.rsplit_once('.')?;
            let valid = !ext.is_empty()
                && ext.len() <= 5
                && ext.chars().all(|c| c.is_ascii_alphanumeric());
            valid.then(|| ext.to_ascii_lowercase())
        })
        .unwrap_or_else(|| DEFAULT_ARTIFACT_EXTENSION.to_string())
}
