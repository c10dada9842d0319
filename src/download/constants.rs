//! Constants for the download module (timeouts, pacing, file names).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default minimum delay between requests to one source (1 request/second).
pub const DEFAULT_SOURCE_DELAY: Duration = Duration::from_secs(1);

/// Warning threshold for cumulative pacing delay per key (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Suffix of in-progress artifact files.
pub const PARTIAL_SUFFIX: &str = "part";

/// Extension used when the artifact URL carries none.
pub const DEFAULT_ARTIFACT_EXTENSION: &str = "pdf";
