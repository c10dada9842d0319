//! Artifact download: HTTP client, pacing, retry and the per-record fetcher.
//!
//! The [`RateLimiter`], [`RetryPolicy`] and [`HttpClient`] defined here are
//! also used by the source adapters for listing requests, with separate
//! limiter instances so discovery and download pacing never interfere.

mod client;
mod constants;
mod error;
mod fetcher;
mod rate_limiter;
mod retry;

pub use client::{HttpClient, partial_path};
pub use constants::{DEFAULT_SOURCE_DELAY, PARTIAL_SUFFIX};
pub use error::DownloadError;
pub use fetcher::{FetchOutcome, Fetcher, artifact_file_name};
pub use rate_limiter::{RateLimiter, parse_retry_after};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
    classify_http_status, classify_reqwest_error, run_with_retry,
};
