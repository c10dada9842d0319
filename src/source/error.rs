//! Error types for source adapters.
//!
//! A rejected query is not fatal for discovery: adapters turn
//! [`SourceError::Rejected`] into a degraded, zero-result [`super::Discovery`].
//! The remaining variants mean the category failed for this run.

use thiserror::Error;

use crate::download::DownloadError;
use crate::model::SourceId;

/// Errors produced while listing a source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source refused the query syntax (HTTP 400/422 or an error entry).
    #[error("{source_id} rejected query {url}: {reason}")]
    Rejected {
        /// Source that rejected the query.
        source_id: SourceId,
        /// Request URL.
        url: String,
        /// What the source said.
        reason: String,
    },

    /// The listing request failed after retries.
    #[error("{source_id} request to {url} failed after {attempts} attempt(s): {error}")]
    Request {
        /// Source being listed.
        source_id: SourceId,
        /// Request URL.
        url: String,
        /// Attempts made before giving up.
        attempts: u32,
        /// The final error.
        #[source]
        error: DownloadError,
    },

    /// The response body could not be parsed.
    #[error("{source_id} returned an unparseable listing from {url}: {reason}")]
    Parse {
        /// Source being listed.
        source_id: SourceId,
        /// Request URL.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// A configured base URL is not a valid absolute URL.
    #[error(
        "invalid base URL '{base_url}' for {source_id}\n  Suggestion: set an absolute http(s) URL in [pipeline.sources.{source_id}]"
    )]
    InvalidBaseUrl {
        /// Source whose base URL is invalid.
        source_id: SourceId,
        /// The rejected value.
        base_url: String,
    },
}

impl SourceError {
    /// Creates a `Rejected` error.
    #[must_use]
    pub fn rejected(source_id: SourceId, url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            source_id,
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `Request` error.
    #[must_use]
    pub fn request(
        source_id: SourceId,
        url: impl Into<String>,
        attempts: u32,
        error: DownloadError,
    ) -> Self {
        Self::Request {
            source_id,
            url: url.into(),
            attempts,
            error,
        }
    }

    /// Creates a `Parse` error.
    #[must_use]
    pub fn parse(source_id: SourceId, url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            source_id,
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidBaseUrl` error.
    #[must_use]
    pub fn invalid_base_url(source_id: SourceId, base_url: impl Into<String>) -> Self {
        Self::InvalidBaseUrl {
            source_id,
            base_url: base_url.into(),
        }
    }

    /// Returns true when the source rejected the query syntax.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
