//! Fatal run errors. Everything else is folded into [`RunStatistics`](super::RunStatistics).

use std::path::PathBuf;

use thiserror::Error;

use crate::model::DateRangeError;

/// Errors that abort a run before discovery starts.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// A requested source name is not one of the built-in sources.
    #[error("unknown source '{name}'\n  Suggestion: use one of: api-search, journal-a, journal-b")]
    UnknownSource {
        /// Name as given.
        name: String,
    },

    /// The request named no sources.
    #[error("no sources requested")]
    NoSources,

    /// The request named an empty category list.
    #[error("no categories requested\n  Suggestion: omit categories to use the configured defaults")]
    NoCategories,

    /// `date_range` could not be parsed.
    #[error("invalid date range: {source}")]
    DateRange {
        /// Parse failure.
        #[from]
        source: DateRangeError,
    },

    /// `max_papers` was zero.
    #[error("max_papers must be at least 1")]
    ZeroMaxPapers,

    /// The output directory cannot be created or is not a directory.
    #[error("output directory {path} is unusable: {reason}")]
    OutputDir {
        /// Configured directory.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// Builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl HarvestError {
    pub(crate) fn output_dir(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::OutputDir {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
