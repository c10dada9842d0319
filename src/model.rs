//! Shared domain types: source identifiers, paper records and date windows.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of days covered by the `last-month` date range.
pub const LAST_MONTH_DAYS: u64 = 30;

/// One external origin of paper listings.
///
/// Declaration order is the source iteration order used by discovery and the
/// ordering of per-source statistics.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum SourceId {
    /// Structured search API with an Atom feed (arXiv export API).
    ApiSearch,
    /// Paginated HTML index without a native date filter.
    JournalA,
    /// HTML archive with a native date filter.
    JournalB,
}

impl SourceId {
    /// All known sources in iteration order.
    pub const ALL: [SourceId; 3] = [Self::ApiSearch, Self::JournalA, Self::JournalB];

    /// Returns the stable wire name, also used as the id qualification prefix.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiSearch => "api-search",
            Self::JournalA => "journal-a",
            Self::JournalB => "journal-b",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Returned when a source name does not match any known source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown source '{name}'; expected one of: api-search, journal-a, journal-b")]
pub struct UnknownSourceError {
    /// The rejected name.
    pub name: String,
}

impl FromStr for SourceId {
    type Err = UnknownSourceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|source| source.as_str() == normalized)
            .ok_or_else(|| UnknownSourceError {
                name: value.to_string(),
            })
    }
}

/// Builds a source-qualified paper id (`"<source>:<native-id>"`).
#[must_use]
pub fn qualify_id(source: SourceId, native_id: &str) -> String {
    format!("{}:{}", source.as_str(), native_id.trim())
}

/// Discovered-paper metadata, normalized across sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRecord {
    /// Source-qualified id, globally unique across sources.
    pub id: String,
    /// Paper title with whitespace collapsed.
    pub title: String,
    /// Source that reported this record.
    pub source: SourceId,
    /// Absolute URL of the downloadable artifact.
    pub artifact_url: String,
    /// Publication date at the source's native precision.
    pub published_at: NaiveDate,
    /// Category labels reported by the source.
    pub categories: BTreeSet<String>,
}

impl PaperRecord {
    /// Creates a record, qualifying `native_id` with the source prefix.
    #[must_use]
    pub fn new(
        source: SourceId,
        native_id: &str,
        title: &str,
        artifact_url: impl Into<String>,
        published_at: NaiveDate,
        categories: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            id: qualify_id(source, native_id),
            title: collapse_whitespace(title),
            source,
            artifact_url: artifact_url.into(),
            published_at,
            categories: categories.into_iter().collect(),
        }
    }

    /// Returns the id without its source prefix.
    #[must_use]
    pub fn native_id(&self) -> &str {
        self.id
            .split_once(':')
            .map_or(self.id.as_str(), |(_, native)| native)
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Errors produced while parsing a date range argument.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DateRangeError {
    /// The value is not `last-month`, `all` or `START..END`.
    #[error(
        "malformed date range '{value}'\n  Suggestion: use 'last-month', 'all' or 'YYYY-MM-DD..YYYY-MM-DD'"
    )]
    Malformed {
        /// The rejected value.
        value: String,
    },
    /// The explicit range ends before it starts.
    #[error("date range start {start} is after end {end}")]
    Inverted {
        /// Parsed start date.
        start: NaiveDate,
        /// Parsed end date.
        end: NaiveDate,
    },
}

/// User-facing date range selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRange {
    /// The last [`LAST_MONTH_DAYS`] days up to today.
    LastMonth,
    /// No lower bound; upper bound is today.
    All,
    /// Inclusive explicit range.
    Explicit {
        /// First included day.
        start: NaiveDate,
        /// Last included day.
        end: NaiveDate,
    },
}

impl FromStr for DateRange {
    type Err = DateRangeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "last-month" => return Ok(Self::LastMonth),
            "all" => return Ok(Self::All),
            _ => {}
        }

        let malformed = || DateRangeError::Malformed {
            value: value.to_string(),
        };
        let (raw_start, raw_end) = trimmed
            .split_once("..")
            .or_else(|| trimmed.split_once(':'))
            .ok_or_else(malformed)?;
        let start = parse_day(raw_start).ok_or_else(malformed)?;
        let end = parse_day(raw_end).ok_or_else(malformed)?;
        if start > end {
            return Err(DateRangeError::Inverted { start, end });
        }
        Ok(Self::Explicit { start, end })
    }
}

fn parse_day(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

impl DateRange {
    /// Resolves the selector against `today` into a concrete window.
    #[must_use]
    pub fn resolve(self, today: NaiveDate) -> DateWindow {
        match self {
            Self::LastMonth => DateWindow {
                start: today.checked_sub_days(Days::new(LAST_MONTH_DAYS)),
                end: today,
            },
            Self::All => DateWindow {
                start: None,
                end: today,
            },
            Self::Explicit { start, end } => DateWindow {
                start: Some(start),
                end,
            },
        }
    }
}

/// Inclusive discovery window. `start == None` means unbounded below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    /// First included day, if bounded.
    pub start: Option<NaiveDate>,
    /// Last included day.
    pub end: NaiveDate,
}

impl DateWindow {
    /// Returns true when `date` falls inside the window.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|start| date >= start) && date <= self.end
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn day(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_source_id_round_trips_wire_names() {
        for source in SourceId::ALL {
            assert_eq!(source.as_str().parse::<SourceId>().unwrap(), source);
        }
        assert_eq!(" API-Search ".parse::<SourceId>().unwrap(), SourceId::ApiSearch);
    }

    #[test]
    fn test_source_id_rejects_unknown_name() {
        let err = "arxiv".parse::<SourceId>().unwrap_err();
        assert_eq!(err.name, "arxiv");
        assert!(err.to_string().contains("unknown source"));
    }

    #[test]
    fn test_paper_record_qualifies_id() {
        let record = PaperRecord::new(
            SourceId::JournalB,
            "1234",
            "  A   spaced\n title ",
            "https://example.com/1234.pdf",
            day("2024-03-01"),
            vec!["q-fin.CP".to_string()],
        );
        assert_eq!(record.id, "journal-b:1234");
        assert_eq!(record.native_id(), "1234");
        assert_eq!(record.title, "A spaced title");
    }

    #[test]
    fn test_same_native_id_differs_across_sources() {
        assert_ne!(
            qualify_id(SourceId::JournalA, "42"),
            qualify_id(SourceId::JournalB, "42")
        );
    }

    #[test]
    fn test_date_range_keywords() {
        assert_eq!("last-month".parse::<DateRange>().unwrap(), DateRange::LastMonth);
        assert_eq!("ALL".parse::<DateRange>().unwrap(), DateRange::All);
    }

    #[test]
    fn test_date_range_explicit_forms() {
        let expected = DateRange::Explicit {
            start: day("2024-01-01"),
            end: day("2024-01-31"),
        };
        assert_eq!("2024-01-01..2024-01-31".parse::<DateRange>().unwrap(), expected);
        assert_eq!("2024-01-01:2024-01-31".parse::<DateRange>().unwrap(), expected);
    }

    #[test]
    fn test_date_range_rejects_garbage_and_inverted() {
        assert!(matches!(
            "yesterday".parse::<DateRange>(),
            Err(DateRangeError::Malformed { .. })
        ));
        assert!(matches!(
            "2024-02-01..2024-01-01".parse::<DateRange>(),
            Err(DateRangeError::Inverted { .. })
        ));
    }

    #[test]
    fn test_last_month_window() {
        let window = DateRange::LastMonth.resolve(day("2024-03-31"));
        assert_eq!(window.start, Some(day("2024-03-01")));
        assert_eq!(window.end, day("2024-03-31"));
        assert!(window.contains(day("2024-03-15")));
        assert!(!window.contains(day("2024-02-29")));
    }

    #[test]
    fn test_all_window_has_no_lower_bound() {
        let window = DateRange::All.resolve(day("2024-03-31"));
        assert!(window.start.is_none());
        assert!(window.contains(day("1999-01-01")));
        assert!(!window.contains(day("2024-04-01")));
    }
}
