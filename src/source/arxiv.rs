//! Search-API adapter backed by the arXiv export API (Atom feed).

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::category::CategoryPattern;
use super::http::SourceHttp;
use super::utils::{compile_static_regex, parse_leading_date};
use super::{Discovery, SourceAdapter, SourceError};
use crate::model::{DateWindow, PaperRecord, SourceId};

/// Production base URL of the export API.
pub const ARXIV_API_BASE_URL: &str = "https://export.arxiv.org";

/// Base for the fallback artifact link when an entry carries no pdf link.
const ARXIV_PDF_BASE_URL: &str = "https://arxiv.org/pdf";

/// Entries requested per page.
const PAGE_SIZE: usize = 100;

/// Upper bound on pages per category.
const MAX_PAGES: usize = 20;

static VERSION_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"v\d+$"));

/// Adapter for the arXiv query API.
#[derive(Debug, Clone)]
pub struct ArxivSource {
    http: SourceHttp,
    base_url: String,
}

impl ArxivSource {
    /// Creates an adapter against `base_url` (no trailing `/api/query`).
    #[must_use]
    pub fn new(http: SourceHttp, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn query_url(&self) -> String {
        format!("{}/api/query", self.base_url)
    }
}

#[async_trait]
impl SourceAdapter for ArxivSource {
    #[instrument(skip(self, window), fields(source = "api-search"))]
    async fn discover(
        &self,
        category: &str,
        window: &DateWindow,
        max_results: usize,
    ) -> Result<Discovery, SourceError> {
        let pattern = CategoryPattern::parse(category);
        let search_query = build_search_query(&pattern, window);
        let url = self.query_url();
        let mut records = Vec::new();
        let mut offset = 0_usize;

        for page in 0..MAX_PAGES {
            if records.len() >= max_results {
                break;
            }
            let page_size = PAGE_SIZE.min(max_results - records.len());
            let query = [
                ("search_query", search_query.clone()),
                ("start", offset.to_string()),
                ("max_results", page_size.to_string()),
                ("sortBy", "submittedDate".to_string()),
                ("sortOrder", "descending".to_string()),
            ];

            let body = match self.http.get_listing(SourceId::ApiSearch, &url, &query).await {
                Ok(body) => body,
                Err(SourceError::Rejected { reason, .. }) => {
                    warn!(category, %reason, "date or category filter rejected by search API");
                    return Ok(Discovery::degraded(records, reason));
                }
                Err(error) => return Err(error),
            };

            let feed = parse_feed(&body)
                .map_err(|reason| SourceError::parse(SourceId::ApiSearch, &url, reason))?;

            if let Some(message) = feed.error_message() {
                warn!(category, %message, "search API returned an error entry");
                return Ok(Discovery::degraded(records, message));
            }

            let fetched = feed.entries.len();
            offset += fetched;
            for entry in feed.entries {
                if let Some(record) = entry.into_record() {
                    if window.contains(record.published_at)
                        && pattern.matches_any(&record.categories)
                    {
                        records.push(record);
                    }
                }
            }
            debug!(page, fetched, kept = records.len(), "search API page parsed");

            if fetched < page_size {
                break;
            }
        }

        records.truncate(max_results);
        Ok(Discovery::complete(records))
    }
}

/// Builds the `search_query` parameter for one category selector.
fn build_search_query(pattern: &CategoryPattern, window: &DateWindow) -> String {
    let category_clause = match pattern {
        CategoryPattern::Any => None,
        other => Some(format!("cat:{other}")),
    };
    let date_clause = window.start.map(|start| {
        format!(
            "submittedDate:[{}0000 TO {}2359]",
            start.format("%Y%m%d"),
            window.end.format("%Y%m%d")
        )
    });

    match (category_clause, date_clause) {
        (Some(category), Some(date)) => format!("{category} AND {date}"),
        (Some(category), None) => category,
        (None, Some(date)) => date,
        (None, None) => "all:*".to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

impl Feed {
    /// The API reports malformed queries as a single entry whose id points
    /// at `/api/errors`.
    fn error_message(&self) -> Option<String> {
        self.entries
            .iter()
            .find(|entry| entry.id.contains("/api/errors"))
            .map(|entry| {
                entry
                    .summary
                    .as_deref()
                    .map(str::trim)
                    .filter(|summary| !summary.is_empty())
                    .unwrap_or("query rejected")
                    .to_string()
            })
    }
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    published: Option<String>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
    #[serde(rename = "category", default)]
    categories: Vec<Category>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@title", default)]
    title: Option<String>,
    #[serde(rename = "@type", default)]
    mime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Category {
    #[serde(rename = "@term")]
    term: String,
}

impl Entry {
    fn into_record(self) -> Option<PaperRecord> {
        let native_id = native_arxiv_id(&self.id)?;
        let published_at: NaiveDate = self.published.as_deref().and_then(parse_leading_date)?;
        let artifact_url = self
            .links
            .iter()
            .find(|link| {
                link.title.as_deref() == Some("pdf")
                    || link.mime.as_deref() == Some("application/pdf")
            })
            .map_or_else(
                || format!("{ARXIV_PDF_BASE_URL}/{native_id}"),
                |link| link.href.clone(),
            );

        Some(PaperRecord::new(
            SourceId::ApiSearch,
            &native_id,
            &self.title,
            artifact_url,
            published_at,
            self.categories.into_iter().map(|category| category.term),
        ))
    }
}

/// Extracts the version-less native id from an entry id URL.
///
/// `http://arxiv.org/abs/2401.00001v2` → `2401.00001`,
/// `http://arxiv.org/abs/hep-th/9901001v1` → `hep-th/9901001`.
fn native_arxiv_id(entry_id: &str) -> Option<String> {
    let (_, tail) = entry_id.trim().split_once("/abs/")?;
    let tail = tail.trim_end_matches('/');
    if tail.is_empty() {
        return None;
    }
    Some(VERSION_SUFFIX_RE.replace(tail, "").into_owned())
}

fn parse_feed(body: &str) -> Result<Feed, String> {
    quick_xml::de::from_str(body).map_err(|e| e.to_string())
}
