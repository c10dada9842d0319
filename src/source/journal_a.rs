//! Journal A adapter: a paginated HTML index with no native date filter.
//!
//! Listing pages look like:
//!
//! ```html
//! <dl class="paper" id="ja-2024-017">
//!   <dt><a href="/papers/ja-2024-017">Title</a></dt>
//!   <dd>
//!     <span class="date">2024-03-02</span>
//!     <span class="tags">q-fin.CP, q-fin.PR</span>
//!     <a class="pdf" href="/files/ja-2024-017.pdf">PDF</a>
//!   </dd>
//! </dl>
//! <a rel="next" href="/papers?category=q-fin.CP&amp;page=2">Next</a>
//! ```
//!
//! The window is applied locally. The index is newest-first, so a page whose
//! entries all predate the window ends pagination.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument, warn};
use url::Url;

use super::category::CategoryPattern;
use super::http::SourceHttp;
use super::utils::{
    absolutize_url, compile_static_regex, has_class, html_attr, html_text, parse_leading_date,
};
use super::{Discovery, SourceAdapter, SourceError};
use crate::model::{DateWindow, PaperRecord, SourceId};

/// Maximum index pages followed per category.
const MAX_PAGES: usize = 20;

static BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)(<dl\b[^>]*>)(.*?)</dl>"));
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<dt\b[^>]*>(.*?)</dt>"));
static SPAN_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)(<span\b[^>]*>)(.*?)</span>"));
static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?is)<a\b[^>]*>"));

/// Adapter for the journal A paper index.
#[derive(Debug, Clone)]
pub struct JournalASource {
    http: SourceHttp,
    base_url: String,
}

impl JournalASource {
    /// Creates an adapter against `base_url`.
    #[must_use]
    pub fn new(http: SourceHttp, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for JournalASource {
    #[instrument(skip(self, window), fields(source = "journal-a"))]
    async fn discover(
        &self,
        category: &str,
        window: &DateWindow,
        max_results: usize,
    ) -> Result<Discovery, SourceError> {
        let pattern = CategoryPattern::parse(category);
        let mut records = Vec::new();

        let mut url = format!("{}/papers", self.base_url);
        let mut query = Vec::new();
        if !pattern.is_any() {
            query.push(("category", server_category(&pattern)));
        }
        query.push(("page", "1".to_string()));

        for page in 1..=MAX_PAGES {
            let body = match self.http.get_listing(SourceId::JournalA, &url, &query).await {
                Ok(body) => body,
                Err(SourceError::Rejected { reason, .. }) => {
                    warn!(category, %reason, "journal A rejected the category filter");
                    return Ok(Discovery::degraded(records, reason));
                }
                Err(error) => return Err(error),
            };

            let page_url = Url::parse(&url)
                .map_err(|_| SourceError::invalid_base_url(SourceId::JournalA, &url))?;
            let entries = parse_listing(&body, &page_url);
            let all_older = !entries.is_empty()
                && entries
                    .iter()
                    .all(|entry| window.start.is_some_and(|start| entry.published_at < start));

            let parsed = entries.len();
            records.extend(entries.into_iter().filter(|entry| {
                window.contains(entry.published_at) && pattern.matches_any(&entry.categories)
            }));
            debug!(page, parsed, kept = records.len(), "journal A page parsed");

            if records.len() >= max_results || all_older {
                break;
            }
            match next_page_url(&body, &page_url) {
                Some(next) => {
                    url = next;
                    query.clear();
                }
                None => break,
            }
        }

        records.truncate(max_results);
        Ok(Discovery::complete(records))
    }
}

/// The index filters on the stem; wildcard semantics are enforced locally.
fn server_category(pattern: &CategoryPattern) -> String {
    match pattern {
        CategoryPattern::Any => String::new(),
        CategoryPattern::Subcategories(stem) | CategoryPattern::Prefix(stem) => stem.clone(),
        CategoryPattern::Exact(exact) => exact.clone(),
    }
}

fn parse_listing(body: &str, page_url: &Url) -> Vec<PaperRecord> {
    BLOCK_RE
        .captures_iter(body)
        .filter_map(|caps| {
            let open_tag = caps.get(1)?.as_str();
            if !has_class(open_tag, "paper") {
                return None;
            }
            let inner = caps.get(2)?.as_str();
            let record = parse_entry(open_tag, inner, page_url);
            if record.is_none() {
                debug!(tag = open_tag, "skipping incomplete journal A entry");
            }
            record
        })
        .collect()
}

fn parse_entry(open_tag: &str, inner: &str, page_url: &Url) -> Option<PaperRecord> {
    let native_id = html_attr(open_tag, "id").filter(|id| !id.trim().is_empty())?;
    let title = TITLE_RE
        .captures(inner)
        .and_then(|caps| caps.get(1))
        .map(|m| html_text(m.as_str()))?;

    let mut published_at = None;
    let mut tags = Vec::new();
    for caps in SPAN_RE.captures_iter(inner) {
        let (Some(tag), Some(text)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if has_class(tag.as_str(), "date") {
            published_at = parse_leading_date(&html_text(text.as_str()));
        } else if has_class(tag.as_str(), "tags") {
            tags = html_text(text.as_str())
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(ToString::to_string)
                .collect();
        }
    }

    let artifact_url = ANCHOR_RE.find_iter(inner).find_map(|anchor| {
        let href = html_attr(anchor.as_str(), "href")?.replace("&amp;", "&");
        let path = href.split(['?', '#']).next().unwrap_or_default();
        let is_pdf = has_class(anchor.as_str(), "pdf")
            || path.to_ascii_lowercase().ends_with(".pdf");
        if is_pdf {
            absolutize_url(&href, page_url)
        } else {
            None
        }
    })?;

    Some(PaperRecord::new(
        SourceId::JournalA,
        &native_id,
        &title,
        artifact_url,
        published_at?,
        tags,
    ))
}

fn next_page_url(body: &str, page_url: &Url) -> Option<String> {
    ANCHOR_RE.find_iter(body).find_map(|anchor| {
        let rel = html_attr(anchor.as_str(), "rel")?;
        if !rel.split_whitespace().any(|value| value.eq_ignore_ascii_case("next")) {
            return None;
        }
        let href = html_attr(anchor.as_str(), "href")?.replace("&amp;", "&");
        absolutize_url(&href, page_url)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const PAGE: &str = r#"<html><body>
<dl class="paper" id="ja-2024-017">
  <dt><a href="/papers/ja-2024-017">Volatility &amp; Jumps</a></dt>
  <dd>
    <span class="date">2024-03-02</span>
    <span class="tags">q-fin.CP, q-fin.PR</span>
    <a class="pdf" href="/files/ja-2024-017.pdf">PDF</a>
  </dd>
</dl>
<dl class="paper" id="ja-2024-016">
  <dt>No link here</dt>
  <dd><span class="date">2024-03-01</span></dd>
</dl>
<dl class="glossary"><dt>Ignored</dt></dl>
<a href="/papers?category=q-fin&amp;page=2" rel="next">Next</a>
</body></html>"#;

    fn page_url() -> Url {
        Url::parse("https://ja.example/papers?category=q-fin&page=1").unwrap()
    }

    #[test]
    fn test_parse_listing_extracts_complete_entries() {
        let records = parse_listing(PAGE, &page_url());
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, "journal-a:ja-2024-017");
        assert_eq!(record.title, "Volatility & Jumps");
        assert_eq!(record.artifact_url, "https://ja.example/files/ja-2024-017.pdf");
        assert_eq!(record.published_at, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert!(record.categories.contains("q-fin.PR"));
    }

    #[test]
    fn test_next_page_url_decodes_entities() {
        assert_eq!(
            next_page_url(PAGE, &page_url()).unwrap(),
            "https://ja.example/papers?category=q-fin&page=2"
        );
        assert!(next_page_url("<a href=\"/x\">x</a>", &page_url()).is_none());
    }

    #[test]
    fn test_server_category_uses_stem() {
        assert_eq!(server_category(&CategoryPattern::parse("cs.*")), "cs");
        assert_eq!(server_category(&CategoryPattern::parse("q-fin.CP")), "q-fin.CP");
    }
}
