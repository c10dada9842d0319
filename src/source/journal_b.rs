//! Journal B adapter: an HTML archive with a native date filter.
//!
//! `GET {base}/archive?subject=<stem>&from=YYYY-MM-DD&until=YYYY-MM-DD`
//! returns `<article class="listing-item" data-article-id=".."
//! data-published="YYYY-MM-DD">` blocks. A 400/422 answer means the archive
//! did not accept the date filter; that is a degraded, zero-result outcome.

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

static ARTICLE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)(<article\b[^>]*>)(.*?)</article>"));
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?is)(<h3\b[^>]*>)(.*?)</h3>")
});
static SUBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<li\b[^>]*>(.*?)</li>"));
static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)(<a\b[^>]*>)(.*?)</a>"));

/// Adapter for the journal B archive.
#[derive(Debug, Clone)]
pub struct JournalBSource {
    http: SourceHttp,
    base_url: String,
}

impl JournalBSource {
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
impl SourceAdapter for JournalBSource {
    #[instrument(skip(self, window), fields(source = "journal-b"))]
    async fn discover(
        &self,
        category: &str,
        window: &DateWindow,
        max_results: usize,
    ) -> Result<Discovery, SourceError> {
        let pattern = CategoryPattern::parse(category);
        let url = format!("{}/archive", self.base_url);

        let mut query = Vec::new();
        match &pattern {
            CategoryPattern::Any => {}
            CategoryPattern::Subcategories(stem) | CategoryPattern::Prefix(stem) => {
                query.push(("subject", stem.clone()));
            }
            CategoryPattern::Exact(exact) => query.push(("subject", exact.clone())),
        }
        if let Some(start) = window.start {
            query.push(("from", start.format("%Y-%m-%d").to_string()));
        }
        query.push(("until", window.end.format("%Y-%m-%d").to_string()));

        let body = match self.http.get_listing(SourceId::JournalB, &url, &query).await {
            Ok(body) => body,
            Err(SourceError::Rejected { reason, .. }) => {
                warn!(category, %reason, "journal B rejected the date filter");
                return Ok(Discovery::degraded(Vec::new(), reason));
            }
            Err(error) => return Err(error),
        };

        let page_url =
            Url::parse(&url).map_err(|_| SourceError::invalid_base_url(SourceId::JournalB, &url))?;
        let parsed = parse_archive(&body, &page_url);
        let total = parsed.len();

        // The archive's filter is trusted but not relied upon.
        let mut records: Vec<_> = parsed
            .into_iter()
            .filter(|record| {
                window.contains(record.published_at) && pattern.matches_any(&record.categories)
            })
            .collect();
        records.truncate(max_results);
        debug!(parsed = total, kept = records.len(), "journal B archive parsed");

        Ok(Discovery::complete(records))
    }
}

fn parse_archive(body: &str, page_url: &Url) -> Vec<PaperRecord> {
    ARTICLE_RE
        .captures_iter(body)
        .filter_map(|caps| {
            let open_tag = caps.get(1)?.as_str();
            if !has_class(open_tag, "listing-item") {
                return None;
            }
            let record = parse_article(open_tag, caps.get(2)?.as_str(), page_url);
            if record.is_none() {
                debug!(tag = open_tag, "skipping incomplete journal B listing item");
            }
            record
        })
        .collect()
}

fn parse_article(open_tag: &str, inner: &str, page_url: &Url) -> Option<PaperRecord> {
    let native_id = html_attr(open_tag, "data-article-id").filter(|id| !id.trim().is_empty())?;
    let published_at = html_attr(open_tag, "data-published")
        .as_deref()
        .and_then(parse_leading_date)?;

    let title = HEADING_RE.captures_iter(inner).find_map(|caps| {
        if !has_class(caps.get(1)?.as_str(), "title") {
            return None;
        }
        caps.get(2).map(|m| html_text(m.as_str()))
    })?;

    let subjects: Vec<String> = SUBJECT_RE
        .captures_iter(inner)
        .filter_map(|caps| caps.get(1).map(|m| html_text(m.as_str())))
        .filter(|subject| !subject.is_empty())
        .collect();

    let artifact_url = ANCHOR_RE.captures_iter(inner).find_map(|caps| {
        let tag = caps.get(1)?.as_str();
        if !has_class(tag, "download") {
            return None;
        }
        let href = html_attr(tag, "href")?.replace("&amp;", "&");
        absolutize_url(&href, page_url)
    })?;

    Some(PaperRecord::new(
        SourceId::JournalB,
        &native_id,
        &title,
        artifact_url,
        published_at,
        subjects,
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const ARCHIVE: &str = r#"<main>
<article class="listing-item" data-article-id="5521" data-published="2024-03-10">
  <h3 class="title"><a href="/article/5521">Optimal <i>hedging</i></a></h3>
  <ul class="subjects"><li>q-fin.CP</li><li>math.OC</li></ul>
  <a class="download" href="/download/5521?format=pdf">Download</a>
</article>
<article class="listing-item" data-article-id="5520">
  <h3 class="title">Missing date</h3>
  <a class="download" href="/download/5520">Download</a>
</article>
<article class="promo"><h3 class="title">Ad</h3></article>
</main>"#;

    #[test]
    fn test_parse_archive_extracts_complete_items() {
        let page = Url::parse("https://jb.example/archive").unwrap();
        let records = parse_archive(ARCHIVE, &page);

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, "journal-b:5521");
        assert_eq!(record.title, "Optimal hedging");
        assert_eq!(record.artifact_url, "https://jb.example/download/5521?format=pdf");
        assert_eq!(record.published_at, NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        assert_eq!(record.categories.len(), 2);
    }
}
