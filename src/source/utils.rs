//! Helpers shared by the HTML and feed parsers.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use url::Url;

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
});

/// Compiles a regex at static init; panics on invalid pattern.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Returns the value of attribute `name` inside an opening tag's source.
#[must_use]
pub(crate) fn html_attr(tag: &str, name: &str) -> Option<String> {
    ATTR_RE.captures_iter(tag).find_map(|caps| {
        let key = caps.get(1)?.as_str();
        if !key.eq_ignore_ascii_case(name) {
            return None;
        }
        caps.get(2)
            .or_else(|| caps.get(3))
            .map(|value| value.as_str().to_string())
    })
}

/// Returns true when the tag's `class` attribute lists `class`.
#[must_use]
pub(crate) fn has_class(tag: &str, class: &str) -> bool {
    html_attr(tag, "class").is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
}

/// Resolves a possibly relative link against the page it appeared on.
///
/// `//host/path` is treated as https.
#[must_use]
pub(crate) fn absolutize_url(value: &str, base_url: &Url) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.starts_with("http://") || value.starts_with("https://") {
        return Some(value.to_string());
    }
    if value.starts_with("//") {
        return Some(format!("https:{value}"));
    }
    base_url.join(value).ok().map(|url| url.to_string())
}

/// Parses the leading `YYYY-MM-DD` of a date or timestamp string.
#[must_use]
pub(crate) fn parse_leading_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let head = value.get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Decodes the handful of HTML entities listing pages actually use and strips tags.
#[must_use]
pub(crate) fn html_text(fragment: &str) -> String {
    let mut text = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for c in fragment.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }
    let decoded = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_absolutize_url_variants() {
        let base = Url::parse("https://journal.example/papers?page=2").unwrap();
        assert_eq!(
            absolutize_url("/files/a.pdf", &base).unwrap(),
            "https://journal.example/files/a.pdf"
        );
        assert_eq!(
            absolutize_url("b.pdf", &base).unwrap(),
            "https://journal.example/b.pdf"
        );
        assert_eq!(
            absolutize_url("//cdn.example/c.pdf", &base).unwrap(),
            "https://cdn.example/c.pdf"
        );
        assert_eq!(
            absolutize_url("http://other.example/d.pdf", &base).unwrap(),
            "http://other.example/d.pdf"
        );
        assert!(absolutize_url("  ", &base).is_none());
    }

    #[test]
    fn test_parse_leading_date() {
        assert_eq!(
            parse_leading_date("2024-01-05T10:00:00Z"),
            NaiveDate::from_ymd_opt(2024, 1, 5)
        );
        assert_eq!(parse_leading_date(" 2024-02-29 "), NaiveDate::from_ymd_opt(2024, 2, 29));
        assert!(parse_leading_date("05/01/2024").is_none());
        assert!(parse_leading_date("2024").is_none());
    }

    #[test]
    fn test_html_attr_and_class() {
        let tag = r#"<dl class="paper featured" id='ja-1' data-x="y">"#;
        assert_eq!(html_attr(tag, "id").unwrap(), "ja-1");
        assert_eq!(html_attr(tag, "DATA-X").unwrap(), "y");
        assert!(html_attr(tag, "href").is_none());
        assert!(has_class(tag, "paper"));
        assert!(has_class(tag, "featured"));
        assert!(!has_class(tag, "pap"));
    }

    #[test]
    fn test_html_text_strips_tags_and_entities() {
        assert_eq!(
            html_text("<em>Fast</em> &amp; <b>robust</b>\n  pricing"),
            "Fast & robust pricing"
        );
    }
}
