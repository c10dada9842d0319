//! Discovery coordinator: fan out to adapters, merge, dedup, cap.
//!
//! Sources run concurrently; categories within one source run sequentially so
//! the source's own pacing stays meaningful. The merged sequence keeps source
//! iteration order then per-source order. Deduplication is by qualified id
//! only: the same paper listed by two sources has two ids and both are kept.

use std::collections::HashSet;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::model::{DateWindow, PaperRecord, SourceId};
use crate::source::SourceRegistry;

/// Per-category result when no `max_papers` cap is given.
pub const DEFAULT_MAX_RESULTS_PER_CATEGORY: usize = 200;

/// How one (source, category) listing went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CategoryOutcome {
    /// Listed normally.
    Completed {
        /// Records returned by the adapter.
        count: usize,
    },
    /// The source refused part of the query; surfaced as a warning.
    Degraded {
        /// Records returned before or despite the rejection.
        count: usize,
        /// Why results may be incomplete.
        reason: String,
    },
    /// The category could not be listed this run.
    Failed {
        /// Final error message.
        reason: String,
    },
}

/// Outcome of one (source, category) listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    /// Source that was listed.
    pub source: SourceId,
    /// Category selector as requested.
    pub category: String,
    /// What happened.
    #[serde(flatten)]
    pub outcome: CategoryOutcome,
}

/// Merged discovery output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Deduplicated, capped records in merge order.
    pub records: Vec<PaperRecord>,
    /// One entry per (source, category) in iteration order.
    pub categories: Vec<CategoryReport>,
    /// Records dropped as duplicate ids.
    pub duplicates: usize,
}

impl DiscoveryReport {
    /// Category reports that ended degraded.
    pub fn degraded(&self) -> impl Iterator<Item = &CategoryReport> {
        self.categories
            .iter()
            .filter(|report| matches!(report.outcome, CategoryOutcome::Degraded { .. }))
    }

    /// Category reports that failed.
    pub fn failed(&self) -> impl Iterator<Item = &CategoryReport> {
        self.categories
            .iter()
            .filter(|report| matches!(report.outcome, CategoryOutcome::Failed { .. }))
    }
}

/// Runs discovery for every requested source and category.
///
/// Each adapter call is limited to `max_papers` when set, otherwise to
/// `per_category_limit`. Sources missing from `registry` are reported as
/// failed categories; callers validate source names up front, so this only
/// happens with custom registries.
#[instrument(skip(registry, categories, window), fields(sources = sources.len(), categories = categories.len()))]
pub async fn discover_all(
    registry: &SourceRegistry,
    sources: &[SourceId],
    categories: &[String],
    window: &DateWindow,
    per_category_limit: usize,
    max_papers: Option<usize>,
) -> DiscoveryReport {
    let per_category = max_papers.unwrap_or(per_category_limit).max(1);

    let per_source = join_all(sources.iter().map(|&source| async move {
        discover_source(registry, source, categories, window, per_category).await
    }))
    .await;

    let mut report = DiscoveryReport::default();
    let mut seen = HashSet::new();
    for (records, category_reports) in per_source {
        report.categories.extend(category_reports);
        for record in records {
            if seen.insert(record.id.clone()) {
                report.records.push(record);
            } else {
                report.duplicates += 1;
            }
        }
    }

    if let Some(cap) = max_papers {
        report.records.truncate(cap);
    }

    info!(
        discovered = report.records.len(),
        duplicates = report.duplicates,
        degraded = report.degraded().count(),
        failed = report.failed().count(),
        "discovery finished"
    );
    report
}

async fn discover_source(
    registry: &SourceRegistry,
    source: SourceId,
    categories: &[String],
    window: &DateWindow,
    max_results: usize,
) -> (Vec<PaperRecord>, Vec<CategoryReport>) {
    let mut records = Vec::new();
    let mut reports = Vec::with_capacity(categories.len());

    let Some(adapter) = registry.get(source) else {
        for category in categories {
            reports.push(CategoryReport {
                source,
                category: category.clone(),
                outcome: CategoryOutcome::Failed {
                    reason: format!("no adapter registered for {source}"),
                },
            });
        }
        return (records, reports);
    };

    for category in categories {
        let outcome = match adapter.discover(category, window, max_results).await {
            Ok(mut found) => {
                found.records.truncate(max_results);
                let count = found.records.len();
                records.extend(found.records);
                match found.degraded {
                    Some(reason) => {
                        warn!(%source, category, %reason, "category listing degraded");
                        CategoryOutcome::Degraded { count, reason }
                    }
                    None => CategoryOutcome::Completed { count },
                }
            }
            Err(error) => {
                warn!(%source, category, error = %error, "category listing failed");
                CategoryOutcome::Failed {
                    reason: error.to_string(),
                }
            }
        };
        reports.push(CategoryReport {
            source,
            category: category.clone(),
            outcome,
        });
    }

    (records, reports)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::DownloadError;
    use crate::source::{Discovery, SourceAdapter, SourceError};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Arc;

    /// Returns `ids` for every category; `"boom"` fails, `"rejected"` degrades.
    struct Fixed {
        source: SourceId,
        ids: Vec<&'static str>,
    }

    #[async_trait]
    impl SourceAdapter for Fixed {
        async fn discover(
            &self,
            category: &str,
            _window: &DateWindow,
            max_results: usize,
        ) -> Result<Discovery, SourceError> {
            match category {
                "boom" => Err(SourceError::request(
                    self.source,
                    "http://mock",
                    3,
                    DownloadError::http_status("http://mock", 503),
                )),
                "rejected" => Ok(Discovery::degraded(Vec::new(), "HTTP 400")),
                _ => Ok(Discovery::complete(
                    self.ids
                        .iter()
                        .take(max_results)
                        .map(|id| {
                            PaperRecord::new(
                                self.source,
                                id,
                                "t",
                                "http://mock/a.pdf",
                                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                                vec![category.to_string()],
                            )
                        })
                        .collect(),
                )),
            }
        }
    }

    fn registry() -> SourceRegistry {
        let mut registry = SourceRegistry::new();
        registry.register(
            SourceId::ApiSearch,
            Arc::new(Fixed {
                source: SourceId::ApiSearch,
                ids: vec!["1", "2", "3"],
            }),
        );
        registry.register(
            SourceId::JournalA,
            Arc::new(Fixed {
                source: SourceId::JournalA,
                ids: vec!["1", "9"],
            }),
        );
        registry
    }

    fn window() -> DateWindow {
        DateWindow {
            start: None,
            end: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        }
    }

    fn categories(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_merge_order_and_dedup_by_id() {
        let report = discover_all(
            &registry(),
            &[SourceId::ApiSearch, SourceId::JournalA],
            &categories(&["a", "b"]),
            &window(),
            DEFAULT_MAX_RESULTS_PER_CATEGORY,
            None,
        )
        .await;

        let ids: Vec<_> = report.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "api-search:1",
                "api-search:2",
                "api-search:3",
                "journal-a:1",
                "journal-a:9"
            ]
        );
        // Second category repeats every id of the first.
        assert_eq!(report.duplicates, 5);
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[tokio::test]
    async fn test_cap_applies_after_merge() {
        let report = discover_all(
            &registry(),
            &[SourceId::ApiSearch, SourceId::JournalA],
            &categories(&["a"]),
            &window(),
            DEFAULT_MAX_RESULTS_PER_CATEGORY,
            Some(4),
        )
        .await;
        assert_eq!(report.records.len(), 4);
        assert_eq!(report.records[3].id, "journal-a:1");
    }

    #[tokio::test]
    async fn test_failed_and_degraded_categories_do_not_abort() {
        let report = discover_all(
            &registry(),
            &[SourceId::ApiSearch],
            &categories(&["boom", "rejected", "ok"]),
            &window(),
            DEFAULT_MAX_RESULTS_PER_CATEGORY,
            None,
        )
        .await;

        assert_eq!(report.records.len(), 3);
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.degraded().count(), 1);
        assert!(matches!(
            report.categories[2].outcome,
            CategoryOutcome::Completed { count: 3 }
        ));
    }

    #[tokio::test]
    async fn test_missing_adapter_reports_failure() {
        let report = discover_all(
            &registry(),
            &[SourceId::JournalB],
            &categories(&["a"]),
            &window(),
            DEFAULT_MAX_RESULTS_PER_CATEGORY,
            None,
        )
        .await;
        assert!(report.records.is_empty());
        assert_eq!(report.failed().count(), 1);
    }
}
