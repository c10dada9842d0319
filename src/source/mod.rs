//! Source adapters: turn one source's listings into normalized [`PaperRecord`]s.
//!
//! # Architecture
//!
//! - [`SourceAdapter`] - async trait with a single `discover` operation
//! - [`SourceRegistry`] - `SourceId` → adapter lookup used by discovery
//! - [`ArxivSource`] - structured search API (Atom feed)
//! - [`JournalASource`] - paginated HTML index, local date filtering
//! - [`JournalBSource`] - HTML archive with a native date filter
//! - [`SourceHttp`] - paced, retried listing transport shared by the adapters
//!
//! Adapters own wildcard expansion, local truncation to `max_results` and the
//! "rejected filter" degradation path. They share no mutable state except the
//! discovery rate limiter inside [`SourceHttp`], which is keyed per source.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use harvester_core::download::{HttpClient, RateLimiter, RetryPolicy};
//! use harvester_core::model::{DateRange, SourceId};
//! use harvester_core::source::{SourceEndpoints, SourceHttp, SourceRegistry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let http = SourceHttp::new(
//!     HttpClient::new()?,
//!     Arc::new(RateLimiter::new(std::time::Duration::from_secs(1))),
//!     RetryPolicy::default(),
//! );
//! let registry = SourceRegistry::with_endpoints(&http, &SourceEndpoints::default());
//! let window = DateRange::LastMonth.resolve(chrono::Local::now().date_naive());
//! if let Some(adapter) = registry.get(SourceId::ApiSearch) {
//!     let found = adapter.discover("q-fin.CP", &window, 5).await?;
//!     println!("{} records", found.records.len());
//! }
//! # Ok(())
//! # }
//! ```

mod arxiv;
mod category;
mod error;
mod http;
mod journal_a;
mod journal_b;
mod utils;

pub use arxiv::{ARXIV_API_BASE_URL, ArxivSource};
pub use category::CategoryPattern;
pub use error::SourceError;
pub use http::SourceHttp;
pub use journal_a::JournalASource;
pub use journal_b::JournalBSource;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{DateWindow, PaperRecord, SourceId};

/// Default base URL of the journal A index.
pub const JOURNAL_A_BASE_URL: &str = "https://journal-a.example.org";

/// Default base URL of the journal B archive.
pub const JOURNAL_B_BASE_URL: &str = "https://journal-b.example.org";

/// Records found for one category, plus an optional degradation note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Records in source order, at most `max_results` long.
    pub records: Vec<PaperRecord>,
    /// Set when the source rejected part of the query and results may be incomplete.
    pub degraded: Option<String>,
}

impl Discovery {
    /// A normal result.
    #[must_use]
    pub fn complete(records: Vec<PaperRecord>) -> Self {
        Self {
            records,
            degraded: None,
        }
    }

    /// A degraded result carrying whatever was collected before the rejection.
    #[must_use]
    pub fn degraded(records: Vec<PaperRecord>, reason: impl Into<String>) -> Self {
        Self {
            records,
            degraded: Some(reason.into()),
        }
    }
}

/// Lists one source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Discovers papers in `category` published within `window`.
    ///
    /// Never returns more than `max_results` records. A query the source
    /// refuses yields `Ok` with [`Discovery::degraded`] set.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the category could not be listed after
    /// retries, or the listing could not be parsed.
    async fn discover(
        &self,
        category: &str,
        window: &DateWindow,
        max_results: usize,
    ) -> Result<Discovery, SourceError>;
}

/// Base URLs for the built-in adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEndpoints {
    /// Search API base URL.
    pub api_search: String,
    /// Journal A base URL.
    pub journal_a: String,
    /// Journal B base URL.
    pub journal_b: String,
}

impl Default for SourceEndpoints {
    fn default() -> Self {
        Self {
            api_search: ARXIV_API_BASE_URL.to_string(),
            journal_a: JOURNAL_A_BASE_URL.to_string(),
            journal_b: JOURNAL_B_BASE_URL.to_string(),
        }
    }
}

impl SourceEndpoints {
    /// Returns the base URL configured for `source`.
    #[must_use]
    pub fn base_url(&self, source: SourceId) -> &str {
        match source {
            SourceId::ApiSearch => &self.api_search,
            SourceId::JournalA => &self.journal_a,
            SourceId::JournalB => &self.journal_b,
        }
    }

    /// Points every source at one base URL (mock servers in tests).
    #[must_use]
    pub fn all(base_url: &str) -> Self {
        Self {
            api_search: base_url.to_string(),
            journal_a: base_url.to_string(),
            journal_b: base_url.to_string(),
        }
    }
}

/// Maps each [`SourceId`] to its adapter.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: BTreeMap<SourceId, Arc<dyn SourceAdapter>>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the three built-in adapters over one shared transport.
    #[must_use]
    pub fn with_endpoints(http: &SourceHttp, endpoints: &SourceEndpoints) -> Self {
        let mut registry = Self::new();
        registry.register(
            SourceId::ApiSearch,
            Arc::new(ArxivSource::new(http.clone(), &endpoints.api_search)),
        );
        registry.register(
            SourceId::JournalA,
            Arc::new(JournalASource::new(http.clone(), &endpoints.journal_a)),
        );
        registry.register(
            SourceId::JournalB,
            Arc::new(JournalBSource::new(http.clone(), &endpoints.journal_b)),
        );
        registry
    }

    /// Registers (or replaces) the adapter for `source`.
    pub fn register(&mut self, source: SourceId, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(source, adapter);
    }

    /// Returns the adapter for `source`, if registered.
    #[must_use]
    pub fn get(&self, source: SourceId) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&source).cloned()
    }

    /// Registered sources in iteration order.
    #[must_use]
    pub fn sources(&self) -> Vec<SourceId> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::{HttpClient, RateLimiter, RetryPolicy};

    struct Empty;

    #[async_trait]
    impl SourceAdapter for Empty {
        async fn discover(
            &self,
            _category: &str,
            _window: &DateWindow,
            _max_results: usize,
        ) -> Result<Discovery, SourceError> {
            Ok(Discovery::default())
        }
    }

    #[test]
    fn test_registry_with_endpoints_registers_all_sources() {
        let http = SourceHttp::new(
            HttpClient::new().unwrap(),
            Arc::new(RateLimiter::disabled()),
            RetryPolicy::immediate(1),
        );
        let registry = SourceRegistry::with_endpoints(&http, &SourceEndpoints::default());
        assert_eq!(registry.sources(), SourceId::ALL.to_vec());
    }

    #[test]
    fn test_register_replaces_adapter() {
        let mut registry = SourceRegistry::new();
        assert!(registry.get(SourceId::JournalA).is_none());
        registry.register(SourceId::JournalA, Arc::new(Empty));
        registry.register(SourceId::JournalA, Arc::new(Empty));
        assert_eq!(registry.sources(), vec![SourceId::JournalA]);
    }

    #[test]
    fn test_endpoints_lookup() {
        let endpoints = SourceEndpoints::all("http://127.0.0.1:9");
        for source in SourceId::ALL {
            assert_eq!(endpoints.base_url(source), "http://127.0.0.1:9");
        }
        assert_eq!(
            SourceEndpoints::default().base_url(SourceId::ApiSearch),
            ARXIV_API_BASE_URL
        );
    }
}
