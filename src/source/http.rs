//! Paced, retried listing requests shared by every adapter.

use std::sync::Arc;

use tracing::{debug, instrument};

use super::SourceError;
use crate::download::{DownloadError, HttpClient, RateLimiter, RetryPolicy, run_with_retry};
use crate::model::SourceId;

/// HTTP statuses that mean "your query syntax was not accepted".
const REJECTED_QUERY_STATUSES: [u16; 2] = [400, 422];

/// Listing transport for source adapters.
///
/// Clones share the client pool and the discovery [`RateLimiter`], so pacing
/// holds across every adapter call for one source within a run.
#[derive(Debug, Clone)]
pub struct SourceHttp {
    client: HttpClient,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl SourceHttp {
    /// Creates a listing transport.
    #[must_use]
    pub fn new(client: HttpClient, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            client,
            limiter,
            policy,
        }
    }

    /// Fetches one listing page for `source`.
    ///
    /// # Errors
    ///
    /// [`SourceError::Rejected`] for HTTP 400/422 (never retried), otherwise
    /// [`SourceError::Request`] once retries are exhausted.
    #[instrument(skip(self, query), fields(source = %source, url = %url))]
    pub async fn get_listing(
        &self,
        source: SourceId,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<String, SourceError> {
        let result = run_with_retry(&self.policy, &self.limiter, source.as_str(), || {
            self.client.get_text(url, query)
        })
        .await;

        match result {
            Ok((body, attempts)) => {
                debug!(attempts, bytes = body.len(), "listing page received");
                Ok(body)
            }
            Err((DownloadError::HttpStatus { status, .. }, _))
                if REJECTED_QUERY_STATUSES.contains(&status) =>
            {
                Err(SourceError::rejected(
                    source,
                    url,
                    format!("HTTP {status}"),
                ))
            }
            Err((error, attempts)) => Err(SourceError::request(source, url, attempts, error)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http() -> SourceHttp {
        SourceHttp::new(
            HttpClient::new().unwrap(),
            Arc::new(RateLimiter::disabled()),
            RetryPolicy::immediate(3),
        )
    }

    #[tokio::test]
    async fn test_bad_request_is_rejected_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let error = http()
            .get_listing(SourceId::JournalB, &server.uri(), &[])
            .await
            .unwrap_err();
        assert!(error.is_rejected());
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let error = http()
            .get_listing(SourceId::JournalA, &server.uri(), &[])
            .await
            .unwrap_err();
        assert!(matches!(error, SourceError::Request { attempts: 3, .. }));
    }
}
