//! Per-source request pacing.
//!
//! This module provides the [`RateLimiter`] struct which enforces a minimum
//! delay between consecutive requests sharing the same key. Discovery and
//! download each own a limiter keyed by source name, so the two kinds of
//! traffic are paced independently and unrelated sources never wait for each
//! other.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use harvester_core::download::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_secs(1))
//!     .with_key_delay("journal-b", Duration::from_secs(3));
//!
//! // First request for a key proceeds immediately
//! limiter.acquire("api-search").await;
//!
//! // Second request for the same key waits for the delay
//! limiter.acquire("api-search").await;
//!
//! // Other keys are independent
//! limiter.acquire("journal-a").await;
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_DELAY_WARNING_THRESHOLD, MAX_RETRY_AFTER};

/// Keyed minimum-interval limiter.
///
/// Designed to be wrapped in `Arc` and shared across Tokio tasks. Per-key
/// state lives in a `DashMap`; the timing check-and-update is serialized by a
/// per-key `tokio::sync::Mutex`, so concurrent callers for one key queue up
/// while other keys proceed.
#[derive(Debug)]
pub struct RateLimiter {
    /// Delay applied to keys without an explicit override.
    default_delay: Duration,

    /// Per-key delay overrides.
    key_delays: HashMap<String, Duration>,

    /// Whether pacing is disabled (delay 0).
    disabled: bool,

    /// Per-key state. Arc lets us drop the `DashMap` shard lock before
    /// awaiting the inner mutex.
    keys: DashMap<String, Arc<KeyState>>,
}

#[derive(Debug)]
struct KeyState {
    /// `None` until the first request, which is never delayed.
    last_request: Mutex<Option<Instant>>,

    /// Cumulative delay applied to this key, in milliseconds.
    cumulative_delay_ms: AtomicU64,
}

impl KeyState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Creates a limiter applying `default_delay` between requests per key.
    #[must_use]
    #[instrument(skip_all, fields(delay_ms = default_delay.as_millis()))]
    pub fn new(default_delay: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            default_delay,
            key_delays: HashMap::new(),
            disabled: default_delay.is_zero(),
            keys: DashMap::new(),
        }
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            default_delay: Duration::ZERO,
            key_delays: HashMap::new(),
            disabled: true,
            keys: DashMap::new(),
        }
    }

    /// Overrides the delay for one key.
    #[must_use]
    pub fn with_key_delay(mut self, key: impl Into<String>, delay: Duration) -> Self {
        if !delay.is_zero() {
            self.disabled = false;
        }
        self.key_delays.insert(key.into(), delay);
        self
    }

    /// Returns whether pacing is disabled for every key.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the default delay between requests.
    #[must_use]
    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    /// Returns the effective delay for `key`.
    #[must_use]
    pub fn delay_for(&self, key: &str) -> Duration {
        self.key_delays
            .get(key)
            .copied()
            .unwrap_or(self.default_delay)
    }

    /// Waits until a request for `key` is allowed, then records it.
    ///
    /// The first request for a key proceeds immediately.
    #[instrument(skip(self))]
    pub async fn acquire(&self, key: &str) {
        if self.disabled {
            return;
        }
        let min_interval = self.delay_for(key);
        if min_interval.is_zero() {
            return;
        }

        let state = self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(KeyState::new()))
            .clone();

        let mut last_request_guard = state.last_request.lock().await;

        if let Some(last_request) = *last_request_guard {
            let elapsed = last_request.elapsed();
            if elapsed < min_interval {
                let delay = min_interval.saturating_sub(elapsed);
                let cumulative = state.add_cumulative_delay(delay);

                debug!(
                    key,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        key,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive rate limiting - consider reducing request volume to this source"
                    );
                }

                tokio::time::sleep(delay).await;
            }
        } else {
            debug!(key, "first request for key - no delay");
        }

        *last_request_guard = Some(Instant::now());
    }

    /// Records a server-mandated delay (from a Retry-After header).
    #[instrument(skip(self))]
    pub fn record_rate_limit(&self, key: &str, delay: Duration) {
        let state = self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(KeyState::new()));
        let cumulative = state.add_cumulative_delay(delay);

        debug!(
            key,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );

        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                key,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - source may be under heavy load"
            );
        }
    }

    /// Returns the cumulative delay applied to `key` so far.
    #[must_use]
    pub fn cumulative_delay(&self, key: &str) -> Duration {
        self.keys.get(key).map_or(Duration::ZERO, |state| {
            Duration::from_millis(state.cumulative_delay_ms.load(Ordering::SeqCst))
        })
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Accepts integer seconds or an HTTP-date (RFC 7231). Values above one hour
/// are capped; dates in the past yield zero.
///
/// ```
/// use std::time::Duration;
/// use harvester_core::download::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => Some(
            datetime
                .duration_since(std::time::SystemTime::now())
                .map_or(Duration::ZERO, |duration| duration.min(MAX_RETRY_AFTER)),
        ),
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_zero_delay_is_disabled() {
        assert!(RateLimiter::new(Duration::ZERO).is_disabled());
        assert!(RateLimiter::disabled().is_disabled());
        assert!(!RateLimiter::new(Duration::from_millis(500)).is_disabled());
    }

    #[test]
    fn test_key_delay_override() {
        let limiter = RateLimiter::new(Duration::from_secs(1))
            .with_key_delay("journal-b", Duration::from_secs(3));
        assert_eq!(limiter.delay_for("journal-b"), Duration::from_secs(3));
        assert_eq!(limiter.delay_for("api-search"), Duration::from_secs(1));
    }

    #[test]
    fn test_key_override_enables_disabled_limiter() {
        let limiter =
            RateLimiter::new(Duration::ZERO).with_key_delay("api-search", Duration::from_secs(3));
        assert!(!limiter.is_disabled());
        assert_eq!(limiter.delay_for("journal-a"), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_limiter_never_waits() {
        let limiter = RateLimiter::disabled();
        let start = Instant::now();
        limiter.acquire("api-search").await;
        limiter.acquire("api-search").await;
        limiter.acquire("api-search").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_is_spaced() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire("api-search").await;
        assert!(start.elapsed() < Duration::from_millis(10));

        limiter.acquire("api-search").await;
        assert!(start.elapsed() >= Duration::from_secs(1));

        limiter.acquire("api-search").await;
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(limiter.cumulative_delay("api-search"), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();
        limiter.acquire("api-search").await;
        limiter.acquire("journal-a").await;
        limiter.acquire("journal-b").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_on_one_key_queue_up() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(1)));
        let start = Instant::now();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.acquire("journal-a").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn test_record_rate_limit_tracks_cumulative() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        limiter.record_rate_limit("journal-a", Duration::from_secs(5));
        limiter.record_rate_limit("journal-a", Duration::from_secs(10));
        limiter.record_rate_limit("journal-b", Duration::from_secs(1));
        assert_eq!(limiter.cumulative_delay("journal-a"), Duration::from_secs(15));
        assert_eq!(limiter.cumulative_delay("journal-b"), Duration::from_secs(1));
    }

    #[test]
    fn test_parse_retry_after_seconds_and_cap() {
        assert_eq!(parse_retry_after("  120 "), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("7200"), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        assert_eq!(
            parse_retry_after("Wed, 01 Jan 2020 00:00:00 GMT"),
            Some(Duration::ZERO)
        );

        let future = std::time::SystemTime::now() + Duration::from_secs(60);
        let parsed = parse_retry_after(&httpdate::fmt_http_date(future)).unwrap();
        assert!(parsed >= Duration::from_secs(55) && parsed <= Duration::from_secs(61));
    }
}
