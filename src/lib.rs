//! Harvester Core Library
//!
//! Discovers newly published papers across several sources, downloads their
//! artifacts under per-source rate limits with resumable state, and checks the
//! health of every configured instance.
//!
//! # Architecture
//!
//! - [`model`] - source ids, paper records, date ranges
//! - [`source`] - per-source adapters behind one trait
//! - [`discovery`] - fan-out, merge, dedup and cap
//! - [`download`] - HTTP client, rate limiter, retry policy, fetcher
//! - [`state`] - crash-safe resume state
//! - [`orchestrator`] - one acquisition run end to end
//! - [`config`] - TOML configuration and instances
//! - [`health`] - health checks and aggregated reports

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod discovery;
pub mod download;
pub mod health;
pub mod model;
pub mod orchestrator;
pub mod source;
pub mod state;
mod user_agent;

// Re-export commonly used types
pub use config::{ConfigError, HarvesterConfig, InstanceConfigManager, LoadedConfig};
pub use download::{FetchOutcome, Fetcher, HttpClient, RateLimiter, RetryPolicy};
pub use health::{HealthReport, HealthStatus, SystemHealthChecker};
pub use model::{DateRange, PaperRecord, SourceId};
pub use orchestrator::{DownloadOrchestrator, DownloadRequest, HarvestError, RunStatistics};
pub use state::StateTracker;
