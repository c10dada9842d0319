//! Download orchestrator: validate, discover, fetch, finalize.
//!
//! A run moves through `Init → Discover → (dry run ? stop : Fetch) → Finalize`.
//! Configuration problems abort in `Init`, before any network call. After that
//! nothing is fatal: failed categories, failed fetches and state write errors
//! all end up in [`RunStatistics`].
//!
//! Fetching is bounded by a semaphore. Every completed fetch updates the resume
//! state under one mutex; the state file is checkpointed every
//! `checkpoint_every` fetches and once more in `Finalize`. Setting the
//! [interrupt flag](DownloadOrchestrator::interrupt_handle) stops new fetches
//! from being started; in-flight fetches finish and are recorded.

mod error;
mod manifest;
mod stats;

pub use error::HarvestError;
pub use manifest::{MANIFEST_FILE_NAME, ManifestEntry, manifest_path};
pub use stats::{ProgressSnapshot, RunProgress, RunStatistics, SourceStats};

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::discovery::{CategoryOutcome, discover_all};
use crate::download::{FetchOutcome, Fetcher, HttpClient, RateLimiter, RetryPolicy};
use crate::model::{DateRange, DateWindow, PaperRecord, SourceId};
use crate::source::{SourceHttp, SourceRegistry};
use crate::state::{PaperStatus, StateSnapshot, StateTracker};

/// One acquisition run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Source wire names, in iteration order.
    pub sources: Vec<String>,
    /// Category selectors; `None` uses the configured defaults.
    pub categories: Option<Vec<String>>,
    /// `last-month`, `all` or `YYYY-MM-DD..YYYY-MM-DD`.
    pub date_range: String,
    /// Cap on the total number of discovered records.
    pub max_papers: Option<usize>,
    /// Discover only; touch no files.
    pub dry_run: bool,
    /// Skip ids the state file marks as downloaded.
    pub resume: bool,
}

impl Default for DownloadRequest {
    fn default() -> Self {
        Self {
            sources: SourceId::ALL.iter().map(ToString::to_string).collect(),
            categories: None,
            date_range: "last-month".to_string(),
            max_papers: None,
            dry_run: false,
            resume: true,
        }
    }
}

/// Run phases, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Discover,
    Fetch,
    Finalize,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Discover => "discover",
            Self::Fetch => "fetch",
            Self::Finalize => "finalize",
        }
    }
}

fn enter(phase: Phase) {
    info!(phase = phase.as_str(), "entering phase");
}

/// Validated form of a [`DownloadRequest`].
struct RunPlan {
    sources: Vec<SourceId>,
    categories: Vec<String>,
    window: DateWindow,
    max_papers: Option<usize>,
    dry_run: bool,
    resume: bool,
}

/// Mutable per-run state shared by fetch tasks.
struct Ledger {
    tracker: StateTracker,
    completed: usize,
    warnings: Vec<String>,
}

/// Runs acquisition for one output directory.
///
/// Built once per process from [`PipelineConfig`]; rate limiters live as long
/// as the orchestrator, so back-to-back runs keep their pacing.
#[derive(Debug)]
pub struct DownloadOrchestrator {
    pipeline: PipelineConfig,
    client: HttpClient,
    discovery_limiter: Arc<RateLimiter>,
    download_limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    registry: Option<SourceRegistry>,
    interrupted: Arc<AtomicBool>,
    progress: Arc<RunProgress>,
}

impl DownloadOrchestrator {
    /// Creates an orchestrator from pipeline settings.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Client`] if the HTTP client cannot be built.
    pub fn from_config(pipeline: &PipelineConfig) -> Result<Self, HarvestError> {
        let client = HttpClient::with_timeouts(pipeline.connect_timeout(), pipeline.read_timeout())
            .map_err(|source| HarvestError::Client { source })?;
        Ok(Self {
            pipeline: pipeline.clone(),
            client,
            discovery_limiter: Arc::new(pipeline.discovery_rate_limiter()),
            download_limiter: Arc::new(pipeline.download_rate_limiter()),
            policy: pipeline.retry_policy(),
            registry: None,
            interrupted: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(RunProgress::default()),
        })
    }

    /// Replaces the retry policy for discovery and fetch.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Uses `registry` instead of the built-in adapters.
    #[must_use]
    pub fn with_registry(mut self, registry: SourceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Flag that stops new fetches when set (wired to Ctrl-C by the CLI).
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Live fetch counters.
    #[must_use]
    pub fn progress(&self) -> Arc<RunProgress> {
        Arc::clone(&self.progress)
    }

    /// Output directory artifacts and state are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.pipeline.output_dir
    }

    fn registry(&self) -> SourceRegistry {
        self.registry.clone().unwrap_or_else(|| {
            let http = SourceHttp::new(
                self.client.clone(),
                Arc::clone(&self.discovery_limiter),
                self.policy.clone(),
            );
            SourceRegistry::with_endpoints(&http, &self.pipeline.endpoints())
        })
    }

    /// Runs one acquisition.
    ///
    /// # Errors
    ///
    /// Only configuration problems are errors: an unknown source, an empty
    /// source or category list, a malformed date range, `max_papers == 0`, or
    /// an output directory that cannot be used. They are reported before any
    /// network call.
    #[instrument(skip_all, fields(dry_run = request.dry_run, resume = request.resume, date_range = %request.date_range))]
    pub async fn download_papers(
        &self,
        request: &DownloadRequest,
    ) -> Result<RunStatistics, HarvestError> {
        let started = Instant::now();

        enter(Phase::Init);
        let plan = self.plan(request)?;
        self.prepare_output_dir(plan.dry_run)?;
        debug!(
            sources = ?plan.sources,
            categories = ?plan.categories,
            window_start = ?plan.window.start,
            window_end = %plan.window.end,
            "run planned"
        );

        enter(Phase::Discover);
        let registry = self.registry();
        let report = discover_all(
            &registry,
            &plan.sources,
            &plan.categories,
            &plan.window,
            self.pipeline.max_results_per_category,
            plan.max_papers,
        )
        .await;

        let mut stats = RunStatistics {
            dry_run: plan.dry_run,
            total_discovered: report.records.len(),
            ..RunStatistics::default()
        };
        for &source in &plan.sources {
            stats.source_mut(source);
        }
        for record in &report.records {
            stats.source_mut(record.source).discovered += 1;
        }
        for category in &report.categories {
            match &category.outcome {
                CategoryOutcome::Failed { .. } => stats.failed_categories.push(category.clone()),
                CategoryOutcome::Degraded { reason, .. } => stats.warnings.push(format!(
                    "{} {}: {reason}",
                    category.source, category.category
                )),
                CategoryOutcome::Completed { .. } => {}
            }
        }

        if plan.dry_run {
            info!(
                discovered = stats.total_discovered,
                "dry run: stopping after discovery"
            );
            stats.duration = started.elapsed();
            return Ok(stats);
        }

        enter(Phase::Fetch);
        let tracker = StateTracker::load(&self.pipeline.output_dir, plan.resume);
        let ledger = self.fetch_all(report.records, tracker, &mut stats).await;

        enter(Phase::Finalize);
        {
            let mut ledger = ledger.lock().await;
            let snapshot = ledger.tracker.snapshot();
            if let Err(error) = write_snapshot(snapshot).await {
                warn!(error = %error, "failed to persist state");
                ledger.warnings.push(format!("state not saved: {error}"));
            }
            stats.warnings.append(&mut ledger.warnings);
        }
        stats.duration = started.elapsed();

        info!(
            discovered = stats.total_discovered,
            downloaded = stats.total_downloaded,
            failed = stats.total_failed,
            skipped = stats.total_skipped,
            interrupted = stats.interrupted,
            duration_ms = stats.duration.as_millis(),
            "run finished"
        );
        Ok(stats)
    }

    fn plan(&self, request: &DownloadRequest) -> Result<RunPlan, HarvestError> {
        if request.sources.is_empty() {
            return Err(HarvestError::NoSources);
        }
        let mut sources: Vec<SourceId> = Vec::with_capacity(request.sources.len());
        for name in &request.sources {
            let source: SourceId = name.parse().map_err(|_| HarvestError::UnknownSource {
                name: name.clone(),
            })?;
            if !sources.contains(&source) {
                sources.push(source);
            }
        }

        let categories = request
            .categories
            .clone()
            .unwrap_or_else(|| self.pipeline.categories.clone());
        if categories.is_empty() {
            return Err(HarvestError::NoCategories);
        }

        let range: DateRange = request.date_range.parse()?;
        let window = range.resolve(chrono::Local::now().date_naive());

        if request.max_papers == Some(0) {
            return Err(HarvestError::ZeroMaxPapers);
        }

        Ok(RunPlan {
            sources,
            categories,
            window,
            max_papers: request.max_papers,
            dry_run: request.dry_run,
            resume: request.resume,
        })
    }

    /// Creates the output directory for real runs; dry runs only check it.
    fn prepare_output_dir(&self, dry_run: bool) -> Result<(), HarvestError> {
        let dir = &self.pipeline.output_dir;
        match fs::metadata(dir) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(HarvestError::output_dir(dir, "not a directory")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if dry_run {
                    return Ok(());
                }
                fs::create_dir_all(dir).map_err(|e| HarvestError::output_dir(dir, e))?;
                info!(dir = %dir.display(), "created output directory");
                Ok(())
            }
            Err(e) => Err(HarvestError::output_dir(dir, e)),
        }
    }

    async fn fetch_all(
        &self,
        records: Vec<PaperRecord>,
        mut tracker: StateTracker,
        stats: &mut RunStatistics,
    ) -> Arc<Mutex<Ledger>> {
        for record in &records {
            tracker.mark(&record.id, PaperStatus::Discovered);
        }

        let (done, pending): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|record| tracker.is_done(&record.id));
        self.progress.reset(done.len() + pending.len());
        for record in &done {
            debug!(id = %record.id, "already downloaded, skipping");
            stats.total_skipped += 1;
            stats.source_mut(record.source).skipped += 1;
            self.progress.record_skipped();
        }

        let fetcher = Arc::new(Fetcher::new(
            self.client.clone(),
            Arc::clone(&self.download_limiter),
            self.policy.clone(),
            self.pipeline.output_dir.clone(),
        ));
        let ledger = Arc::new(Mutex::new(Ledger {
            tracker,
            completed: 0,
            warnings: Vec::new(),
        }));
        let semaphore = Arc::new(Semaphore::new(self.pipeline.concurrency.max(1)));
        let checkpoint_every = self.pipeline.checkpoint_every.max(1);

        let mut handles = Vec::with_capacity(pending.len());
        for record in pending {
            if self.interrupted.load(Ordering::SeqCst) {
                stats.interrupted = true;
                break;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            // A signal may arrive while waiting for a permit.
            if self.interrupted.load(Ordering::SeqCst) {
                stats.interrupted = true;
                break;
            }

            let fetcher = Arc::clone(&fetcher);
            let ledger = Arc::clone(&ledger);
            let progress = Arc::clone(&self.progress);
            let source = record.source;
            let id = record.id.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let outcome = fetcher.fetch(&record).await;
                record_outcome(&ledger, &record, &outcome, fetcher.output_dir(), checkpoint_every)
                    .await;
                if outcome.success && !outcome.already_present {
                    progress.record_downloaded();
                } else if outcome.success {
                    progress.record_skipped();
                } else {
                    progress.record_failed();
                }
                outcome
            });
            handles.push((source, id, handle));
        }

        debug!(task_count = handles.len(), "waiting for fetches to complete");
        for (source, id, handle) in handles {
            match handle.await {
                Ok(outcome) => tally(stats, source, &outcome),
                Err(e) => {
                    warn!(id = %id, error = %e, "fetch task panicked");
                    ledger
                        .lock()
                        .await
                        .tracker
                        .mark_failed(&id, "fetch task panicked", 0);
                    self.progress.record_failed();
                    stats.total_failed += 1;
                    stats.source_mut(source).failed += 1;
                }
            }
        }

        if stats.interrupted {
            warn!(
                downloaded = stats.total_downloaded,
                discovered = stats.total_discovered,
                "interrupted; run again to resume"
            );
        }

        ledger
    }
}

async fn record_outcome(
    ledger: &Mutex<Ledger>,
    record: &PaperRecord,
    outcome: &FetchOutcome,
    output_dir: &Path,
    checkpoint_every: usize,
) {
    let mut ledger = ledger.lock().await;
    if outcome.success {
        let bytes = (!outcome.already_present).then_some(outcome.bytes_written);
        ledger
            .tracker
            .mark_downloaded(&record.id, bytes, outcome.attempts);
        if !outcome.already_present {
            let entry = ManifestEntry::new(record, outcome);
            if let Err(error) = manifest::append(output_dir, &entry) {
                warn!(id = %record.id, error = %error, "failed to append manifest entry");
                ledger
                    .warnings
                    .push(format!("manifest entry for {} not written: {error}", record.id));
            }
        }
    } else {
        let message = outcome.error.as_deref().unwrap_or("unknown error");
        ledger
            .tracker
            .mark_failed(&record.id, message, outcome.attempts);
    }

    ledger.completed += 1;
    if ledger.completed % checkpoint_every == 0 {
        // Held across the write so checkpoints land in completion order.
        let snapshot = ledger.tracker.snapshot();
        if let Err(error) = write_snapshot(snapshot).await {
            warn!(error = %error, completed = ledger.completed, "state checkpoint failed");
            ledger.warnings.push(format!("state checkpoint failed: {error}"));
        } else {
            debug!(completed = ledger.completed, "state checkpointed");
        }
    }
}

/// Writes a state snapshot on the blocking pool; the write waits on a file lock and fsync.
async fn write_snapshot(snapshot: StateSnapshot) -> Result<(), String> {
    match tokio::task::spawn_blocking(move || snapshot.write()).await {
        Ok(result) => result.map_err(|error| error.to_string()),
        Err(error) => Err(format!("state writer task failed: {error}")),
    }
}

fn tally(stats: &mut RunStatistics, source: SourceId, outcome: &FetchOutcome) {
    let per_source = stats.source_mut(source);
    if !outcome.success {
        per_source.failed += 1;
        stats.total_failed += 1;
    } else if outcome.already_present {
        per_source.skipped += 1;
        stats.total_skipped += 1;
    } else {
        per_source.downloaded += 1;
        stats.total_downloaded += 1;
        stats.bytes_written += outcome.bytes_written;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::DownloadError;
    use crate::source::{Discovery, SourceAdapter, SourceError};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    struct Listing(Vec<PaperRecord>);

    #[async_trait]
    impl SourceAdapter for Listing {
        async fn discover(
            &self,
            category: &str,
            _window: &DateWindow,
            max_results: usize,
        ) -> Result<Discovery, SourceError> {
            if category == "down" {
                return Err(SourceError::request(
                    SourceId::JournalA,
                    "http://mock",
                    3,
                    DownloadError::http_status("http://mock", 503),
                ));
            }
            Ok(Discovery::complete(
                self.0.iter().take(max_results).cloned().collect(),
            ))
        }
    }

    fn record(id: &str) -> PaperRecord {
        PaperRecord::new(
            SourceId::JournalA,
            id,
            "t",
            // Port 9 (discard) refuses connections quickly.
            format!("http://127.0.0.1:9/{id}.pdf"),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            vec!["x".to_string()],
        )
    }

    fn orchestrator(dir: &Path, records: Vec<PaperRecord>) -> DownloadOrchestrator {
        let pipeline = PipelineConfig {
            output_dir: dir.to_path_buf(),
            discovery_delay_ms: 0,
            download_delay_ms: 0,
            ..PipelineConfig::default()
        };
        let mut registry = SourceRegistry::new();
        registry.register(SourceId::JournalA, Arc::new(Listing(records)));
        DownloadOrchestrator::from_config(&pipeline)
            .unwrap()
            .with_retry_policy(RetryPolicy::immediate(1))
            .with_registry(registry)
    }

    fn request(sources: &[&str]) -> DownloadRequest {
        DownloadRequest {
            sources: sources.iter().map(ToString::to_string).collect(),
            categories: Some(vec!["x".to_string()]),
            date_range: "all".to_string(),
            ..DownloadRequest::default()
        }
    }

    // ==================== Init Tests ====================

    #[tokio::test]
    async fn test_unknown_source_is_fatal() {
        let dir = TempDir::new().unwrap();
        let result = orchestrator(dir.path(), vec![])
            .download_papers(&request(&["journal-a", "nope"]))
            .await;
        assert!(matches!(result, Err(HarvestError::UnknownSource { name }) if name == "nope"));
    }

    #[tokio::test]
    async fn test_malformed_date_range_and_zero_cap_are_fatal() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(dir.path(), vec![]);

        let mut bad_range = request(&["journal-a"]);
        bad_range.date_range = "yesterday".to_string();
        assert!(matches!(
            orchestrator.download_papers(&bad_range).await,
            Err(HarvestError::DateRange { .. })
        ));

        let mut zero = request(&["journal-a"]);
        zero.max_papers = Some(0);
        assert!(matches!(
            orchestrator.download_papers(&zero).await,
            Err(HarvestError::ZeroMaxPapers)
        ));
    }

    #[tokio::test]
    async fn test_output_dir_that_is_a_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        let result = orchestrator(&file, vec![])
            .download_papers(&request(&["journal-a"]))
            .await;
        assert!(matches!(result, Err(HarvestError::OutputDir { .. })));
    }

    // ==================== Run Tests ====================

    #[tokio::test]
    async fn test_dry_run_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out");
        let mut dry = request(&["journal-a"]);
        dry.dry_run = true;

        let stats = orchestrator(&output, vec![record("1"), record("2")])
            .download_papers(&dry)
            .await
            .unwrap();

        assert!(stats.dry_run);
        assert_eq!(stats.total_discovered, 2);
        assert_eq!(stats.total_downloaded, 0);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_existing_artifacts_are_skipped_and_failures_recorded() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("journal-a_1.pdf"), b"%PDF").unwrap();

        let stats = orchestrator(dir.path(), vec![record("1"), record("2")])
            .download_papers(&request(&["journal-a"]))
            .await
            .unwrap();

        assert_eq!(stats.total_skipped, 1);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.per_source[&SourceId::JournalA].failed, 1);

        let tracker = StateTracker::load(dir.path(), true);
        assert!(tracker.is_done("journal-a:1"));
        assert_eq!(tracker.status("journal-a:2"), Some(PaperStatus::Failed));
    }

    #[tokio::test]
    async fn test_failed_category_is_kept_apart_from_fetch_counters() {
        let dir = TempDir::new().unwrap();
        let mut req = request(&["journal-a"]);
        req.categories = Some(vec!["down".to_string()]);

        let stats = orchestrator(dir.path(), vec![record("1")])
            .download_papers(&req)
            .await
            .unwrap();

        assert_eq!(stats.failed_categories.len(), 1);
        assert_eq!(stats.per_source[&SourceId::JournalA].failed, 0);
        assert_eq!(stats.total_failed, 0);
        assert!(!stats.is_clean());
    }

    #[tokio::test]
    async fn test_interrupt_before_fetch_starts_nothing() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(dir.path(), vec![record("1"), record("2")]);
        orchestrator.interrupt_handle().store(true, Ordering::SeqCst);

        let stats = orchestrator
            .download_papers(&request(&["journal-a"]))
            .await
            .unwrap();

        assert!(stats.interrupted);
        assert_eq!(stats.total_failed + stats.total_downloaded, 0);
        // Discovered ids are still persisted for the next run.
        let tracker = StateTracker::load(dir.path(), true);
        assert_eq!(tracker.status("journal-a:1"), Some(PaperStatus::Discovered));
    }
}
