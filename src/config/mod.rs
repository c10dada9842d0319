//! Configuration: pipeline defaults, health settings and managed instances.
//!
//! Loaded once from TOML and shared read-only (`Arc`) afterwards.
//!
//! ```toml
//! [pipeline]
//! output_dir = "./papers"
//! concurrency = 4
//! categories = ["q-fin.CP", "cs.*"]
//!
//! [pipeline.sources.journal-b]
//! base_url = "https://archive.journal-b.org"
//! delay_ms = 3000
//!
//! [health]
//! probe_timeout_secs = 10
//! required_binaries = ["pdftotext"]
//!
//! [[instances]]
//! name = "finance"
//! storage_root = "/srv/papers/finance"
//! enabled_sources = ["api-search", "journal-b"]
//!
//! [instances.thresholds]
//! disk_warning_percent = 75.0
//! ```
//!
//! Path resolution when `--config` is not given:
//! 1. `$XDG_CONFIG_HOME/harvester/config.toml`
//! 2. `$HOME/.config/harvester/config.toml`
//!
//! A missing default file yields built-in defaults with a single `default`
//! instance rooted at the pipeline output directory. Unknown keys are errors.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::discovery::DEFAULT_MAX_RESULTS_PER_CATEGORY;
use crate::download::{DEFAULT_SOURCE_DELAY, RateLimiter, RetryPolicy};
use crate::model::SourceId;
use crate::source::SourceEndpoints;

/// Directory name under the config home.
const APP_DIR_NAME: &str = "harvester";

/// Config file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Name of the instance synthesized when none are configured.
pub const DEFAULT_INSTANCE_NAME: &str = "default";

/// Errors while loading or validating configuration. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("config file not found: {path}\n  Suggestion: check the --config path")]
    NotFound {
        /// Requested path.
        path: PathBuf,
    },

    /// The file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unknown keys.
    #[error("invalid config file {path}: {message}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A value is out of range or inconsistent.
    #[error("invalid config value for `{field}`: {message}")]
    Invalid {
        /// Dotted field path.
        field: String,
        /// What is wrong and what is expected.
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarvesterConfig {
    /// Acquisition defaults.
    pub pipeline: PipelineConfig,
    /// Health checker settings.
    pub health: HealthSettings,
    /// Managed instances.
    pub instances: Vec<InstanceConfig>,
}

/// Acquisition defaults; CLI flags override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Where artifacts, state and manifest are written.
    pub output_dir: PathBuf,
    /// Concurrent fetches (1..=32).
    pub concurrency: usize,
    /// Attempts per request, including the first (1..=10).
    pub max_attempts: u32,
    /// Minimum delay between listing requests to one source, ms.
    pub discovery_delay_ms: u64,
    /// Minimum delay between artifact requests to one source, ms.
    pub download_delay_ms: u64,
    /// HTTP connect timeout, seconds.
    pub connect_timeout_secs: u64,
    /// HTTP read timeout, seconds.
    pub read_timeout_secs: u64,
    /// Persist state after this many completed fetches.
    pub checkpoint_every: usize,
    /// Per-category result limit when no `max_papers` cap is given.
    pub max_results_per_category: usize,
    /// Categories used when the caller passes none.
    pub categories: Vec<String>,
    /// Per-source overrides.
    pub sources: SourcesConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./papers"),
            concurrency: 4,
            max_attempts: 3,
            discovery_delay_ms: millis(DEFAULT_SOURCE_DELAY),
            download_delay_ms: millis(DEFAULT_SOURCE_DELAY),
            connect_timeout_secs: 30,
            read_timeout_secs: 300,
            checkpoint_every: 10,
            max_results_per_category: DEFAULT_MAX_RESULTS_PER_CATEGORY,
            categories: vec!["*".to_string()],
            sources: SourcesConfig::default(),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Per-source settings keyed by wire name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct SourcesConfig {
    /// Search API settings.
    pub api_search: SourceSettings,
    /// Journal A settings.
    pub journal_a: SourceSettings,
    /// Journal B settings.
    pub journal_b: SourceSettings,
}

impl SourcesConfig {
    /// Settings for `source`.
    #[must_use]
    pub fn get(&self, source: SourceId) -> &SourceSettings {
        match source {
            SourceId::ApiSearch => &self.api_search,
            SourceId::JournalA => &self.journal_a,
            SourceId::JournalB => &self.journal_b,
        }
    }
}

/// Overrides for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSettings {
    /// Base URL replacing the built-in one.
    pub base_url: Option<String>,
    /// Minimum delay between requests, ms; applies to discovery and download.
    pub delay_ms: Option<u64>,
}

impl PipelineConfig {
    /// Base URLs with overrides applied.
    #[must_use]
    pub fn endpoints(&self) -> SourceEndpoints {
        let mut endpoints = SourceEndpoints::default();
        if let Some(url) = &self.sources.api_search.base_url {
            endpoints.api_search.clone_from(url);
        }
        if let Some(url) = &self.sources.journal_a.base_url {
            endpoints.journal_a.clone_from(url);
        }
        if let Some(url) = &self.sources.journal_b.base_url {
            endpoints.journal_b.clone_from(url);
        }
        endpoints
    }

    /// Limiter for listing requests.
    #[must_use]
    pub fn discovery_rate_limiter(&self) -> RateLimiter {
        self.rate_limiter(self.discovery_delay_ms)
    }

    /// Limiter for artifact requests, independent of discovery pacing.
    #[must_use]
    pub fn download_rate_limiter(&self) -> RateLimiter {
        self.rate_limiter(self.download_delay_ms)
    }

    fn rate_limiter(&self, default_ms: u64) -> RateLimiter {
        SourceId::ALL
            .into_iter()
            .fold(RateLimiter::new(Duration::from_millis(default_ms)), |limiter, source| {
                match self.sources.get(source).delay_ms {
                    Some(ms) => limiter.with_key_delay(source.as_str(), Duration::from_millis(ms)),
                    None => limiter,
                }
            })
    }

    /// Retry policy shared by discovery and fetch.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_attempts(self.max_attempts)
    }

    /// Connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=32).contains(&self.concurrency) {
            return Err(ConfigError::invalid(
                "pipeline.concurrency",
                format!("{}. Expected range: 1..=32", self.concurrency),
            ));
        }
        if !(1..=10).contains(&self.max_attempts) {
            return Err(ConfigError::invalid(
                "pipeline.max_attempts",
                format!("{}. Expected range: 1..=10", self.max_attempts),
            ));
        }
        validate_delay("pipeline.discovery_delay_ms", Some(self.discovery_delay_ms))?;
        validate_delay("pipeline.download_delay_ms", Some(self.download_delay_ms))?;
        validate_timeout_secs("pipeline.connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("pipeline.read_timeout_secs", self.read_timeout_secs)?;
        if self.checkpoint_every == 0 {
            return Err(ConfigError::invalid(
                "pipeline.checkpoint_every",
                "0. Expected at least 1",
            ));
        }
        if self.max_results_per_category == 0 {
            return Err(ConfigError::invalid(
                "pipeline.max_results_per_category",
                "0. Expected at least 1",
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("pipeline.output_dir", "must not be empty"));
        }
        for source in SourceId::ALL {
            let settings = self.sources.get(source);
            validate_delay(&format!("pipeline.sources.{source}.delay_ms"), settings.delay_ms)?;
            if let Some(url) = &settings.base_url {
                let valid = url::Url::parse(url)
                    .is_ok_and(|parsed| matches!(parsed.scheme(), "http" | "https"));
                if !valid {
                    return Err(ConfigError::invalid(
                        format!("pipeline.sources.{source}.base_url"),
                        format!("'{url}' is not an absolute http(s) URL"),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn validate_delay(field: &str, value: Option<u64>) -> Result<(), ConfigError> {
    match value {
        Some(ms) if ms > 60_000 => Err(ConfigError::invalid(
            field,
            format!("{ms}. Expected range: 0..=60000"),
        )),
        _ => Ok(()),
    }
}

fn validate_timeout_secs(field: &str, value: u64) -> Result<(), ConfigError> {
    if (1..=3600).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("{value}. Expected range: 1..=3600"),
        ))
    }
}

/// Health checker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthSettings {
    /// Timeout for service probes and DNS lookups, seconds.
    pub probe_timeout_secs: u64,
    /// Executables that must be on `PATH`.
    pub required_binaries: Vec<String>,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 10,
            required_binaries: Vec::new(),
        }
    }
}

impl HealthSettings {
    /// Probe timeout.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// One managed pipeline instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    /// Unique instance name.
    pub name: String,
    /// Output directory of this instance.
    pub storage_root: PathBuf,
    /// Source wire names; checked by the configuration health check.
    #[serde(default = "default_enabled_sources")]
    pub enabled_sources: Vec<String>,
    /// Health thresholds.
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Opaque credentials. Only presence is inspected; values are never logged.
    #[serde(default, skip_serializing)]
    pub credentials: BTreeMap<String, String>,
}

fn default_enabled_sources() -> Vec<String> {
    SourceId::ALL.iter().map(ToString::to_string).collect()
}

impl InstanceConfig {
    /// An instance with default thresholds and every source enabled.
    #[must_use]
    pub fn new(name: impl Into<String>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            storage_root: storage_root.into(),
            enabled_sources: default_enabled_sources(),
            thresholds: Thresholds::default(),
            credentials: BTreeMap::new(),
        }
    }
}

/// Health thresholds for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    /// Disk used percent that warns.
    pub disk_warning_percent: f64,
    /// Disk used percent that is critical.
    pub disk_critical_percent: f64,
    /// Minimum free bytes before warning.
    pub min_free_bytes: u64,
    /// 1-minute load per CPU that warns.
    pub load_per_cpu_warning: f64,
    /// 1-minute load per CPU that is critical.
    pub load_per_cpu_critical: f64,
    /// Memory used percent that warns.
    pub memory_warning_percent: f64,
    /// Memory used percent that is critical.
    pub memory_critical_percent: f64,
    /// Hours since last run before the instance counts as stale.
    pub stale_run_hours: u64,
    /// Failed share of tracked papers that warns (0..=1).
    pub failure_rate_warning: f64,
    /// Failed share of tracked papers that is critical (0..=1).
    pub failure_rate_critical: f64,
    /// Service probe latency that warns, ms.
    pub latency_warning_ms: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            disk_warning_percent: 80.0,
            disk_critical_percent: 95.0,
            min_free_bytes: 1024 * 1024 * 1024,
            load_per_cpu_warning: 1.5,
            load_per_cpu_critical: 3.0,
            memory_warning_percent: 85.0,
            memory_critical_percent: 95.0,
            stale_run_hours: 48,
            failure_rate_warning: 0.1,
            failure_rate_critical: 0.5,
            latency_warning_ms: 2000,
        }
    }
}

impl HarvesterConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for syntax errors or unknown keys,
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        config.ensure_instance();
        config.validate()?;
        Ok(config)
    }

    /// Defaults with the synthesized instance.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut config = Self::default();
        config.ensure_instance();
        config
    }

    fn ensure_instance(&mut self) {
        if self.instances.is_empty() {
            self.instances.push(InstanceConfig::new(
                DEFAULT_INSTANCE_NAME,
                self.pipeline.output_dir.clone(),
            ));
        }
    }

    /// Structural validation. Instance-level semantics (unknown sources,
    /// threshold ordering) are reported by the configuration health check.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;
        if !(1..=300).contains(&self.health.probe_timeout_secs) {
            return Err(ConfigError::invalid(
                "health.probe_timeout_secs",
                format!("{}. Expected range: 1..=300", self.health.probe_timeout_secs),
            ));
        }

        let mut names = std::collections::HashSet::new();
        for (index, instance) in self.instances.iter().enumerate() {
            if instance.name.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("instances[{index}].name"),
                    "must not be empty",
                ));
            }
            if !names.insert(instance.name.as_str()) {
                return Err(ConfigError::invalid(
                    format!("instances[{index}].name"),
                    format!("duplicate instance name '{}'", instance.name),
                ));
            }
        }
        Ok(())
    }
}

/// Configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path, if any.
    pub path: Option<PathBuf>,
    /// Whether `path` existed and was parsed.
    pub loaded_from_file: bool,
    /// The configuration, shared read-only.
    pub config: Arc<HarvesterConfig>,
}

/// Loads instance configuration once for a process.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstanceConfigManager;

impl InstanceConfigManager {
    /// Loads from `explicit` or the default path.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotFound`] when `explicit` does not exist, plus any
    /// read, parse or validation error.
    #[instrument(skip_all, fields(explicit = ?explicit))]
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            return Self::load_file(path);
        }

        match resolve_default_config_path() {
            Some(path) if path.exists() => Self::load_file(&path),
            path => {
                debug!(path = ?path, "no config file found, using defaults");
                Ok(LoadedConfig {
                    path,
                    loaded_from_file: false,
                    config: Arc::new(HarvesterConfig::with_defaults()),
                })
            }
        }
    }

    fn load_file(path: &Path) -> Result<LoadedConfig, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = HarvesterConfig::from_toml(&text, path)?;
        info!(
            path = %path.display(),
            instances = config.instances.len(),
            "configuration loaded"
        );
        Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            loaded_from_file: true,
            config: Arc::new(config),
        })
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/harvester/config.toml`
/// 2. `$HOME/.config/harvester/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join(APP_DIR_NAME)
                .join(CONFIG_FILE_NAME),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR_NAME)
            .join(CONFIG_FILE_NAME),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(text: &str) -> Result<HarvesterConfig, ConfigError> {
        HarvesterConfig::from_toml(text, Path::new("test.toml"))
    }

    #[test]
    fn test_empty_document_gets_defaults_and_default_instance() {
        let config = parse("").unwrap();
        assert_eq!(config.pipeline.concurrency, 4);
        assert_eq!(config.pipeline.max_results_per_category, 200);
        assert_eq!(config.instances.len(), 1);
        assert_eq!(config.instances[0].name, DEFAULT_INSTANCE_NAME);
        assert_eq!(config.instances[0].storage_root, PathBuf::from("./papers"));
        assert_eq!(config.instances[0].enabled_sources.len(), 3);
    }

    #[test]
    fn test_full_document_parses() {
        let config = parse(
            r#"
[pipeline]
output_dir = "/data/papers"
concurrency = 8
categories = ["q-fin.CP", "cs.*"]

[pipeline.sources.journal-b]
base_url = "https://archive.example"
delay_ms = 3000

[health]
required_binaries = ["pdftotext"]

[[instances]]
name = "finance"
storage_root = "/srv/finance"
enabled_sources = ["api-search"]

[instances.thresholds]
disk_warning_percent = 70.0

[instances.credentials]
api_key = "secret"
"#,
        )
        .unwrap();

        assert_eq!(config.pipeline.concurrency, 8);
        assert_eq!(config.pipeline.endpoints().journal_b, "https://archive.example");
        assert_eq!(
            config.pipeline.discovery_rate_limiter().delay_for("journal-b"),
            Duration::from_secs(3)
        );
        assert_eq!(
            config.pipeline.download_rate_limiter().delay_for("api-search"),
            Duration::from_secs(1)
        );
        let instance = &config.instances[0];
        assert_eq!(instance.name, "finance");
        assert!((instance.thresholds.disk_warning_percent - 70.0).abs() < f64::EPSILON);
        assert!((instance.thresholds.disk_critical_percent - 95.0).abs() < f64::EPSILON);
        assert_eq!(instance.credentials.len(), 1);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let error = parse("[pipeline]\nconcurency = 4\n").unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }));
        assert!(error.to_string().contains("concurency"));
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        assert!(matches!(
            parse("[pipeline]\nconcurrency = 0\n"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            parse("[pipeline]\ndownload_delay_ms = 60001\n"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            parse("[pipeline.sources.api-search]\nbase_url = \"ftp://x\"\n"),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_duplicate_instance_names_are_rejected() {
        let error = parse(
            "[[instances]]\nname = \"a\"\nstorage_root = \"/a\"\n[[instances]]\nname = \"a\"\nstorage_root = \"/b\"\n",
        )
        .unwrap_err();
        assert!(error.to_string().contains("duplicate"));
    }

    #[test]
    fn test_credentials_are_not_serialized() {
        let mut instance = InstanceConfig::new("x", "/x");
        instance
            .credentials
            .insert("token".to_string(), "hunter2".to_string());
        let rendered = toml::to_string(&instance).unwrap();
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_manager_explicit_missing_path_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            InstanceConfigManager::load(Some(&missing)),
            Err(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn test_manager_loads_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[pipeline]\nconcurrency = 2\n").unwrap();

        let loaded = InstanceConfigManager::load(Some(&path)).unwrap();
        assert!(loaded.loaded_from_file);
        assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.pipeline.concurrency, 2);
    }
}
