//! The eight built-in check categories.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use url::Url;

use super::checker::{CheckContext, HealthCheck, HealthCheckError};
use super::error_manager::ErrorManager;
use super::monitors::StorageMonitor;
use super::report::{CheckCategory, CheckLeaf, HealthStatus};
use crate::config::{InstanceConfig, Thresholds};
use crate::download::HttpClient;
use crate::model::SourceId;

/// The built-in checks in report order.
#[must_use]
pub fn default_checks() -> Vec<Arc<dyn HealthCheck>> {
    vec![
        Arc::new(ResourcesCheck),
        Arc::new(DependenciesCheck),
        Arc::new(ConfigurationCheck),
        Arc::new(ServicesCheck),
        Arc::new(InstancesCheck),
        Arc::new(StorageCheck),
        Arc::new(NetworkCheck),
        Arc::new(SecurityCheck),
    ]
}

/// Known sources enabled for `instance`, in declaration order.
fn enabled_sources(instance: &InstanceConfig) -> Vec<SourceId> {
    let names: BTreeSet<SourceId> = instance
        .enabled_sources
        .iter()
        .filter_map(|name| name.parse().ok())
        .collect();
    names.into_iter().collect()
}

/// Strictest thresholds over every instance, for host-wide findings.
fn strictest(context: &CheckContext) -> Thresholds {
    context
        .config
        .instances
        .iter()
        .map(|instance| &instance.thresholds)
        .fold(None::<Thresholds>, |acc, t| {
            Some(match acc {
                None => t.clone(),
                Some(a) => Thresholds {
                    load_per_cpu_warning: a.load_per_cpu_warning.min(t.load_per_cpu_warning),
                    load_per_cpu_critical: a.load_per_cpu_critical.min(t.load_per_cpu_critical),
                    memory_warning_percent: a.memory_warning_percent.min(t.memory_warning_percent),
                    memory_critical_percent: a
                        .memory_critical_percent
                        .min(t.memory_critical_percent),
                    ..a
                },
            })
        })
        .unwrap_or_default()
}

fn grade(value: f64, warning: f64, critical: f64) -> HealthStatus {
    if value >= critical {
        HealthStatus::Critical
    } else if value >= warning {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

// ==================== Resources ====================

/// CPU load and memory pressure.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResourcesCheck;

#[async_trait]
impl HealthCheck for ResourcesCheck {
    fn category(&self) -> CheckCategory {
        CheckCategory::Resources
    }

    async fn run(&self, context: &CheckContext) -> Result<Vec<CheckLeaf>, HealthCheckError> {
        let snapshot = context.performance.snapshot();
        let thresholds = strictest(context);
        let mut leaves = vec![
            CheckLeaf::healthy("cpu_count", format!("{} CPUs available", snapshot.cpus))
                .metric("cpus", snapshot.cpus),
        ];

        leaves.push(match snapshot.load_per_cpu() {
            Some(load) => {
                let status = grade(
                    load,
                    thresholds.load_per_cpu_warning,
                    thresholds.load_per_cpu_critical,
                );
                let leaf = CheckLeaf::new("cpu_load", status, format!("load per CPU {load:.2}"))
                    .metric("load_per_cpu", load);
                if status == HealthStatus::Healthy {
                    leaf
                } else {
                    leaf.recommend("Reduce pipeline concurrency or move instances to another host")
                }
            }
            None => CheckLeaf::warning("cpu_load", "load average unavailable on this platform"),
        });

        leaves.push(match snapshot.memory_used_percent {
            Some(used) => {
                let status = grade(
                    used,
                    thresholds.memory_warning_percent,
                    thresholds.memory_critical_percent,
                );
                let leaf = CheckLeaf::new("memory", status, format!("memory {used:.1}% used"))
                    .metric("used_percent", used);
                if status == HealthStatus::Healthy {
                    leaf
                } else {
                    leaf.recommend("Free memory or lower pipeline concurrency")
                }
            }
            None => CheckLeaf::warning("memory", "memory figures unavailable on this platform"),
        });

        Ok(leaves)
    }
}

// ==================== Dependencies ====================

/// HTTP client construction and required executables.
#[derive(Debug, Default, Clone, Copy)]
pub struct DependenciesCheck;

#[async_trait]
impl HealthCheck for DependenciesCheck {
    fn category(&self) -> CheckCategory {
        CheckCategory::Dependencies
    }

    async fn run(&self, context: &CheckContext) -> Result<Vec<CheckLeaf>, HealthCheckError> {
        let mut leaves = Vec::new();
        let pipeline = &context.config.pipeline;

        leaves.push(
            match HttpClient::with_timeouts(pipeline.connect_timeout(), pipeline.read_timeout()) {
                Ok(_) => CheckLeaf::healthy("http_client", "HTTP client builds"),
                Err(error) => CheckLeaf::critical(
                    "http_client",
                    format!("HTTP client cannot be built: {error}"),
                )
                .recommend("Check the TLS installation of this host"),
            },
        );

        let path = env::var_os("PATH").unwrap_or_default();
        for binary in &context.config.health.required_binaries {
            let found = env::split_paths(&path).find(|dir| dir.join(binary).is_file());
            leaves.push(match found {
                Some(dir) => CheckLeaf::healthy(
                    format!("binary:{binary}"),
                    format!("{binary} found in {}", dir.display()),
                ),
                None => CheckLeaf::critical(
                    format!("binary:{binary}"),
                    format!("required executable {binary} not found on PATH"),
                )
                .recommend(format!("Install {binary} or add it to PATH")),
            });
        }

        Ok(leaves)
    }
}

// ==================== Configuration ====================

/// Instance settings sanity.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigurationCheck;

#[async_trait]
impl HealthCheck for ConfigurationCheck {
    fn category(&self) -> CheckCategory {
        CheckCategory::Configuration
    }

    async fn run(&self, context: &CheckContext) -> Result<Vec<CheckLeaf>, HealthCheckError> {
        let mut leaves = vec![match &context.config_path {
            Some(path) => CheckLeaf::healthy(
                "config_file",
                format!("configuration loaded from {}", path.display()),
            ),
            None => CheckLeaf::healthy("config_file", "using built-in defaults"),
        }];

        let pipeline = &context.config.pipeline;
        for source in SourceId::ALL {
            let delay = pipeline
                .sources
                .get(source)
                .delay_ms
                .unwrap_or(pipeline.download_delay_ms);
            if delay == 0 {
                leaves.push(
                    CheckLeaf::warning(
                        format!("rate_limit:{source}"),
                        format!("no delay between requests to {source}"),
                    )
                    .recommend("Set a non-zero delay_ms to stay polite to sources"),
                );
            }
        }

        for instance in &context.config.instances {
            leaves.extend(check_instance_config(instance));
        }
        Ok(leaves)
    }
}

fn check_instance_config(instance: &InstanceConfig) -> Vec<CheckLeaf> {
    let name = instance.name.as_str();
    let mut leaves = Vec::new();

    if instance.storage_root.as_os_str().is_empty() {
        leaves.push(
            CheckLeaf::critical("storage_root", "storage root is not set")
                .for_instance(name)
                .recommend("Set storage_root for every instance"),
        );
    }

    let unknown: Vec<_> = instance
        .enabled_sources
        .iter()
        .filter(|source| source.parse::<SourceId>().is_err())
        .cloned()
        .collect();
    if !unknown.is_empty() {
        leaves.push(
            CheckLeaf::critical(
                "enabled_sources",
                format!("unknown sources: {}", unknown.join(", ")),
            )
            .for_instance(name)
            .recommend("Use api-search, journal-a or journal-b in enabled_sources"),
        );
    } else if instance.enabled_sources.is_empty() {
        leaves.push(
            CheckLeaf::warning("enabled_sources", "no sources enabled").for_instance(name),
        );
    }

    let t = &instance.thresholds;
    let pairs = [
        ("disk", t.disk_warning_percent, t.disk_critical_percent, 100.0),
        ("memory", t.memory_warning_percent, t.memory_critical_percent, 100.0),
        ("load", t.load_per_cpu_warning, t.load_per_cpu_critical, f64::MAX),
        ("failure_rate", t.failure_rate_warning, t.failure_rate_critical, 1.0),
    ];
    let bad: Vec<_> = pairs
        .iter()
        .filter(|(_, warning, critical, max)| {
            !(*warning >= 0.0 && warning < critical && critical <= max)
        })
        .map(|(label, ..)| *label)
        .collect();
    if !bad.is_empty() {
        leaves.push(
            CheckLeaf::critical(
                "thresholds",
                format!("inconsistent thresholds: {}", bad.join(", ")),
            )
            .for_instance(name)
            .recommend("Keep every warning threshold below its critical threshold"),
        );
    }

    if leaves.is_empty() {
        leaves.push(CheckLeaf::healthy("instance_config", "settings are consistent").for_instance(name));
    }
    leaves
}

// ==================== Services ====================

/// Reachability of every enabled source.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServicesCheck;

#[derive(Debug, Clone)]
enum Probe {
    Status { code: u16, latency: Duration },
    Unreachable(String),
}

#[async_trait]
impl HealthCheck for ServicesCheck {
    fn category(&self) -> CheckCategory {
        CheckCategory::Services
    }

    async fn run(&self, context: &CheckContext) -> Result<Vec<CheckLeaf>, HealthCheckError> {
        let timeout = context.config.health.probe_timeout();
        let client = HttpClient::with_timeouts(timeout, timeout)
            .map_err(|source| HealthCheckError::Client { source })?;
        let endpoints = context.config.pipeline.endpoints();

        let wanted: BTreeSet<SourceId> = context
            .config
            .instances
            .iter()
            .flat_map(enabled_sources)
            .collect();
        let mut probes = BTreeMap::new();
        for source in wanted {
            let url = endpoints.base_url(source);
            probes.insert(source, probe(&client, url).await);
        }

        let mut leaves = Vec::new();
        for instance in &context.config.instances {
            for source in enabled_sources(instance) {
                let Some(result) = probes.get(&source) else {
                    continue;
                };
                let url = endpoints.base_url(source);
                leaves.push(
                    service_leaf(source, url, result, &instance.thresholds)
                        .for_instance(&instance.name),
                );
            }
        }
        Ok(leaves)
    }
}

async fn probe(client: &HttpClient, url: &str) -> Probe {
    let started = Instant::now();
    match client.inner().get(url).send().await {
        Ok(response) => Probe::Status {
            code: response.status().as_u16(),
            latency: started.elapsed(),
        },
        Err(error) => {
            debug!(url, error = %error, "service probe failed");
            Probe::Unreachable(error.to_string())
        }
    }
}

fn service_leaf(source: SourceId, url: &str, probe: &Probe, thresholds: &Thresholds) -> CheckLeaf {
    let name = format!("service:{source}");
    match probe {
        Probe::Unreachable(reason) => CheckLeaf::critical(name, format!("{source} unreachable: {reason}"))
            .metric("url", url)
            .recommend(format!("Check connectivity to {url}")),
        Probe::Status { code, latency } => {
            let latency_ms = millis(*latency);
            let leaf = if *code >= 500 {
                CheckLeaf::critical(name, format!("{source} answered HTTP {code}"))
                    .recommend(format!("{source} is failing; retry later or check its status page"))
            } else if *code >= 400 {
                CheckLeaf::warning(name, format!("{source} answered HTTP {code}"))
                    .recommend(format!("Verify the configured base URL for {source}"))
            } else if latency_ms > thresholds.latency_warning_ms {
                CheckLeaf::warning(name, format!("{source} slow: {latency_ms} ms"))
            } else {
                CheckLeaf::healthy(name, format!("{source} reachable in {latency_ms} ms"))
            };
            leaf.metric("url", url)
                .metric("status", *code)
                .metric("latency_ms", latency_ms)
        }
    }
}

// ==================== Instances ====================

/// Run state of every instance.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstancesCheck;

#[async_trait]
impl HealthCheck for InstancesCheck {
    fn category(&self) -> CheckCategory {
        CheckCategory::Instances
    }

    async fn run(&self, context: &CheckContext) -> Result<Vec<CheckLeaf>, HealthCheckError> {
        let mut leaves = Vec::new();
        for instance in &context.config.instances {
            leaves.extend(
                instance_state_leaves(instance)
                    .into_iter()
                    .map(|leaf| leaf.for_instance(&instance.name)),
            );
        }
        Ok(leaves)
    }
}

fn instance_state_leaves(instance: &InstanceConfig) -> Vec<CheckLeaf> {
    let thresholds = &instance.thresholds;
    let stats = match ErrorManager::new(&instance.storage_root).stats() {
        Ok(Some(stats)) => stats,
        Ok(None) => {
            return vec![
                CheckLeaf::warning("state", "no state file; instance has not run yet")
                    .recommend("Run `harvester download` for this instance"),
            ];
        }
        Err(error) => {
            return vec![
                CheckLeaf::critical("state", format!("state file unusable: {error}"))
                    .recommend("Inspect the state file or run `harvester reset`"),
            ];
        }
    };

    let mut leaves = vec![
        CheckLeaf::healthy("state", format!("{} papers tracked", stats.tracked))
            .metric("tracked", stats.tracked),
    ];

    let stale_after = i64::try_from(thresholds.stale_run_hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .unwrap_or(chrono::Duration::MAX);
    leaves.push(match stats.last_run_at {
        Some(at) if Utc::now() - at > stale_after => CheckLeaf::warning(
            "last_run",
            format!("last run {} hours ago", (Utc::now() - at).num_hours()),
        )
        .metric("last_run_at", at.to_rfc3339())
        .recommend("Check that scheduled runs are still executing"),
        Some(at) => CheckLeaf::healthy("last_run", format!("last run at {}", at.to_rfc3339()))
            .metric("last_run_at", at.to_rfc3339()),
        None => CheckLeaf::warning("last_run", "last run time unknown"),
    });

    let status = grade(
        stats.failure_rate,
        thresholds.failure_rate_warning,
        thresholds.failure_rate_critical,
    );
    let mut leaf = CheckLeaf::new(
        "failure_rate",
        status,
        format!(
            "{:.0}% of attempted papers failed ({} failed)",
            stats.failure_rate * 100.0,
            stats.failed
        ),
    )
    .metric("failure_rate", stats.failure_rate)
    .metric("failed", stats.failed);
    if let Some((id, error)) = stats.recent_failures.first() {
        leaf = leaf.metric("latest_failure", format!("{id}: {error}"));
    }
    if status != HealthStatus::Healthy {
        leaf = leaf.recommend("Review recent failures; a later run retries failed papers");
    }
    leaves.push(leaf);
    leaves
}

// ==================== Storage ====================

/// Storage roots: presence, writability and capacity.
#[derive(Debug, Default, Clone, Copy)]
pub struct StorageCheck;

#[async_trait]
impl HealthCheck for StorageCheck {
    fn category(&self) -> CheckCategory {
        CheckCategory::Storage
    }

    async fn run(&self, context: &CheckContext) -> Result<Vec<CheckLeaf>, HealthCheckError> {
        let mut leaves = Vec::new();
        for instance in &context.config.instances {
            leaves.extend(
                storage_leaves(instance)
                    .into_iter()
                    .map(|leaf| leaf.for_instance(&instance.name)),
            );
        }
        Ok(leaves)
    }
}

fn storage_leaves(instance: &InstanceConfig) -> Vec<CheckLeaf> {
    let monitor = StorageMonitor::new(&instance.storage_root);
    let root = monitor.root().display().to_string();
    if !monitor.exists() {
        return vec![
            CheckLeaf::critical("storage_root", format!("storage root {root} does not exist"))
                .recommend(format!("Create {root} or fix storage_root")),
        ];
    }
    let snapshot = match monitor.snapshot() {
        Ok(snapshot) => snapshot,
        Err(error) => {
            return vec![CheckLeaf::critical(
                "storage_root",
                format!("storage root {root} cannot be inspected: {error}"),
            )];
        }
    };

    let t = &instance.thresholds;
    let mut leaves = vec![if snapshot.writable {
        CheckLeaf::healthy("writable", format!("{root} is writable"))
    } else {
        CheckLeaf::critical("writable", format!("{root} is not writable"))
            .recommend(format!("Fix permissions on {root}"))
    }];

    let status = grade(snapshot.used_percent, t.disk_warning_percent, t.disk_critical_percent);
    let mut usage = CheckLeaf::new(
        "disk_usage",
        status,
        format!("disk {:.1}% used", snapshot.used_percent),
    )
    .metric("used_percent", snapshot.used_percent)
    .metric("total_bytes", snapshot.total_bytes);
    if status != HealthStatus::Healthy {
        usage = usage.recommend("Free disk space or move the storage root");
    }
    leaves.push(usage);

    leaves.push(if snapshot.available_bytes < t.min_free_bytes {
        CheckLeaf::warning(
            "free_space",
            format!("only {} bytes free", snapshot.available_bytes),
        )
        .metric("available_bytes", snapshot.available_bytes)
        .recommend("Free disk space or move the storage root")
    } else {
        CheckLeaf::healthy("free_space", format!("{} bytes free", snapshot.available_bytes))
            .metric("available_bytes", snapshot.available_bytes)
    });

    leaves.push(
        CheckLeaf::healthy(
            "artifacts",
            format!("{} artifacts stored", snapshot.artifact_count),
        )
        .metric("artifact_count", snapshot.artifact_count)
        .metric("artifact_bytes", snapshot.artifact_bytes),
    );
    leaves
}

// ==================== Network ====================

/// DNS resolution of the hosts each instance's enabled sources live on.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkCheck;

#[async_trait]
impl HealthCheck for NetworkCheck {
    fn category(&self) -> CheckCategory {
        CheckCategory::Network
    }

    async fn run(&self, context: &CheckContext) -> Result<Vec<CheckLeaf>, HealthCheckError> {
        let timeout = context.config.health.probe_timeout();
        let endpoints = context.config.pipeline.endpoints();

        // (host, port) -> instances that reach it
        let mut hosts: BTreeMap<(String, u16), Vec<&str>> = BTreeMap::new();
        let mut leaves = Vec::new();
        for instance in &context.config.instances {
            for source in enabled_sources(instance) {
                let url = endpoints.base_url(source);
                match Url::parse(url) {
                    Ok(parsed) => {
                        if let Some(host) = parsed.host_str() {
                            let key = (host.to_string(), parsed.port_or_known_default().unwrap_or(443));
                            let users = hosts.entry(key).or_default();
                            if !users.contains(&instance.name.as_str()) {
                                users.push(&instance.name);
                            }
                        }
                    }
                    Err(error) => leaves.push(
                        CheckLeaf::critical(
                            format!("url:{source}"),
                            format!("base URL {url} does not parse: {error}"),
                        )
                        .for_instance(&instance.name),
                    ),
                }
            }
        }

        for ((host, port), instances) in hosts {
            let started = Instant::now();
            let lookup =
                tokio::time::timeout(timeout, tokio::net::lookup_host((host.as_str(), port)))
                    .await
                    .map(|resolved| resolved.map(|addrs| addrs.count()));
            let elapsed = millis(started.elapsed());
            let leaf = dns_leaf(&host, lookup, elapsed);
            debug!(%host, status = %leaf.status, "dns lookup finished");
            for instance in instances {
                leaves.push(leaf.clone().for_instance(instance));
            }
        }
        Ok(leaves)
    }
}

fn dns_leaf(
    host: &str,
    lookup: Result<std::io::Result<usize>, tokio::time::error::Elapsed>,
    elapsed: u64,
) -> CheckLeaf {
    let name = format!("dns:{host}");
    match lookup {
        Ok(Ok(0)) => CheckLeaf::critical(name, format!("{host} has no addresses")),
        Ok(Ok(count)) => CheckLeaf::healthy(name, format!("{host} resolves in {elapsed} ms"))
            .metric("lookup_ms", elapsed)
            .metric("addresses", count),
        Ok(Err(error)) => CheckLeaf::critical(name, format!("{host} does not resolve: {error}"))
            .recommend("Check DNS configuration of this host"),
        Err(_) => CheckLeaf::critical(name, format!("DNS lookup of {host} timed out"))
            .recommend("Check DNS configuration of this host"),
    }
}

// ==================== Security ====================

/// Transport and permission posture.
#[derive(Debug, Default, Clone, Copy)]
pub struct SecurityCheck;

#[async_trait]
impl HealthCheck for SecurityCheck {
    fn category(&self) -> CheckCategory {
        CheckCategory::Security
    }

    async fn run(&self, context: &CheckContext) -> Result<Vec<CheckLeaf>, HealthCheckError> {
        let endpoints = context.config.pipeline.endpoints();
        let has_credentials = context
            .config
            .instances
            .iter()
            .any(|instance| !instance.credentials.is_empty());
        let mut leaves = Vec::new();

        if let Some(path) = &context.config_path {
            if has_credentials && is_world_readable(path) {
                leaves.push(
                    CheckLeaf::critical(
                        "config_permissions",
                        format!("{} holds credentials and is world-readable", path.display()),
                    )
                    .recommend(format!("chmod 600 {}", path.display())),
                );
            }
        }

        for instance in &context.config.instances {
            let mut instance_leaves = Vec::new();
            for source in enabled_sources(instance) {
                let url = endpoints.base_url(source);
                if !url.starts_with("https://") {
                    instance_leaves.push(
                        CheckLeaf::warning(
                            format!("transport:{source}"),
                            format!("{source} is fetched over plain HTTP ({url})"),
                        )
                        .recommend("Use https base URLs"),
                    );
                }
            }
            if is_world_writable(&instance.storage_root) {
                instance_leaves.push(
                    CheckLeaf::warning(
                        "storage_permissions",
                        format!("{} is world-writable", instance.storage_root.display()),
                    )
                    .recommend("Remove world write permission from the storage root"),
                );
            }
            for (key, value) in &instance.credentials {
                if value.trim().is_empty() {
                    instance_leaves.push(CheckLeaf::warning(
                        format!("credential:{key}"),
                        format!("credential {key} is empty"),
                    ));
                }
            }
            if instance_leaves.is_empty() {
                instance_leaves.push(CheckLeaf::healthy("posture", "no security findings"));
            }
            leaves.extend(
                instance_leaves
                    .into_iter()
                    .map(|leaf| leaf.for_instance(&instance.name)),
            );
        }
        Ok(leaves)
    }
}

#[cfg(unix)]
fn mode_bits(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).ok().map(|meta| meta.permissions().mode())
}

#[cfg(unix)]
fn is_world_readable(path: &Path) -> bool {
    mode_bits(path).is_some_and(|mode| mode & 0o004 != 0)
}

#[cfg(unix)]
fn is_world_writable(path: &Path) -> bool {
    mode_bits(path).is_some_and(|mode| mode & 0o002 != 0)
}

#[cfg(not(unix))]
fn is_world_readable(_path: &Path) -> bool {
    false
}

#[cfg(not(unix))]
fn is_world_writable(_path: &Path) -> bool {
    false
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::HarvesterConfig;
    use crate::health::monitors::PerformanceMonitor;
    use crate::state::StateTracker;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn context_with(instances: Vec<InstanceConfig>) -> CheckContext {
        let mut config = HarvesterConfig::with_defaults();
        config.instances = instances;
        CheckContext {
            config: Arc::new(config),
            config_path: None,
            performance: PerformanceMonitor::default(),
        }
    }

    fn statuses(leaves: &[CheckLeaf]) -> Vec<(&str, HealthStatus)> {
        leaves
            .iter()
            .map(|leaf| (leaf.name.as_str(), leaf.status))
            .collect()
    }

    #[test]
    fn test_default_checks_cover_every_category_in_order() {
        let categories: Vec<_> = default_checks().iter().map(|c| c.category()).collect();
        assert_eq!(categories, CheckCategory::ALL.to_vec());
    }

    // ==================== Configuration Tests ====================

    #[tokio::test]
    async fn test_configuration_flags_unknown_sources_and_bad_thresholds() {
        let mut instance = InstanceConfig::new("a", "/tmp/a");
        instance.enabled_sources = vec!["api-search".to_string(), "nope".to_string()];
        instance.thresholds.disk_warning_percent = 99.0;
        instance.thresholds.disk_critical_percent = 90.0;

        let leaves = ConfigurationCheck
            .run(&context_with(vec![instance]))
            .await
            .unwrap();
        let found = statuses(&leaves);
        assert!(found.contains(&("enabled_sources", HealthStatus::Critical)));
        assert!(found.contains(&("thresholds", HealthStatus::Critical)));
        assert!(leaves.iter().skip(1).all(|leaf| leaf.instance.as_deref() == Some("a")));
    }

    #[tokio::test]
    async fn test_configuration_healthy_instance() {
        let leaves = ConfigurationCheck
            .run(&context_with(vec![InstanceConfig::new("a", "/tmp/a")]))
            .await
            .unwrap();
        assert!(leaves.iter().all(|leaf| leaf.status == HealthStatus::Healthy));
    }

    // ==================== Storage Tests ====================

    #[tokio::test]
    async fn test_storage_missing_root_is_critical() {
        let leaves = StorageCheck
            .run(&context_with(vec![InstanceConfig::new(
                "gone",
                PathBuf::from("/definitely/not/here"),
            )]))
            .await
            .unwrap();
        assert_eq!(statuses(&leaves), vec![("storage_root", HealthStatus::Critical)]);
    }

    #[tokio::test]
    async fn test_storage_existing_root_reports_capacity() {
        let dir = TempDir::new().unwrap();
        let mut instance = InstanceConfig::new("a", dir.path());
        instance.thresholds.min_free_bytes = 0;
        instance.thresholds.disk_warning_percent = 100.0;
        instance.thresholds.disk_critical_percent = 101.0;

        let leaves = StorageCheck.run(&context_with(vec![instance])).await.unwrap();
        assert_eq!(
            statuses(&leaves),
            vec![
                ("writable", HealthStatus::Healthy),
                ("disk_usage", HealthStatus::Healthy),
                ("free_space", HealthStatus::Healthy),
                ("artifacts", HealthStatus::Healthy),
            ]
        );
    }

    // ==================== Instances Tests ====================

    #[tokio::test]
    async fn test_instances_never_run_is_warning() {
        let dir = TempDir::new().unwrap();
        let leaves = InstancesCheck
            .run(&context_with(vec![InstanceConfig::new("a", dir.path())]))
            .await
            .unwrap();
        assert_eq!(statuses(&leaves), vec![("state", HealthStatus::Warning)]);
    }

    #[tokio::test]
    async fn test_instances_high_failure_rate_is_critical() {
        let dir = TempDir::new().unwrap();
        let mut tracker = StateTracker::load(dir.path(), true);
        tracker.mark_downloaded("journal-a:1", Some(1), 1);
        tracker.mark_failed("journal-a:2", "HTTP 503", 3);
        tracker.persist().unwrap();

        let leaves = InstancesCheck
            .run(&context_with(vec![InstanceConfig::new("a", dir.path())]))
            .await
            .unwrap();
        let found = statuses(&leaves);
        assert!(found.contains(&("last_run", HealthStatus::Healthy)));
        assert!(found.contains(&("failure_rate", HealthStatus::Critical)));
    }

    #[tokio::test]
    async fn test_instances_corrupt_state_is_critical() {
        let dir = TempDir::new().unwrap();
        std::fs::write(crate::state::state_path(dir.path()), b"garbage").unwrap();
        let leaves = InstancesCheck
            .run(&context_with(vec![InstanceConfig::new("a", dir.path())]))
            .await
            .unwrap();
        assert_eq!(statuses(&leaves), vec![("state", HealthStatus::Critical)]);
        // The health check must not move the file aside.
        assert!(crate::state::state_path(dir.path()).exists());
    }

    // ==================== Network Tests ====================

    fn network_instance(name: &str, sources: &[&str]) -> InstanceConfig {
        let mut instance = InstanceConfig::new(name, "/tmp");
        instance.enabled_sources = sources.iter().map(ToString::to_string).collect();
        instance
    }

    #[tokio::test]
    async fn test_network_resolves_only_hosts_of_enabled_sources() {
        let mut config = HarvesterConfig::with_defaults();
        config.pipeline.sources.api_search.base_url = Some("http://127.0.0.1:9".to_string());
        config.pipeline.sources.journal_a.base_url =
            Some("https://unused-journal.invalid".to_string());
        config.instances = vec![
            network_instance("alpha", &["api-search"]),
            network_instance("beta", &["api-search"]),
        ];
        let context = CheckContext {
            config: Arc::new(config),
            config_path: None,
            performance: PerformanceMonitor::default(),
        };

        let leaves = NetworkCheck.run(&context).await.unwrap();
        assert_eq!(leaves.len(), 2);
        assert!(leaves.iter().all(|leaf| leaf.name == "dns:127.0.0.1"));
        assert!(leaves.iter().all(|leaf| leaf.status == HealthStatus::Healthy));
        let owners: Vec<_> = leaves.iter().map(|leaf| leaf.instance.as_deref()).collect();
        assert_eq!(owners, vec![Some("alpha"), Some("beta")]);
    }

    #[tokio::test]
    async fn test_network_unparsable_url_belongs_to_its_instance() {
        let mut config = HarvesterConfig::with_defaults();
        config.pipeline.sources.journal_b.base_url = Some("not a url".to_string());
        config.instances = vec![network_instance("gamma", &["journal-b"])];
        let context = CheckContext {
            config: Arc::new(config),
            config_path: None,
            performance: PerformanceMonitor::default(),
        };

        let leaves = NetworkCheck.run(&context).await.unwrap();
        assert_eq!(statuses(&leaves), vec![("url:journal-b", HealthStatus::Critical)]);
        assert_eq!(leaves[0].instance.as_deref(), Some("gamma"));
    }

    // ==================== Security Tests ====================

    #[tokio::test]
    async fn test_security_flags_plain_http_and_empty_credentials() {
        let mut config = HarvesterConfig::with_defaults();
        config.pipeline.sources.journal_a.base_url = Some("http://journal-a.test".to_string());
        let mut instance = InstanceConfig::new("a", "/nonexistent");
        instance
            .credentials
            .insert("token".to_string(), "  ".to_string());
        config.instances = vec![instance];
        let context = CheckContext {
            config: Arc::new(config),
            config_path: None,
            performance: PerformanceMonitor::default(),
        };

        let leaves = SecurityCheck.run(&context).await.unwrap();
        let found = statuses(&leaves);
        assert!(found.contains(&("transport:journal-a", HealthStatus::Warning)));
        assert!(found.contains(&("credential:token", HealthStatus::Warning)));
        assert!(!found.iter().any(|(name, _)| *name == "transport:api-search"));
    }

    // ==================== Resources Tests ====================

    #[tokio::test]
    async fn test_resources_grades_load_from_proc() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("loadavg"), "1000.0 1.0 1.0 1/1 1\n").unwrap();
        std::fs::write(
            dir.path().join("meminfo"),
            "MemTotal: 1000 kB\nMemAvailable: 900 kB\n",
        )
        .unwrap();
        let mut context = context_with(vec![InstanceConfig::new("a", "/tmp")]);
        context.performance = PerformanceMonitor::with_proc_root(dir.path());

        let leaves = ResourcesCheck.run(&context).await.unwrap();
        assert_eq!(
            statuses(&leaves),
            vec![
                ("cpu_count", HealthStatus::Healthy),
                ("cpu_load", HealthStatus::Critical),
                ("memory", HealthStatus::Healthy),
            ]
        );
    }

    #[test]
    fn test_grade_boundaries() {
        assert_eq!(grade(79.9, 80.0, 95.0), HealthStatus::Healthy);
        assert_eq!(grade(80.0, 80.0, 95.0), HealthStatus::Warning);
        assert_eq!(grade(95.0, 80.0, 95.0), HealthStatus::Critical);
    }
}
