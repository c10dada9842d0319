//! Exit code logic for the harvester process.
//!
//! Single responsibility: map run and report outcomes to the process exit outcome.

use harvester_core::{ConfigError, HarvestError, HealthStatus, RunStatistics};

use crate::ProcessExit;

/// Exit outcome of a download run.
pub(crate) fn download_exit(stats: &RunStatistics) -> ProcessExit {
    if stats.is_clean() {
        ProcessExit::Success
    } else {
        ProcessExit::Failure
    }
}

/// Exit outcome of a health run: failing reports exit non-zero.
pub(crate) fn health_exit(status: HealthStatus) -> ProcessExit {
    if status.is_failing() {
        ProcessExit::Failure
    } else {
        ProcessExit::Success
    }
}

/// Configuration problems exit with a distinct code.
pub(crate) fn error_exit(error: &anyhow::Error) -> ProcessExit {
    let is_config = error.chain().any(|cause| {
        cause.downcast_ref::<ConfigError>().is_some()
            || cause.downcast_ref::<HarvestError>().is_some_and(|e| {
                !matches!(e, HarvestError::OutputDir { .. } | HarvestError::Client { .. })
            })
    });
    if is_config {
        ProcessExit::ConfigError
    } else {
        ProcessExit::Failure
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_download_exit_success_when_clean() {
        assert_eq!(download_exit(&RunStatistics::default()), ProcessExit::Success);
    }

    #[test]
    fn test_download_exit_failure_when_interrupted_or_failed() {
        let interrupted = RunStatistics {
            interrupted: true,
            ..RunStatistics::default()
        };
        assert_eq!(download_exit(&interrupted), ProcessExit::Failure);

        let failed = RunStatistics {
            total_failed: 1,
            ..RunStatistics::default()
        };
        assert_eq!(download_exit(&failed), ProcessExit::Failure);
    }

    #[test]
    fn test_health_exit() {
        assert_eq!(health_exit(HealthStatus::Warning), ProcessExit::Success);
        assert_eq!(health_exit(HealthStatus::Critical), ProcessExit::Failure);
    }

    #[test]
    fn test_error_exit_distinguishes_configuration_errors() {
        let unknown = anyhow::Error::new(HarvestError::UnknownSource {
            name: "x".to_string(),
        });
        assert_eq!(error_exit(&unknown), ProcessExit::ConfigError);

        let config = anyhow::Error::new(ConfigError::NotFound {
            path: PathBuf::from("/x"),
        })
        .context("loading configuration");
        assert_eq!(error_exit(&config), ProcessExit::ConfigError);

        let io = anyhow::anyhow!("disk on fire");
        assert_eq!(error_exit(&io), ProcessExit::Failure);
    }
}
