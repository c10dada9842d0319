//! CLI command handlers.

mod download;
mod health;
mod reset;
mod status;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use harvester_core::{InstanceConfigManager, LoadedConfig};

pub(crate) use download::run_download_command;
pub(crate) use health::run_health_command;
pub(crate) use reset::run_reset_command;
pub(crate) use status::run_status_command;

fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    InstanceConfigManager::load(explicit).context("loading configuration")
}

/// `--output` wins over the configured pipeline directory.
fn effective_output_dir(loaded: &LoadedConfig, output: Option<&Path>) -> PathBuf {
    output.map_or_else(
        || loaded.config.pipeline.output_dir.clone(),
        Path::to_path_buf,
    )
}
