//! `harvester reset`: forget the resume state of an output directory.

use std::path::Path;

use anyhow::{Context, Result};
use harvester_core::state;

use crate::ProcessExit;
use crate::cli::ResetArgs;

pub(crate) fn run_reset_command(
    args: &ResetArgs,
    config_path: Option<&Path>,
) -> Result<ProcessExit> {
    let loaded = super::load_config(config_path)?;
    let dir = super::effective_output_dir(&loaded, args.output.as_deref());

    let removed =
        state::reset(&dir).with_context(|| format!("resetting state in {}", dir.display()))?;
    if removed {
        println!("Removed {}", state::state_path(&dir).display());
    } else {
        println!("No state in {}", dir.display());
    }
    Ok(ProcessExit::Success)
}
