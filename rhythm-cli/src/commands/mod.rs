//! CLI command implementations.

pub mod compile;
pub mod run;
pub mod smoke;

pub use compile::compile_file;
pub use run::{run_file, RunOptions};
pub use smoke::smoke_test;

use anyhow::{Context, Result};
use rhythm_runtime::HostConfig;
use std::io::Write;
use std::path::Path;

/// Load `rhythm.yml`, falling back to defaults when it does not exist
fn load_config(config_path: &Path) -> Result<HostConfig> {
    HostConfig::load_or_default(config_path).context("Failed to load configuration")
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Flush stdout and exit with a failure status
fn fail() -> ! {
    let _ = std::io::stdout().flush();
    std::process::exit(1);
}
