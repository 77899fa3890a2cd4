//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `serve`  | `Serve`          |
//! | `scan`   | `Scan`           |
//! | `config` | `Config`         |

pub mod config;
pub mod scan;
pub mod serve;

pub use config::cmd_config;
pub use scan::cmd_scan;
pub use serve::{ServeOverrides, cmd_serve};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use specdash::config::DashboardConfig;

/// Load the file layer (explicit path must exist) then apply environment
/// overrides.
pub fn load_config(explicit: Option<&Path>) -> Result<DashboardConfig> {
    let mut config = match explicit {
        Some(path) => DashboardConfig::load(path)?,
        None => match DashboardConfig::default_path() {
            Some(path) => DashboardConfig::load_or_default(&path)?,
            None => DashboardConfig::default(),
        },
    };
    config.apply_env()?;
    Ok(config)
}

/// `--root` flags win over configured roots; with neither, the current
/// directory is scanned.
pub fn effective_roots(config: &DashboardConfig, flags: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if !flags.is_empty() {
        return Ok(flags.to_vec());
    }
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    Ok(config.roots_or(&cwd))
}
