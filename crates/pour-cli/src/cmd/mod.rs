//! Subcommand implementations

pub mod check;
pub mod completions;
pub mod hash;
pub mod install;
pub mod uninstall;

use std::path::PathBuf;

use anyhow::{Context, Result};
use pour_core::{Config, config_path, try_pour_home};

/// The pour home directory, or an error when no home can be determined.
pub fn home() -> Result<PathBuf> {
    try_pour_home().context("Could not determine home directory; set POUR_HOME")
}

/// Load `$POUR_HOME/config.toml`, defaulting when absent.
pub fn load_config(home: &std::path::Path) -> Result<Config> {
    let path = config_path(home);
    Config::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}
