//! Startup configuration loading.
//!
//! The daemon only reads its config file; runtime changes made over IPC live in
//! memory until the process exits.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::GammaConfig;
use super::validation::validate_config;

/// `$XDG_CONFIG_HOME/nightlight/nightlight.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(config_dir.join("nightlight").join("nightlight.toml"))
}

/// Load the startup config.
///
/// An explicit path must exist. The default location may be absent, in which
/// case the built-in defaults are used.
pub fn load(custom_path: Option<&Path>) -> Result<GammaConfig> {
    match custom_path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Configuration file not found: {}", path.display());
            }
            load_from_path(path)
        }
        None => {
            let path = default_config_path()?;
            if path.exists() {
                load_from_path(&path)
            } else {
                log_decorated!("No configuration file, using defaults");
                Ok(GammaConfig::default())
            }
        }
    }
}

pub fn load_from_path(path: &Path) -> Result<GammaConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    let config: GammaConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", path.display()))?;

    validate_config(&config)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    Ok(config)
}
