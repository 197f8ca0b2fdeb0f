//! Persisted settings.
//!
//! Resolution order for the settings file:
//!   1. `--config` CLI flag
//!   2. `JOBQ_CONFIG` environment variable
//!   3. `$XDG_CONFIG_HOME/jobq/config.toml`
//!   4. `~/.config/jobq/config.toml`
//!
//! A missing file is not an error; everything has a default. The
//! `searchpaths` list is handed to the queue and consulted when a worker
//! resolves a bare command name.

use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Last directory input files were picked from.
    pub files_from: Option<String>,
    /// Last directory a preset was picked from.
    pub preset_from: Option<String>,
    /// Preset chosen on the previous run.
    pub preset_selected: Option<String>,
    /// Default output directory when the CLI gives none.
    pub save_to: Option<String>,
    /// Give each input file its own folder under the output directory.
    pub create_folders: bool,
    /// Directories searched, in order, for bare command names.
    pub searchpaths: Vec<String>,
}

impl Settings {
    /// Load settings from the resolved path; absent file means defaults.
    pub fn load(cli_config: Option<&str>) -> Result<Settings> {
        let Some(path) = resolve_config_path(cli_config) else {
            return Ok(Settings::default());
        };
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Settings::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read settings: {}", path.display()))?;
        let settings: Settings = toml::from_str(&text)
            .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.searchpaths.iter().map(PathBuf::from).collect()
    }
}

/// Resolve the settings path following the priority chain.
pub fn resolve_config_path(cli_config: Option<&str>) -> Option<PathBuf> {
    // 1. CLI flag
    if let Some(path) = cli_config {
        return Some(PathBuf::from(path));
    }

    // 2. Environment variable
    if let Ok(path) = std::env::var("JOBQ_CONFIG")
        && !path.is_empty()
    {
        return Some(PathBuf::from(path));
    }

    // 3. XDG_CONFIG_HOME
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
        && !xdg.is_empty()
    {
        return Some(PathBuf::from(xdg).join("jobq").join("config.toml"));
    }

    // 4. Default: ~/.config/jobq/config.toml
    BaseDirs::new().map(|dirs| {
        dirs.home_dir()
            .join(".config")
            .join("jobq")
            .join("config.toml")
    })
}
