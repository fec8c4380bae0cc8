//! Configuration management for deck.
//!
//! A project can keep its command set in a `deck.toml` next to the code; the
//! file is consulted only when the command line supplies no commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level structure corresponding to `deck.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Session name, same meaning as `-s` (the CLI flag wins).
    pub session: Option<String>,
    /// List of processes to run.
    #[serde(rename = "process")]
    pub processes: Vec<ProcessConfig>,
}

/// Configuration for a single process.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    /// Display name; derived from the command when absent.
    pub name: Option<String>,
    /// Shell command line to execute.
    pub cmd: String,
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// `deck.toml` in the current directory, if present.
pub fn default_config_path() -> Option<PathBuf> {
    let path = Path::new("deck.toml");
    if path.exists() {
        Some(path.to_path_buf())
    } else {
        None
    }
}
