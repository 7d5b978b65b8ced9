//! `load_config`: turns the optional YAML file into an [`ArchiveConfig`].
//!
//! Every key is optional; anything left out keeps its documented default. The
//! location of the browser storage-state file may also come from the
//! environment (`GRADESCOPE_AUTH_FILE`, usually set through `.env`) so it can
//! stay out of version-controlled config.
//!
//! # Errors
//! Failures use `anyhow::Error` with the offending path in the message, and are
//! surfaced at the CLI boundary.
//!
//! Example:
//! ```yaml
//! output_dir: ./gradescope_archive
//! max_retries: 5
//! repo_private: true
//! extract_depth: 2
//! ```

use anyhow::{anyhow, Result};
use gradescope_archiver_core::config::ArchiveConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const AUTH_FILE_ENV: &str = "GRADESCOPE_AUTH_FILE";

/// Parse a YAML config file. Keys that are absent keep their defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ArchiveConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    // An empty document means "all defaults".
    if content.trim().is_empty() {
        return Ok(ArchiveConfig::default());
    }

    serde_yaml::from_str::<ArchiveConfig>(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow!("Failed to parse config YAML {:?}: {e}", path_ref)
    })
}

/// Config from `path` when given, defaults otherwise, then environment overrides.
pub fn resolve_config(path: Option<&Path>) -> Result<ArchiveConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => {
            info!("No config file given, using defaults");
            ArchiveConfig::default()
        }
    };
    if let Ok(auth_file) = std::env::var(AUTH_FILE_ENV) {
        if !auth_file.trim().is_empty() {
            info!(auth_file = %auth_file, "Using authentication file from environment");
            config.auth_file = PathBuf::from(auth_file);
        }
    }
    config.trace_loaded();
    Ok(config)
}
