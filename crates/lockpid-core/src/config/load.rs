//! Configuration loading from files and environment (Immutable functional pattern)
//!
//! This module handles loading configuration from:
//! 1. Built-in defaults
//! 2. Global config: `<config dir>/lockpid/config.toml`
//! 3. Project config: `.lockpid/config.toml`
//! 4. Environment variables: `LOCKPID_*`

use std::path::{Path, PathBuf};

use super::types::{Config, ConfigLayer};
use crate::{Error, Result};

/// Load configuration from all sources with hierarchy
///
/// # Errors
///
/// Returns error if:
/// - Config file is malformed TOML
/// - Config values fail validation
pub fn load_config() -> Result<Config> {
    // 1. Start with built-in defaults
    let config = Config::default();

    // 2. Load global config if exists
    let config = match global_config_path() {
        Some(global_path) if global_path.exists() => config.merge(load_toml_file(&global_path)?),
        _ => config,
    };

    // 3. Load project config if exists
    let project_path = project_config_path()?;
    let config = if project_path.exists() {
        config.merge(load_toml_file(&project_path)?)
    } else {
        config
    };

    // 4. Apply environment variable overrides
    let config = config.apply_env_vars()?;

    config.validate()?;
    Ok(config)
}

/// Load configuration from an explicit file instead of the global/project
/// lookup. Environment overrides still apply.
///
/// # Errors
///
/// Returns error if the file is missing, malformed or fails validation.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let config = Config::default()
        .merge(load_toml_file(path)?)
        .apply_env_vars()?;
    config.validate()?;
    Ok(config)
}

/// Get path to global config file
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "lockpid")
        .map(|proj_dirs| proj_dirs.config_dir().join("config.toml"))
}

/// Get path to project config file
///
/// # Errors
///
/// Returns error if current directory cannot be determined
pub fn project_config_path() -> Result<PathBuf> {
    std::env::current_dir()
        .map(|dir| dir.join(".lockpid/config.toml"))
        .map_err(|e| Error::io_error(format!("Failed to get current directory: {e}")))
}

/// Load a TOML file into a [`ConfigLayer`] holding just the keys it sets
///
/// # Errors
///
/// Returns error if:
/// - File cannot be read
/// - Path is a directory instead of a file
/// - TOML is malformed
pub fn load_toml_file(path: &Path) -> Result<ConfigLayer> {
    if path.is_dir() {
        return Err(Error::io_error(format!(
            "Config path is a directory, not a file: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::io_error(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))
    })?;

    toml::from_str(&content).map_err(|e| {
        Error::invalid_config(format!(
            "Failed to parse config file {}: {e}",
            path.display()
        ))
    })
}

impl Config {
    /// Apply environment variable overrides - immutable pattern
    ///
    /// # Errors
    ///
    /// Returns error if environment variable values are invalid
    pub fn apply_env_vars(mut self) -> Result<Self> {
        // LOCKPID_BACKOFF_MS
        if let Ok(value) = std::env::var("LOCKPID_BACKOFF_MS") {
            self.backoff_ms = value.parse().map_err(|e| {
                Error::invalid_config(format!("Invalid LOCKPID_BACKOFF_MS value: {e}"))
            })?;
        }

        // LOCKPID_LOCK_FILE_NAME
        if let Ok(value) = std::env::var("LOCKPID_LOCK_FILE_NAME") {
            self.lock_file_name = value;
        }

        // LOCKPID_LIVENESS_FAILURE
        if let Ok(value) = std::env::var("LOCKPID_LIVENESS_FAILURE") {
            self.liveness_failure = value.parse().map_err(|e| {
                Error::invalid_config(format!("Invalid LOCKPID_LIVENESS_FAILURE value: {e}"))
            })?;
        }

        // LOCKPID_WAIT_MS
        if let Ok(value) = std::env::var("LOCKPID_WAIT_MS") {
            self.wait_ms = Some(value.parse().map_err(|e| {
                Error::invalid_config(format!("Invalid LOCKPID_WAIT_MS value: {e}"))
            })?);
        }

        // LOCKPID_STALE_MS
        if let Ok(value) = std::env::var("LOCKPID_STALE_MS") {
            self.stale_ms = Some(value.parse().map_err(|e| {
                Error::invalid_config(format!("Invalid LOCKPID_STALE_MS value: {e}"))
            })?);
        }

        Ok(self)
    }
}
