//! Centralized path utilities for the session engine.

use std::fs;
use std::path::PathBuf;

use crate::error::{AppError, Result};

/// Get the root data directory for the panel (~/.hypanel).
///
/// Falls back to the working directory when no home directory is known.
pub fn get_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hypanel")
}

/// Get the path to the session config file.
pub fn config_path() -> PathBuf {
    get_data_dir().join("session.toml")
}

/// Ensure the data directory exists.
pub fn ensure_data_dir() -> Result<()> {
    fs::create_dir_all(get_data_dir()).map_err(|e| AppError::io(e.to_string()))
}
