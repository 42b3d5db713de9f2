//! Application directory helpers anchored to a single `.tzlink` folder.
//!
//! Logs and run records live under the OS data directory by default. The
//! `TZLINK_HOME` variable overrides the base for tests or portable setups.

use std::{
    path::PathBuf,
    sync::{LazyLock, Mutex},
};

use directories::BaseDirs;
use thiserror::Error;

/// Name of the application directory that lives under the OS data root.
pub const APP_DIR_NAME: &str = ".tzlink";

static BASE_OVERRIDE: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));

/// Errors that can occur while resolving or preparing application directories.
#[derive(Debug, Error)]
pub enum AppDirError {
    /// No suitable base directory could be resolved.
    #[error("No suitable base directory available for application files")]
    NoBaseDir,
    /// Failed to create the application directory.
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Return the root `.tzlink` directory, creating it if needed.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    let base = base_dir().ok_or(AppDirError::NoBaseDir)?;
    ensure_dir(base.join(APP_DIR_NAME))
}

/// Return the logs directory inside the `.tzlink` root, creating it if needed.
pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    ensure_dir(app_root_dir()?.join("logs"))
}

/// Return the directory that receives recorded run summaries.
pub fn runs_dir() -> Result<PathBuf, AppDirError> {
    ensure_dir(app_root_dir()?.join("runs"))
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, AppDirError> {
    std::fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn base_dir() -> Option<PathBuf> {
    if let Some(path) = BASE_OVERRIDE.lock().ok().and_then(|guard| guard.clone()) {
        return Some(path);
    }
    if let Ok(path) = std::env::var("TZLINK_HOME") {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    BaseDirs::new().map(|dirs| dirs.data_local_dir().to_path_buf())
}

#[cfg(test)]
fn set_base_override(path: PathBuf) {
    let mut guard = BASE_OVERRIDE.lock().expect("base override mutex poisoned");
    *guard = Some(path);
}

#[cfg(test)]
fn clear_base_override() {
    let mut guard = BASE_OVERRIDE.lock().expect("base override mutex poisoned");
    *guard = None;
}
