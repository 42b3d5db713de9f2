//! Configured startup scripts, run before training or loading a model.
//!
//! Each distinct script runs at most once per process, so repeated calls from
//! the predictor (in-process or inside an ensemble worker) are cheap.

use std::collections::HashSet;
use std::process::{Command, ExitStatus};
use std::sync::{LazyLock, Mutex};

use thiserror::Error;
use tracing::info;

use crate::config::RunConfig;

static COMPLETED: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

#[derive(Debug, Error)]
pub enum StartupError {
    /// The shell could not be started.
    #[error("Failed to launch startup script `{script}`: {source}")]
    Launch {
        script: String,
        source: std::io::Error,
    },
    /// The script exited unsuccessfully.
    #[error("Startup script `{script}` exited with {status}")]
    Failed { script: String, status: ExitStatus },
}

/// Run every configured startup script that has not yet run in this process.
pub fn run_scripts(conf: &RunConfig) -> Result<(), StartupError> {
    for script in &conf.startup.scripts {
        let script = script.trim();
        if script.is_empty() || already_ran(script) {
            continue;
        }
        info!("Running startup script `{script}`");
        let status = shell(script)
            .status()
            .map_err(|source| StartupError::Launch {
                script: script.to_string(),
                source,
            })?;
        if !status.success() {
            return Err(StartupError::Failed {
                script: script.to_string(),
                status,
            });
        }
        if let Ok(mut done) = COMPLETED.lock() {
            done.insert(script.to_string());
        }
    }
    Ok(())
}

fn already_ran(script: &str) -> bool {
    COMPLETED
        .lock()
        .map(|done| done.contains(script))
        .unwrap_or(false)
}

#[cfg(target_os = "windows")]
fn shell(script: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(script);
    cmd
}

#[cfg(not(target_os = "windows"))]
fn shell(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}
