//! Run summaries: printed as they are produced, optionally recorded to disk.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

use crate::app_dirs::{self, AppDirError};
use crate::config::RunConfig;
use crate::logging::{self, LoggingError};

#[derive(Debug, Error)]
pub enum RecorderError {
    /// The default runs directory could not be prepared.
    #[error(transparent)]
    Dirs(#[from] AppDirError),
    /// The record file could not be written.
    #[error("Failed to write run record {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The run record could not be encoded.
    #[error("Failed to serialize run record: {0}")]
    Serialize(#[from] serde_json::Error),
    /// A start or finish time could not be formatted.
    #[error("Failed to format run time: {0}")]
    Time(#[from] time::error::Format),
    /// The record file name stamp could not be formatted.
    #[error(transparent)]
    Stamp(#[from] LoggingError),
}

/// Result lines of a run. Every line is echoed to stdout unless quiet.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    lines: Vec<String>,
    quiet: bool,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quiet() -> Self {
        Self {
            lines: Vec::new(),
            quiet: true,
        }
    }

    pub fn line(&mut self, line: impl Into<String>) {
        let line = line.into();
        if !self.quiet {
            println!("{line}");
        }
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

#[derive(Serialize)]
struct RunRecord<'a> {
    name: &'a str,
    started: String,
    finished: String,
    config: &'a RunConfig,
    results: &'a [String],
}

/// Captures the configuration and results of one launch.
#[derive(Debug, Clone)]
pub struct Recorder {
    config: RunConfig,
    started: OffsetDateTime,
    results: Vec<String>,
}

impl Recorder {
    pub fn new(conf: &RunConfig) -> Self {
        Self {
            config: conf.clone(),
            started: logging::now_local_or_utc(),
            results: Vec::new(),
        }
    }

    pub fn record(&mut self, summary: &Summary) {
        self.results.extend(summary.lines().iter().cloned());
    }

    /// Write `<runs_dir>/<name>_<YYYY-MM-DD_HH-MM-SS>.json` and return its path.
    pub fn dump(&self) -> Result<PathBuf, RecorderError> {
        let dir = match self
            .config
            .paths
            .runs_dir
            .as_ref()
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|source| RecorderError::Write {
                    path: dir.clone(),
                    source,
                })?;
                dir.clone()
            }
            None => app_dirs::runs_dir()?,
        };
        let name = &self.config.general.name;
        let path = dir.join(format!(
            "{name}_{}.json",
            logging::format_file_stamp(self.started)?
        ));
        let record = RunRecord {
            name,
            started: self.started.format(&Rfc3339)?,
            finished: logging::now_local_or_utc().format(&Rfc3339)?,
            config: &self.config,
            results: &self.results,
        };
        let data = serde_json::to_vec_pretty(&record)?;
        std::fs::write(&path, data).map_err(|source| RecorderError::Write {
            path: path.clone(),
            source,
        })?;
        info!("Recorded run to {}", path.display());
        Ok(path)
    }
}
