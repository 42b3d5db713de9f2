//! Top-level control flow: train a model or predict with one or several.

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use crate::backend::DeviceProvider;
use crate::config::{ConfigError, RunConfig};
use crate::ensemble::{self, EnsembleError};
use crate::features::ScoreMatrix;
use crate::modes::{EvalParams, Mode, ModeError};
use crate::recorder::{RecorderError, Summary};
use crate::startup::{self, StartupError};

#[derive(Debug, Error)]
pub enum RunError {
    /// The requested combination of options cannot work; nothing was started.
    #[error("{0}")]
    InvalidArguments(String),
    /// No mode is registered under this name.
    #[error("Unknown mode '{0}' (expected rank or classify)")]
    UnknownMode(String),
    /// A config file could not be read or parsed.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A startup script failed before training.
    #[error(transparent)]
    Startup(#[from] StartupError),
    /// Training, sample loading or evaluation failed.
    #[error(transparent)]
    Mode(#[from] ModeError),
    /// Prediction with one or more models failed.
    #[error(transparent)]
    Ensemble(#[from] EnsembleError),
    /// The run record could not be written.
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    /// No temporary model file could be allocated.
    #[error("Failed to create a temporary model file: {0}")]
    TempModel(std::io::Error),
}

/// What a run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// The trained model, or the models predicted with.
    pub model_paths: Vec<PathBuf>,
    /// Scores attached to the prediction samples; `None` after training.
    pub scores: Option<ScoreMatrix>,
}

/// Train (`train = true`) into at most one destination, or predict with `dumpfns`.
///
/// Option mistakes are reported before any sample, model or script is touched.
pub fn run(
    conf: &RunConfig,
    mode: &dyn Mode,
    train: bool,
    dumpfns: &[PathBuf],
    params: &EvalParams,
    devices: &dyn DeviceProvider,
    summary: &mut Summary,
) -> Result<RunOutcome, RunError> {
    if train {
        let destination = match dumpfns {
            [] => fresh_model_path()?,
            [single] => single.clone(),
            _ => {
                return Err(RunError::InvalidArguments(
                    "cannot save model to multiple files".to_string(),
                ));
            }
        };
        startup::run_scripts(conf)?;
        mode.run_training(conf, &destination, params, devices, summary)?;
        Ok(RunOutcome {
            model_paths: vec![destination],
            scores: None,
        })
    } else {
        if dumpfns.is_empty() {
            return Err(RunError::InvalidArguments(
                "no model to train or load".to_string(),
            ));
        }
        let mut samples = mode.prediction_samples(conf)?;
        samples.scores = Some(ensemble::predict(conf, dumpfns, &samples.x, devices)?);
        info!("evaluate and/or serialize...");
        mode.handle_predictions(conf, &samples, params, summary)?;
        info!("done.");
        Ok(RunOutcome {
            model_paths: dumpfns.to_vec(),
            scores: samples.scores,
        })
    }
}

/// A new, kept temporary file for a model nobody named.
fn fresh_model_path() -> Result<PathBuf, RunError> {
    let file = tempfile::Builder::new()
        .prefix("tzlink-model-")
        .suffix(".json")
        .tempfile()
        .map_err(RunError::TempModel)?;
    let (_, path) = file.keep().map_err(|err| RunError::TempModel(err.error))?;
    info!("model will be saved to {}", path.display());
    Ok(path)
}
