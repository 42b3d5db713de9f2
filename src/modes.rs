//! Training and evaluation modes, selected by name.

mod classify;
mod rank;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::backend::DeviceProvider;
use crate::config::RunConfig;
use crate::features::ScoreMatrix;
use crate::model::{ModelError, write_artifact};
use crate::predictor::{PredictError, predict_one};
use crate::recorder::Summary;
use crate::samples::{SampleError, SampleSet, load_samples};
use crate::train::{Objective, TrainError, TrainOptions, train_model};

pub use classify::ClassifyMode;
pub use rank::RankMode;

#[derive(Debug, Error)]
pub enum ModeError {
    /// Train or validation samples are missing or malformed.
    #[error(transparent)]
    Samples(#[from] SampleError),
    /// Fitting the model failed.
    #[error(transparent)]
    Train(#[from] TrainError),
    /// The trained artifact could not be saved.
    #[error(transparent)]
    Model(#[from] ModelError),
    /// In-process validation prediction after training failed.
    #[error(transparent)]
    Predict(#[from] PredictError),
    /// Writing prediction output failed.
    #[error("Failed to write predictions to {path}: {source}")]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Scores do not fit the samples they were attached to.
    #[error("Invalid predictions: {0}")]
    Invalid(String),
}

/// What to do with predictions once they are attached to the samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalParams {
    /// Compute and report metrics when labels are present.
    pub evaluate: bool,
    /// Write scores as JSON lines.
    pub predict_out: Option<PathBuf>,
}

impl Default for EvalParams {
    fn default() -> Self {
        Self {
            evaluate: true,
            predict_out: None,
        }
    }
}

pub trait Mode: Sync {
    fn name(&self) -> &'static str;

    /// Training target derived from the labelled training samples.
    fn objective(&self, samples: &SampleSet) -> Result<Objective, ModeError>;

    /// Report metrics for labelled samples with attached scores.
    fn evaluate(
        &self,
        samples: &SampleSet,
        scores: &ScoreMatrix,
        summary: &mut Summary,
    ) -> Result<(), ModeError>;

    /// Train, persist to `destination`, then predict on validation data if present.
    fn run_training(
        &self,
        conf: &RunConfig,
        destination: &Path,
        params: &EvalParams,
        devices: &dyn DeviceProvider,
        summary: &mut Summary,
    ) -> Result<(), ModeError> {
        let train = load_samples(&conf.train_path())?;
        let objective = self.objective(&train)?;
        let artifact = train_model(
            self.name(),
            &train,
            &objective,
            &TrainOptions::from_config(conf),
            devices,
        )?;
        write_artifact(destination, &artifact)?;
        info!("saved model to {}", destination.display());

        let val_path = conf.val_path();
        if !val_path.exists() {
            info!("no validation data at {}", val_path.display());
            return Ok(());
        }
        let mut val = load_samples(&val_path)?;
        info!("predict scores for validation data...");
        val.scores = Some(predict_one(
            conf,
            destination,
            &val.x,
            conf.rank.batch_size,
            devices,
        )?);
        self.handle_predictions(conf, &val, params, summary)
    }

    fn prediction_samples(&self, conf: &RunConfig) -> Result<SampleSet, ModeError> {
        Ok(load_samples(&conf.val_path())?)
    }

    fn handle_predictions(
        &self,
        _conf: &RunConfig,
        samples: &SampleSet,
        params: &EvalParams,
        summary: &mut Summary,
    ) -> Result<(), ModeError> {
        let scores = samples
            .scores
            .as_ref()
            .ok_or_else(|| ModeError::Invalid("no scores attached".to_string()))?;
        if scores.nrows() != samples.rows() {
            return Err(ModeError::Invalid(format!(
                "{} score rows for {} samples",
                scores.nrows(),
                samples.rows()
            )));
        }
        if let Some(path) = &params.predict_out {
            write_predictions(path, scores)?;
            summary.line(format!("predictions written to {}", path.display()));
        }
        if params.evaluate {
            if samples.y.is_some() {
                self.evaluate(samples, scores, summary)?;
            } else {
                info!("validation samples have no labels, skipping evaluation");
            }
        }
        Ok(())
    }
}

pub fn mode_by_name(name: &str) -> Option<&'static dyn Mode> {
    match name {
        "rank" => Some(&RankMode),
        "classify" => Some(&ClassifyMode),
        _ => None,
    }
}

pub fn mode_names() -> &'static [&'static str] {
    &["rank", "classify"]
}

#[derive(Serialize)]
struct PredictionLine<'a> {
    row: usize,
    scores: &'a [f32],
}

/// One JSON object per sample: `{"row": 0, "scores": [..]}`.
pub fn write_predictions(path: &Path, scores: &ScoreMatrix) -> Result<(), ModeError> {
    let output_error = |source: std::io::Error| ModeError::Output {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(output_error)?;
    let mut writer = BufWriter::new(file);
    for (row, values) in scores.rows().into_iter().enumerate() {
        let values = values.to_vec();
        let line = PredictionLine {
            row,
            scores: &values,
        };
        serde_json::to_writer(&mut writer, &line)
            .map_err(|err| output_error(std::io::Error::other(err)))?;
        writer.write_all(b"\n").map_err(output_error)?;
    }
    writer.flush().map_err(output_error)
}
