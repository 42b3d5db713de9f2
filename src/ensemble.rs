//! Ensemble prediction over several independently trained models.
//!
//! A single model is scored in-process. With several models the features are
//! written once into a temporary archive and every model is scored by its own
//! short-lived child process, so memory held by one model is released before the
//! next pool slot picks up another. The coordinating process never acquires a
//! scoring device on this path.

mod pool;
mod process;
mod task;
pub mod worker;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::backend::DeviceProvider;
use crate::config::RunConfig;
use crate::features::archive::{self, ArchiveError};
use crate::features::{FeatureBundle, ScoreMatrix};
use crate::predictor::{PredictError, predict_one};

pub use process::{ProcessLauncher, WORKER_SUBCOMMAND};
pub use task::{SCORES_ARRAY, Task, WorkerOutput, WorkerReport};

const FEATURES_FILE: &str = "features.zip";

#[derive(Debug, Error)]
pub enum EnsembleError {
    /// In-process prediction of a single model failed.
    #[error(transparent)]
    Predict(#[from] PredictError),
    /// The shared feature archive could not be written.
    #[error("feature archive: {0}")]
    Archive(#[from] ArchiveError),
    /// Temporary storage or worker executable could not be prepared.
    #[error("ensemble I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The model list was empty.
    #[error("no models to predict with")]
    NoModels,
    /// A worker process failed; the whole ensemble call fails with it.
    #[error("worker {index} for model {} failed: {reason}", model.display())]
    WorkerFailure {
        index: usize,
        model: PathBuf,
        reason: String,
    },
    /// Per-model score matrices cannot be averaged.
    #[error("cannot aggregate scores: {0}")]
    Aggregation(String),
}

/// Runs one task to completion, typically in a fresh process.
pub trait WorkerLauncher: Sync {
    fn launch(&self, task: &Task) -> Result<WorkerOutput, EnsembleError>;
}

/// Scores of one ensemble member.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberScores {
    pub model_path: PathBuf,
    pub scores: ScoreMatrix,
    /// Child process that scored the model; `None` when scored in-process.
    pub worker_pid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsemblePrediction {
    pub mean: ScoreMatrix,
    /// In model order.
    pub members: Vec<MemberScores>,
}

/// Score `features` with every model in `dumpfns` and average the results.
pub fn predict(
    conf: &RunConfig,
    dumpfns: &[PathBuf],
    features: &FeatureBundle,
    devices: &dyn DeviceProvider,
) -> Result<ScoreMatrix, EnsembleError> {
    match dumpfns {
        [] => Err(EnsembleError::NoModels),
        [single] => Ok(predict_one(
            conf,
            single,
            features,
            conf.rank.batch_size,
            devices,
        )?),
        _ => {
            let launcher = ProcessLauncher::from_config(conf)?;
            Ok(predict_detailed(conf, dumpfns, features, devices, &launcher)?.mean)
        }
    }
}

/// Like [`predict`], keeping per-model scores.
///
/// `devices` is only used when there is a single model; otherwise every task
/// goes through `launcher`.
pub fn predict_detailed(
    conf: &RunConfig,
    dumpfns: &[PathBuf],
    features: &FeatureBundle,
    devices: &dyn DeviceProvider,
    launcher: &dyn WorkerLauncher,
) -> Result<EnsemblePrediction, EnsembleError> {
    if let [single] = dumpfns {
        let scores = predict_one(conf, single, features, conf.rank.batch_size, devices)?;
        return Ok(EnsemblePrediction {
            mean: scores.clone(),
            members: vec![MemberScores {
                model_path: single.clone(),
                scores,
                worker_pid: None,
            }],
        });
    }
    if dumpfns.is_empty() {
        return Err(EnsembleError::NoModels);
    }

    let workdir = tempfile::Builder::new()
        .prefix("tzlink-ensemble-")
        .tempdir()?;
    let features_path = workdir.path().join(FEATURES_FILE);
    archive::write_bundle(&features_path, features)?;
    let tasks = build_tasks(conf, dumpfns, &features_path, workdir.path());
    let workers = conf.worker_count();
    info!(
        "Predicting with {} models on {} worker processes",
        tasks.len(),
        workers.min(tasks.len())
    );

    let outputs = pool::run_ordered(tasks, workers, |task: Task| {
        let output = launcher.launch(&task)?;
        Ok::<_, EnsembleError>((task.model_path, output))
    })?;
    let members: Vec<MemberScores> = outputs
        .into_iter()
        .map(|(model_path, output)| MemberScores {
            model_path,
            scores: output.scores,
            worker_pid: output.worker_pid,
        })
        .collect();
    let matrices: Vec<ScoreMatrix> = members.iter().map(|m| m.scores.clone()).collect();
    let mean = mean_scores(&matrices)?;
    Ok(EnsemblePrediction { mean, members })
}

fn build_tasks(
    conf: &RunConfig,
    dumpfns: &[PathBuf],
    features_path: &Path,
    workdir: &Path,
) -> Vec<Task> {
    dumpfns
        .iter()
        .enumerate()
        .map(|(index, model_path)| Task {
            index,
            config: conf.clone(),
            model_path: model_path.clone(),
            features_path: features_path.to_path_buf(),
            scores_path: workdir.join(format!("scores_{index:03}.zip")),
            batch_size: conf.rank.batch_size,
        })
        .collect()
}

/// Element-wise mean of equally shaped score matrices.
pub fn mean_scores(matrices: &[ScoreMatrix]) -> Result<ScoreMatrix, EnsembleError> {
    let Some(first) = matrices.first() else {
        return Err(EnsembleError::Aggregation("no score matrices".to_string()));
    };
    let mut sum = first.clone();
    for (index, matrix) in matrices.iter().enumerate().skip(1) {
        if matrix.dim() != first.dim() {
            return Err(EnsembleError::Aggregation(format!(
                "model {index} produced {:?} scores, model 0 produced {:?}",
                matrix.dim(),
                first.dim()
            )));
        }
        sum += matrix;
    }
    sum /= matrices.len() as f32;
    Ok(sum)
}
