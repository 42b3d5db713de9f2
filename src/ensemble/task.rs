use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::features::ScoreMatrix;

/// Archive entry under which a worker stores its score matrix.
pub const SCORES_ARRAY: &str = "scores";

/// One unit of ensemble work, consumed by exactly one worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Position of the model in the ensemble; results are collected in this order.
    pub index: usize,
    pub config: RunConfig,
    pub model_path: PathBuf,
    /// Shared feature archive, written once for all tasks.
    pub features_path: PathBuf,
    /// Where the worker writes its scores.
    pub scores_path: PathBuf,
    pub batch_size: usize,
}

/// Line a worker prints on stdout after writing its scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub index: usize,
    pub pid: u32,
    pub rows: usize,
    pub cols: usize,
}

/// Scores returned by a launcher for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutput {
    pub scores: ScoreMatrix,
    /// Process that produced the scores, when they came from a child process.
    pub worker_pid: Option<u32>,
}
