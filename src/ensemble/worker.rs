//! Worker side of ensemble prediction: one task in, one score archive out.

use std::io::{Read, Write};

use thiserror::Error;
use tracing::info;

use super::task::{SCORES_ARRAY, Task, WorkerReport};
use crate::backend::{ConfiguredDevices, DeviceProvider};
use crate::features::NamedArray;
use crate::features::archive::{self, ArchiveError};
use crate::predictor::{PredictError, predict_one};

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Reading the task or writing the report failed.
    #[error("worker I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The task or report could not be (de)serialized.
    #[error("invalid task: {0}")]
    Task(#[from] serde_json::Error),
    /// The feature or score archive could not be used.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    /// Loading or running the assigned model failed.
    #[error(transparent)]
    Predict(#[from] PredictError),
}

/// Read one JSON task from `reader`, score it and print the report to `writer`.
///
/// The device is resolved from the task's own configuration, so it is claimed
/// by this process only.
pub fn serve<R: Read, W: Write>(mut reader: R, mut writer: W) -> Result<WorkerReport, WorkerError> {
    let mut input = String::new();
    reader.read_to_string(&mut input)?;
    let task: Task = serde_json::from_str(&input)?;
    let devices = ConfiguredDevices::from_config(&task.config);
    let report = serve_task(&task, &devices)?;
    serde_json::to_writer(&mut writer, &report)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(report)
}

pub fn serve_task(task: &Task, devices: &dyn DeviceProvider) -> Result<WorkerReport, WorkerError> {
    let pid = std::process::id();
    info!(
        "Worker {pid} scoring model {} ({})",
        task.index,
        task.model_path.display()
    );
    let features = archive::read_bundle(&task.features_path)?;
    let scores = predict_one(
        &task.config,
        &task.model_path,
        &features,
        task.batch_size,
        devices,
    )?;
    let (rows, cols) = scores.dim();
    archive::write_arrays(&task.scores_path, &[NamedArray::new(SCORES_ARRAY, scores)])?;
    Ok(WorkerReport {
        index: task.index,
        pid,
        rows,
        cols,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::features::FeatureBundle;
    use crate::model::test_support::tiny_artifact;
    use crate::model::write_artifact;
    use crate::predictor::test_support::CountingDevices;
    use ndarray::array;
    use tempfile::tempdir;

    fn task_in(dir: &std::path::Path) -> Task {
        let features = FeatureBundle::new(vec![
            NamedArray::new("x_2", array![[0.0], [2.0]]),
            NamedArray::new("x_1", array![[1.0, 0.0], [1.0, 0.0]]),
            NamedArray::new("x_0", array![[1.0, 0.0], [0.0, 1.0]]),
        ]);
        archive::write_bundle(&dir.join("features.zip"), &features).unwrap();
        write_artifact(&dir.join("model.json"), &tiny_artifact(1.0)).unwrap();
        Task {
            index: 2,
            config: RunConfig::default(),
            model_path: dir.join("model.json"),
            features_path: dir.join("features.zip"),
            scores_path: dir.join("scores_2.zip"),
            batch_size: 1,
        }
    }

    #[test]
    fn serve_reads_task_and_writes_report_line() {
        let dir = tempdir().unwrap();
        let task = task_in(dir.path());
        let input = serde_json::to_vec(&task).unwrap();
        let mut out = Vec::new();
        let report = serve(input.as_slice(), &mut out).unwrap();
        assert_eq!(report.index, 2);
        assert_eq!((report.rows, report.cols), (2, 1));
        let line = String::from_utf8(out).unwrap();
        let parsed: WorkerReport = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed, report);
        let scores = archive::read_array(&task.scores_path, SCORES_ARRAY).unwrap();
        assert_eq!(scores.dim(), (2, 1));
    }

    #[test]
    fn inputs_are_rebuilt_in_name_order() {
        let dir = tempdir().unwrap();
        let task = task_in(dir.path());
        let devices = CountingDevices::default();
        serve_task(&task, &devices).unwrap();
        // Written as x_2, x_1, x_0; the one-column x_2 only fits last.
        let scores = archive::read_array(&task.scores_path, SCORES_ARRAY).unwrap();
        assert!((scores[[0, 0]] - 1.0).abs() < 1e-4);
        assert!((scores[[1, 0]] - 1.0).abs() < 1e-4);
        assert_eq!(devices.count(), 1);
    }

    #[test]
    fn garbage_task_is_rejected() {
        let err = serve(&b"{not a task"[..], Vec::new()).unwrap_err();
        assert!(matches!(err, WorkerError::Task(_)));
    }
}
