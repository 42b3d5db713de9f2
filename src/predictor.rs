//! Single-model prediction, shared by the in-process path and ensemble workers.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::backend::{DeviceError, DeviceProvider};
use crate::config::RunConfig;
use crate::features::{FeatureBundle, ScoreMatrix};
use crate::model::{LayerRegistry, LoadedModel, ModelError};
use crate::startup::{self, StartupError};

#[derive(Debug, Error)]
pub enum PredictError {
    /// A configured startup script failed.
    #[error(transparent)]
    Startup(#[from] StartupError),
    /// No scoring device could be acquired.
    #[error(transparent)]
    Device(#[from] DeviceError),
    /// Loading or running the model failed.
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Load one model and score `features` in batches of `batch_size` rows.
///
/// The device is acquired here, inside whichever process ends up scoring.
pub fn predict_one(
    conf: &RunConfig,
    model_path: &Path,
    features: &FeatureBundle,
    batch_size: usize,
    devices: &dyn DeviceProvider,
) -> Result<ScoreMatrix, PredictError> {
    startup::run_scripts(conf)?;
    let device = devices.acquire()?;
    info!("load pretrained model from {}", model_path.display());
    let model = LoadedModel::load(model_path, &LayerRegistry::with_defaults(), &device)?;
    let scores = model.predict(features, batch_size)?;
    debug!(
        "Scored {} rows x {} outputs with {}",
        scores.nrows(),
        scores.ncols(),
        model_path.display()
    );
    Ok(scores)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::backend::{DeviceError, DeviceProvider, ScoringDevice};

    /// CPU provider that counts how often a device was acquired.
    #[derive(Default)]
    pub(crate) struct CountingDevices {
        acquired: AtomicUsize,
    }

    impl CountingDevices {
        pub(crate) fn count(&self) -> usize {
            self.acquired.load(Ordering::SeqCst)
        }
    }

    impl DeviceProvider for CountingDevices {
        fn acquire(&self) -> Result<ScoringDevice, DeviceError> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(ScoringDevice::cpu())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::CountingDevices;
    use super::*;
    use crate::features::NamedArray;
    use crate::model::test_support::tiny_artifact;
    use crate::model::write_artifact;
    use ndarray::array;
    use tempfile::tempdir;

    fn features() -> FeatureBundle {
        FeatureBundle::new(vec![
            NamedArray::new("x_0", array![[1.0, 0.0], [0.0, 1.0]]),
            NamedArray::new("x_1", array![[1.0, 0.0], [1.0, 0.0]]),
            NamedArray::new("x_2", array![[0.0], [2.0]]),
        ])
    }

    #[test]
    fn predict_one_acquires_one_device_and_scores_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        write_artifact(&path, &tiny_artifact(1.0)).unwrap();
        let devices = CountingDevices::default();
        let scores =
            predict_one(&RunConfig::default(), &path, &features(), 1, &devices).unwrap();
        assert_eq!(scores.dim(), (2, 1));
        assert_eq!(devices.count(), 1);
    }

    #[test]
    fn missing_model_is_a_model_error() {
        let dir = tempdir().unwrap();
        let devices = CountingDevices::default();
        let err = predict_one(
            &RunConfig::default(),
            &dir.path().join("absent.json"),
            &features(),
            4,
            &devices,
        )
        .unwrap_err();
        assert!(matches!(err, PredictError::Model(ModelError::Read { .. })));
    }
}
