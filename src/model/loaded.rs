use std::path::Path;

use ndarray::Array2;

use super::{LayerRegistry, ModelArtifact, ModelError, RankNetwork, read_artifact};
#[cfg(feature = "cuda")]
use crate::backend::CudaBackend;
use crate::backend::{CpuBackend, ScoringDevice, WgpuBackend};
use crate::features::{FeatureBundle, ScoreMatrix};

/// A network bound to whichever device was acquired for it.
pub enum LoadedModel {
    Cpu(RankNetwork<CpuBackend>),
    Wgpu(RankNetwork<WgpuBackend>),
    #[cfg(feature = "cuda")]
    Cuda(RankNetwork<CudaBackend>),
}

impl LoadedModel {
    /// Read an artifact from disk and bind it to `device`.
    pub fn load(
        path: &Path,
        registry: &LayerRegistry,
        device: &ScoringDevice,
    ) -> Result<Self, ModelError> {
        let artifact = read_artifact(path)?;
        Self::from_artifact(&artifact, registry, device)
    }

    pub fn from_artifact(
        artifact: &ModelArtifact,
        registry: &LayerRegistry,
        device: &ScoringDevice,
    ) -> Result<Self, ModelError> {
        Ok(match device {
            ScoringDevice::Cpu(device) => {
                LoadedModel::Cpu(RankNetwork::new(artifact, registry, device)?)
            }
            ScoringDevice::Wgpu(device) => {
                LoadedModel::Wgpu(RankNetwork::new(artifact, registry, device)?)
            }
            #[cfg(feature = "cuda")]
            ScoringDevice::Cuda(device) => {
                LoadedModel::Cuda(RankNetwork::new(artifact, registry, device)?)
            }
        })
    }

    pub fn predict(
        &self,
        features: &FeatureBundle,
        batch_size: usize,
    ) -> Result<ScoreMatrix, ModelError> {
        match self {
            LoadedModel::Cpu(net) => net.predict(features, batch_size),
            LoadedModel::Wgpu(net) => net.predict(features, batch_size),
            #[cfg(feature = "cuda")]
            LoadedModel::Cuda(net) => net.predict(features, batch_size),
        }
    }

    pub fn hidden_features(
        &self,
        features: &FeatureBundle,
        batch_size: usize,
    ) -> Result<Array2<f32>, ModelError> {
        match self {
            LoadedModel::Cpu(net) => net.hidden_features(features, batch_size),
            LoadedModel::Wgpu(net) => net.hidden_features(features, batch_size),
            #[cfg(feature = "cuda")]
            LoadedModel::Cuda(net) => net.hidden_features(features, batch_size),
        }
    }
}
