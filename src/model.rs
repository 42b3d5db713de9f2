//! Persisted ranking models.
//!
//! A model artifact is a JSON document. Inputs 0 and 1 (mention and candidate
//! representations) share a dense ReLU encoder, a pairwise layer reduces the two
//! encodings to one similarity column, any further inputs are appended as extra
//! columns, and a dense head with an output activation produces the scores.

mod layers;
mod loaded;
mod network;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use layers::{LayerFactory, LayerRegistry, PairLayer, PairwiseSimilarity};
pub use loaded::LoadedModel;
pub use network::RankNetwork;

/// Artifact format version written by this crate.
pub const MODEL_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum ModelError {
    /// The artifact file could not be read.
    #[error("Failed to read model {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The artifact file could not be written.
    #[error("Failed to write model {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file is not a JSON model artifact.
    #[error("Model {path} is not a valid artifact: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// The artifact could not be encoded as JSON.
    #[error("Failed to serialize model: {0}")]
    Serialize(serde_json::Error),
    /// The artifact declares a layer type that is not registered.
    #[error("Unknown layer type '{0}'")]
    UnknownLayer(String),
    /// Version or layer dimensions are inconsistent.
    #[error("Invalid model: {0}")]
    Invalid(String),
    /// Feature arrays do not match the model inputs.
    #[error("Input mismatch: {0}")]
    Input(String),
    /// Scores could not be read back from the device.
    #[error("Failed to read backend output: {0}")]
    Output(String),
}

/// Dense layer parameters; `weights` is row-major `inputs x outputs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub inputs: usize,
    pub outputs: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl DenseLayer {
    pub fn zeros(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs,
            outputs,
            weights: vec![0.0; inputs * outputs],
            bias: vec![0.0; outputs],
        }
    }

    fn validate(&self, label: &str) -> Result<(), ModelError> {
        if self.inputs == 0 || self.outputs == 0 {
            return Err(ModelError::Invalid(format!("{label} has an empty dimension")));
        }
        if self.weights.len() != self.inputs * self.outputs {
            return Err(ModelError::Invalid(format!("{label} weights length mismatch")));
        }
        if self.bias.len() != self.outputs {
            return Err(ModelError::Invalid(format!("{label} bias length mismatch")));
        }
        Ok(())
    }
}

/// Reference to a layer type resolved through the [`LayerRegistry`] at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomLayerSpec {
    pub class_name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputActivation {
    Sigmoid,
    Softmax,
    Linear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model_version: i64,
    /// Name of the mode that trained the model.
    pub mode: String,
    /// Column count of each input, in input order.
    pub input_dims: Vec<usize>,
    pub encoder: DenseLayer,
    pub similarity: CustomLayerSpec,
    pub head: DenseLayer,
    pub output: OutputActivation,
    #[serde(default)]
    pub classes: Vec<String>,
}

impl ModelArtifact {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.model_version != MODEL_VERSION {
            return Err(ModelError::Invalid(format!(
                "Unsupported model_version {} (expected {MODEL_VERSION})",
                self.model_version
            )));
        }
        if self.input_dims.len() < 2 {
            return Err(ModelError::Invalid(
                "at least two inputs (mention, candidate) are required".to_string(),
            ));
        }
        self.encoder.validate("encoder")?;
        self.head.validate("head")?;
        if self.input_dims[0] != self.encoder.inputs || self.input_dims[1] != self.encoder.inputs {
            return Err(ModelError::Invalid(format!(
                "encoder expects {} columns, inputs have {} and {}",
                self.encoder.inputs, self.input_dims[0], self.input_dims[1]
            )));
        }
        if self.head.inputs != self.hidden_width() {
            return Err(ModelError::Invalid(format!(
                "head expects {} columns, hidden layer has {}",
                self.head.inputs,
                self.hidden_width()
            )));
        }
        if !self.classes.is_empty() && self.classes.len() != self.head.outputs {
            return Err(ModelError::Invalid("classes length mismatch".to_string()));
        }
        Ok(())
    }

    /// Width of the head input: one similarity column plus all extra input columns.
    pub fn hidden_width(&self) -> usize {
        1 + self.input_dims.iter().skip(2).sum::<usize>()
    }
}

pub fn read_artifact(path: &Path) -> Result<ModelArtifact, ModelError> {
    let data = std::fs::read(path).map_err(|source| ModelError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let artifact: ModelArtifact =
        serde_json::from_slice(&data).map_err(|source| ModelError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    artifact.validate()?;
    Ok(artifact)
}

pub fn write_artifact(path: &Path, artifact: &ModelArtifact) -> Result<(), ModelError> {
    let data = serde_json::to_vec_pretty(artifact).map_err(ModelError::Serialize)?;
    std::fs::write(path, data).map_err(|source| ModelError::Write {
        path: path.to_path_buf(),
        source,
    })
}
