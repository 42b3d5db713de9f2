use std::collections::BTreeMap;

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use serde::{Deserialize, Serialize};

use super::{CustomLayerSpec, ModelError};

/// Builds a pair layer from its artifact config and the encoder width.
pub type LayerFactory = fn(&serde_json::Value, usize) -> Result<PairLayer, ModelError>;

/// Layers combining the two encoded inputs into one similarity column.
#[derive(Debug, Clone, PartialEq)]
pub enum PairLayer {
    PairwiseSimilarity(PairwiseSimilarity),
}

impl PairLayer {
    /// `left` and `right` are `[rows, width]`; the result is `[rows, 1]`.
    pub fn forward<B: Backend>(
        &self,
        left: Tensor<B, 2>,
        right: Tensor<B, 2>,
        device: &B::Device,
    ) -> Tensor<B, 2> {
        match self {
            PairLayer::PairwiseSimilarity(layer) => layer.forward(left, right, device),
        }
    }
}

fn default_epsilon() -> f32 {
    1e-6
}

/// Weighted cosine similarity between two encodings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseSimilarity {
    /// Per-dimension non-negative weights; unset means all ones.
    #[serde(default)]
    pub weights: Option<Vec<f32>>,
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,
    #[serde(skip)]
    width: usize,
}

impl PairwiseSimilarity {
    pub const CLASS_NAME: &'static str = "PairwiseSimilarity";

    pub fn from_config(config: &serde_json::Value, width: usize) -> Result<PairLayer, ModelError> {
        let mut layer = if config.is_null() {
            PairwiseSimilarity {
                weights: None,
                epsilon: default_epsilon(),
                width,
            }
        } else {
            serde_json::from_value::<PairwiseSimilarity>(config.clone()).map_err(|err| {
                ModelError::Invalid(format!("{} config: {err}", Self::CLASS_NAME))
            })?
        };
        layer.width = width;
        if let Some(weights) = &layer.weights {
            if weights.len() != width {
                return Err(ModelError::Invalid(format!(
                    "{} weights length {} does not match encoder width {width}",
                    Self::CLASS_NAME,
                    weights.len()
                )));
            }
            if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(ModelError::Invalid(format!(
                    "{} weights must be finite and non-negative",
                    Self::CLASS_NAME
                )));
            }
        }
        if !layer.epsilon.is_finite() || layer.epsilon <= 0.0 {
            return Err(ModelError::Invalid(format!(
                "{} epsilon must be > 0",
                Self::CLASS_NAME
            )));
        }
        Ok(PairLayer::PairwiseSimilarity(layer))
    }

    fn forward<B: Backend>(
        &self,
        left: Tensor<B, 2>,
        right: Tensor<B, 2>,
        device: &B::Device,
    ) -> Tensor<B, 2> {
        let weights = self
            .weights
            .clone()
            .unwrap_or_else(|| vec![1.0; self.width]);
        let w = Tensor::<B, 2>::from_data(TensorData::new(weights, [1, self.width]), device);
        let left_w = left.clone().mul(w.clone());
        let dot = left_w.clone().mul(right.clone()).sum_dim(1);
        let left_norm = left_w.mul(left).sum_dim(1).sqrt();
        let right_norm = right.clone().mul(w).mul(right).sum_dim(1).sqrt();
        dot.div(left_norm.mul(right_norm).add_scalar(self.epsilon))
    }
}

/// Maps artifact layer class names to their constructors.
#[derive(Clone)]
pub struct LayerRegistry {
    factories: BTreeMap<String, LayerFactory>,
}

impl LayerRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every layer type this crate ships.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(PairwiseSimilarity::CLASS_NAME, PairwiseSimilarity::from_config);
        registry
    }

    pub fn register(&mut self, class_name: impl Into<String>, factory: LayerFactory) {
        self.factories.insert(class_name.into(), factory);
    }

    pub fn build(&self, spec: &CustomLayerSpec, width: usize) -> Result<PairLayer, ModelError> {
        let factory = self
            .factories
            .get(&spec.class_name)
            .ok_or_else(|| ModelError::UnknownLayer(spec.class_name.clone()))?;
        factory(&spec.config, width)
    }
}

impl Default for LayerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
