use burn::tensor::activation::{relu, sigmoid, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use ndarray::{Array2, s};

use super::{DenseLayer, LayerRegistry, ModelArtifact, ModelError, OutputActivation, PairLayer};
use crate::features::{FeatureBundle, ScoreMatrix};

/// A model artifact bound to one backend device.
pub struct RankNetwork<B: Backend> {
    encoder: Dense<B>,
    similarity: PairLayer,
    head: Dense<B>,
    output: OutputActivation,
    input_dims: Vec<usize>,
    hidden_width: usize,
    device: B::Device,
}

struct Dense<B: Backend> {
    weights: Tensor<B, 2>,
    bias: Tensor<B, 2>,
    outputs: usize,
}

impl<B: Backend> Dense<B> {
    fn new(layer: &DenseLayer, device: &B::Device) -> Self {
        Self {
            weights: Tensor::from_data(
                TensorData::new(layer.weights.clone(), [layer.inputs, layer.outputs]),
                device,
            ),
            bias: Tensor::from_data(TensorData::new(layer.bias.clone(), [1, layer.outputs]), device),
            outputs: layer.outputs,
        }
    }

    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        input.matmul(self.weights.clone()).add(self.bias.clone())
    }
}

struct Batch<B: Backend> {
    mention: Tensor<B, 2>,
    candidate: Tensor<B, 2>,
    extras: Vec<Tensor<B, 2>>,
}

impl<B: Backend> RankNetwork<B> {
    pub fn new(
        artifact: &ModelArtifact,
        registry: &LayerRegistry,
        device: &B::Device,
    ) -> Result<Self, ModelError> {
        artifact.validate()?;
        let similarity = registry.build(&artifact.similarity, artifact.encoder.outputs)?;
        Ok(Self {
            encoder: Dense::new(&artifact.encoder, device),
            similarity,
            head: Dense::new(&artifact.head, device),
            output: artifact.output,
            input_dims: artifact.input_dims.clone(),
            hidden_width: artifact.hidden_width(),
            device: device.clone(),
        })
    }

    /// Score every row of `features`, `batch_size` rows at a time.
    pub fn predict(
        &self,
        features: &FeatureBundle,
        batch_size: usize,
    ) -> Result<ScoreMatrix, ModelError> {
        self.run_batches(features, batch_size, self.head.outputs, |batch| {
            self.forward(batch)
        })
    }

    /// Head inputs (similarity column followed by extra inputs) for every row.
    pub fn hidden_features(
        &self,
        features: &FeatureBundle,
        batch_size: usize,
    ) -> Result<Array2<f32>, ModelError> {
        self.run_batches(features, batch_size, self.hidden_width, |batch| {
            self.hidden(batch)
        })
    }

    fn hidden(&self, batch: Batch<B>) -> Tensor<B, 2> {
        let mention = relu(self.encoder.forward(batch.mention));
        let candidate = relu(self.encoder.forward(batch.candidate));
        let mut columns = Vec::with_capacity(1 + batch.extras.len());
        columns.push(self.similarity.forward(mention, candidate, &self.device));
        columns.extend(batch.extras);
        Tensor::cat(columns, 1)
    }

    fn forward(&self, batch: Batch<B>) -> Tensor<B, 2> {
        let logits = self.head.forward(self.hidden(batch));
        match self.output {
            OutputActivation::Sigmoid => sigmoid(logits),
            OutputActivation::Softmax => softmax(logits, 1),
            OutputActivation::Linear => logits,
        }
    }

    fn run_batches(
        &self,
        features: &FeatureBundle,
        batch_size: usize,
        width: usize,
        mut step: impl FnMut(Batch<B>) -> Tensor<B, 2>,
    ) -> Result<Array2<f32>, ModelError> {
        let rows = self.check_inputs(features)?;
        let batch_size = batch_size.max(1);
        let mut values = Vec::with_capacity(rows * width);
        let mut start = 0;
        while start < rows {
            let end = (start + batch_size).min(rows);
            let output = step(self.batch(features, start, end));
            let data = output.into_data();
            let flat = data
                .as_slice::<f32>()
                .map_err(|err| ModelError::Output(format!("{err:?}")))?;
            if flat.len() != (end - start) * width {
                return Err(ModelError::Output(format!(
                    "expected {} values for rows {start}..{end}, got {}",
                    (end - start) * width,
                    flat.len()
                )));
            }
            values.extend_from_slice(flat);
            start = end;
        }
        Array2::from_shape_vec((rows, width), values)
            .map_err(|err| ModelError::Output(err.to_string()))
    }

    fn batch(&self, features: &FeatureBundle, start: usize, end: usize) -> Batch<B> {
        let mut tensors = features.arrays().iter().map(|array| {
            let rows = array.data.slice(s![start..end, ..]);
            let values: Vec<f32> = rows.iter().copied().collect();
            Tensor::<B, 2>::from_data(
                TensorData::new(values, [end - start, array.data.ncols()]),
                &self.device,
            )
        });
        let width = self.input_dims[0];
        let empty = || Tensor::<B, 2>::zeros([end - start, width], &self.device);
        let mention = tensors.next().unwrap_or_else(empty);
        let candidate = tensors.next().unwrap_or_else(empty);
        Batch {
            mention,
            candidate,
            extras: tensors.collect(),
        }
    }

    /// Returns the shared row count once every input matches the declared dims.
    fn check_inputs(&self, features: &FeatureBundle) -> Result<usize, ModelError> {
        if features.len() != self.input_dims.len() {
            return Err(ModelError::Input(format!(
                "model takes {} inputs, got {}",
                self.input_dims.len(),
                features.len()
            )));
        }
        for (array, &dims) in features.arrays().iter().zip(&self.input_dims) {
            if array.data.ncols() != dims {
                return Err(ModelError::Input(format!(
                    "input '{}' has {} columns, model expects {dims}",
                    array.name,
                    array.data.ncols()
                )));
            }
        }
        features.rows().ok_or_else(|| {
            ModelError::Input("inputs disagree on row count".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::features::NamedArray;
    use crate::model::test_support::tiny_artifact;
    use burn::backend::ndarray::NdArrayDevice;
    use ndarray::array;

    fn features() -> FeatureBundle {
        FeatureBundle::new(vec![
            NamedArray::new("x_0", array![[1.0, 0.0], [0.0, 1.0], [3.0, 4.0]]),
            NamedArray::new("x_1", array![[1.0, 0.0], [1.0, 0.0], [3.0, 4.0]]),
            NamedArray::new("x_2", array![[0.0], [4.0], [2.0]]),
        ])
    }

    fn network(head_scale: f32) -> RankNetwork<CpuBackend> {
        RankNetwork::new(
            &tiny_artifact(head_scale),
            &LayerRegistry::with_defaults(),
            &NdArrayDevice::default(),
        )
        .unwrap()
    }

    #[test]
    fn predict_scores_similarity_plus_extra_columns() {
        let scores = network(1.0).predict(&features(), 32).unwrap();
        assert_eq!(scores.dim(), (3, 1));
        let expected = [1.0, 2.0, 2.0];
        for (got, want) in scores.column(0).iter().zip(expected) {
            assert!((got - want).abs() < 1e-4, "{got} vs {want}");
        }
    }

    #[test]
    fn batch_size_does_not_change_scores() {
        let net = network(2.0);
        let whole = net.predict(&features(), 32).unwrap();
        let single = net.predict(&features(), 1).unwrap();
        let zero = net.predict(&features(), 0).unwrap();
        assert_eq!(whole, single);
        assert_eq!(whole, zero);
    }

    #[test]
    fn hidden_features_have_head_width() {
        let hidden = network(1.0).hidden_features(&features(), 2).unwrap();
        assert_eq!(hidden.dim(), (3, 2));
        assert!((hidden[[1, 0]]).abs() < 1e-4);
        assert_eq!(hidden[[1, 1]], 4.0);
    }

    #[test]
    fn wrong_input_count_is_rejected() {
        let bundle = FeatureBundle::new(features().arrays()[..2].to_vec());
        let err = network(1.0).predict(&bundle, 8).unwrap_err();
        assert!(matches!(err, ModelError::Input(_)));
    }

    #[test]
    fn wrong_column_count_is_rejected() {
        let bundle = FeatureBundle::new(vec![
            NamedArray::new("x_0", array![[1.0, 0.0, 0.0]]),
            NamedArray::new("x_1", array![[1.0, 0.0]]),
            NamedArray::new("x_2", array![[0.0]]),
        ]);
        let err = network(1.0).predict(&bundle, 8).unwrap_err();
        assert!(matches!(err, ModelError::Input(msg) if msg.contains("x_0")));
    }

    #[test]
    fn zero_rows_give_empty_scores() {
        let bundle = FeatureBundle::new(vec![
            NamedArray::new("x_0", Array2::zeros((0, 2))),
            NamedArray::new("x_1", Array2::zeros((0, 2))),
            NamedArray::new("x_2", Array2::zeros((0, 1))),
        ]);
        let scores = network(1.0).predict(&bundle, 8).unwrap();
        assert_eq!(scores.dim(), (0, 1));
    }

    #[test]
    fn unregistered_similarity_layer_fails_binding() {
        let result = RankNetwork::<CpuBackend>::new(
            &tiny_artifact(1.0),
            &LayerRegistry::empty(),
            &NdArrayDevice::default(),
        );
        assert!(matches!(result, Err(ModelError::UnknownLayer(_))));
    }
}
