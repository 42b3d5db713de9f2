//! Training of the dense scoring head on top of a seeded pair encoder.

use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng, seq::SliceRandom};
use thiserror::Error;
use tracing::{debug, info};

use crate::backend::{DeviceError, DeviceProvider};
use crate::config::RunConfig;
use crate::model::{
    CustomLayerSpec, DenseLayer, LayerRegistry, LoadedModel, MODEL_VERSION, ModelArtifact,
    ModelError, OutputActivation, PairwiseSimilarity,
};
use crate::samples::{SampleError, SampleSet};

#[derive(Debug, Error)]
pub enum TrainError {
    /// The training samples are unlabelled or malformed.
    #[error(transparent)]
    Samples(#[from] SampleError),
    /// No device could be acquired for feature extraction.
    #[error(transparent)]
    Device(#[from] DeviceError),
    /// The fresh network could not be built.
    #[error(transparent)]
    Model(#[from] ModelError),
    /// The training set cannot be used for this objective.
    #[error("Invalid training data: {0}")]
    Invalid(String),
}

/// What the head is trained to predict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Objective {
    /// One sigmoid output: is this candidate the right one.
    Binary,
    /// One softmax output per class.
    Multiclass { classes: Vec<String> },
}

impl Objective {
    fn outputs(&self) -> usize {
        match self {
            Objective::Binary => 1,
            Objective::Multiclass { classes } => classes.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub epochs: usize,
    pub learning_rate: f32,
    pub l2: f32,
    pub batch_size: usize,
    pub hidden_size: usize,
    pub seed: u64,
}

impl TrainOptions {
    pub fn from_config(conf: &RunConfig) -> Self {
        Self {
            epochs: conf.rank.epochs,
            learning_rate: conf.rank.learning_rate,
            l2: conf.rank.l2,
            batch_size: conf.rank.batch_size,
            hidden_size: conf.rank.hidden_size,
            seed: conf.general.seed,
        }
    }
}

/// Train a model artifact for `samples`.
///
/// The encoder is initialised from the seeded RNG and kept fixed; the head is
/// fitted by mini-batch SGD with L2 on the hidden features of the network.
pub fn train_model(
    mode: &str,
    samples: &SampleSet,
    objective: &Objective,
    options: &TrainOptions,
    devices: &dyn DeviceProvider,
) -> Result<ModelArtifact, TrainError> {
    let labels = samples.labels()?;
    let rows = samples.rows();
    if rows == 0 {
        return Err(TrainError::Invalid("Empty training set".to_string()));
    }
    let input_dims: Vec<usize> = samples.x.arrays().iter().map(|a| a.data.ncols()).collect();
    if input_dims.len() < 2 || input_dims[0] != input_dims[1] {
        return Err(TrainError::Invalid(format!(
            "need two equally wide pair inputs, got widths {input_dims:?}"
        )));
    }
    let targets = targets(labels, objective)?;
    let hidden_width = 1 + input_dims.iter().skip(2).sum::<usize>();

    let mut rng = StdRng::seed_from_u64(options.seed);
    let encoder = glorot_dense(input_dims[0], options.hidden_size.max(1), &mut rng);
    let mut artifact = ModelArtifact {
        model_version: MODEL_VERSION,
        mode: mode.to_string(),
        input_dims,
        encoder,
        similarity: CustomLayerSpec {
            class_name: PairwiseSimilarity::CLASS_NAME.to_string(),
            config: serde_json::Value::Null,
        },
        head: DenseLayer::zeros(hidden_width, objective.outputs()),
        output: match objective {
            Objective::Binary => OutputActivation::Sigmoid,
            Objective::Multiclass { .. } => OutputActivation::Softmax,
        },
        classes: match objective {
            Objective::Binary => Vec::new(),
            Objective::Multiclass { classes } => classes.clone(),
        },
    };

    let device = devices.acquire()?;
    let network = LoadedModel::from_artifact(&artifact, &LayerRegistry::with_defaults(), &device)?;
    let hidden = network.hidden_features(&samples.x, options.batch_size)?;
    debug!("Computed {}x{} hidden features", hidden.nrows(), hidden.ncols());

    info!(
        "Training {} head on {rows} samples for {} epochs",
        mode, options.epochs
    );
    artifact.head = fit_head(&hidden, &targets, objective.outputs(), options, &mut rng);
    artifact.validate()?;
    Ok(artifact)
}

fn targets(labels: &[f32], objective: &Objective) -> Result<Vec<usize>, TrainError> {
    match objective {
        Objective::Binary => Ok(labels.iter().map(|&y| usize::from(y > 0.5)).collect()),
        Objective::Multiclass { classes } => labels
            .iter()
            .map(|&y| {
                let class = y.round();
                if y < 0.0 || class as usize >= classes.len() || (y - class).abs() > 1e-6 {
                    Err(TrainError::Invalid(format!("label {y} is not a class index")))
                } else {
                    Ok(class as usize)
                }
            })
            .collect(),
    }
}

fn glorot_dense(inputs: usize, outputs: usize, rng: &mut StdRng) -> DenseLayer {
    let limit = (6.0 / (inputs + outputs) as f32).sqrt();
    let mut layer = DenseLayer::zeros(inputs, outputs);
    for w in &mut layer.weights {
        *w = (rng.random::<f32>() * 2.0 - 1.0) * limit;
    }
    layer
}

fn fit_head(
    hidden: &Array2<f32>,
    targets: &[usize],
    outputs: usize,
    options: &TrainOptions,
    rng: &mut StdRng,
) -> DenseLayer {
    let dim = hidden.ncols();
    let mut head = DenseLayer::zeros(dim, outputs);
    for w in &mut head.weights {
        *w = (rng.random::<f32>() - 0.5) * 0.01;
    }
    let mut indices: Vec<usize> = (0..hidden.nrows()).collect();
    let batch_size = options.batch_size.max(1);
    let lr = options.learning_rate;
    let l2 = options.l2.max(0.0);

    for _epoch in 0..options.epochs {
        indices.shuffle(rng);
        for chunk in indices.chunks(batch_size) {
            let mut grad_w = vec![0.0f32; head.weights.len()];
            let mut grad_b = vec![0.0f32; outputs];
            for &idx in chunk {
                let x = hidden.row(idx);
                let probs = head_probabilities(&head, x, outputs);
                for (c, prob) in probs.iter().enumerate() {
                    let truth = if outputs == 1 {
                        targets[idx] as f32
                    } else if c == targets[idx] {
                        1.0
                    } else {
                        0.0
                    };
                    let diff = prob - truth;
                    for (i, value) in x.iter().enumerate() {
                        grad_w[i * outputs + c] += diff * value;
                    }
                    grad_b[c] += diff;
                }
            }
            let inv = 1.0 / chunk.len() as f32;
            for (w, g) in head.weights.iter_mut().zip(&grad_w) {
                *w -= lr * (g * inv + l2 * *w);
            }
            for (b, g) in head.bias.iter_mut().zip(&grad_b) {
                *b -= lr * g * inv;
            }
        }
    }
    head
}

/// Sigmoid for a single output, softmax otherwise.
fn head_probabilities(head: &DenseLayer, x: ArrayView1<f32>, outputs: usize) -> Vec<f32> {
    let mut logits = head.bias.clone();
    for (i, value) in x.iter().enumerate() {
        for (c, logit) in logits.iter_mut().enumerate() {
            *logit += head.weights[i * outputs + c] * value;
        }
    }
    if outputs == 1 {
        return vec![1.0 / (1.0 + (-logits[0]).exp())];
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|v| v / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureBundle, NamedArray};
    use crate::predictor::test_support::CountingDevices;
    use ndarray::array;

    fn options() -> TrainOptions {
        TrainOptions {
            epochs: 200,
            learning_rate: 0.5,
            l2: 0.0,
            batch_size: 4,
            hidden_size: 4,
            seed: 7,
        }
    }

    /// The extra column alone separates positives from negatives.
    fn separable_samples() -> SampleSet {
        SampleSet {
            x: FeatureBundle::new(vec![
                NamedArray::new("x_0", array![[1.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 1.0]]),
                NamedArray::new("x_1", array![[1.0, 0.0], [0.0, 1.0], [0.0, 1.0], [1.0, 0.0]]),
                NamedArray::new("x_2", array![[2.0], [-2.0], [2.0], [-2.0]]),
            ]),
            y: Some(vec![1.0, 0.0, 1.0, 0.0]),
            groups: Some(vec![0, 0, 1, 1]),
            scores: None,
        }
    }

    #[test]
    fn binary_head_learns_separable_data() {
        let devices = CountingDevices::default();
        let artifact = train_model(
            "rank",
            &separable_samples(),
            &Objective::Binary,
            &options(),
            &devices,
        )
        .unwrap();
        assert_eq!(artifact.output, OutputActivation::Sigmoid);
        assert_eq!(artifact.head.inputs, 2);
        assert_eq!(devices.count(), 1);

        let model = LoadedModel::from_artifact(
            &artifact,
            &LayerRegistry::with_defaults(),
            &crate::backend::ScoringDevice::cpu(),
        )
        .unwrap();
        let scores = model.predict(&separable_samples().x, 2).unwrap();
        assert!(scores[[0, 0]] > 0.5 && scores[[2, 0]] > 0.5);
        assert!(scores[[1, 0]] < 0.5 && scores[[3, 0]] < 0.5);
    }

    #[test]
    fn same_seed_gives_same_model() {
        let devices = CountingDevices::default();
        let a = train_model("rank", &separable_samples(), &Objective::Binary, &options(), &devices);
        let b = train_model("rank", &separable_samples(), &Objective::Binary, &options(), &devices);
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[test]
    fn multiclass_rejects_fractional_labels() {
        let mut samples = separable_samples();
        samples.y = Some(vec![0.0, 1.5, 1.0, 0.0]);
        let objective = Objective::Multiclass {
            classes: vec!["0".to_string(), "1".to_string()],
        };
        let err = train_model(
            "classify",
            &samples,
            &objective,
            &options(),
            &CountingDevices::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TrainError::Invalid(_)));
    }

    #[test]
    fn unlabelled_samples_are_rejected() {
        let mut samples = separable_samples();
        samples.y = None;
        let err = train_model(
            "rank",
            &samples,
            &Objective::Binary,
            &options(),
            &CountingDevices::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TrainError::Samples(SampleError::Unlabelled)));
    }
}
