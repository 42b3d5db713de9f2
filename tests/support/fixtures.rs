#![allow(dead_code)]

use std::path::{Path, PathBuf};

use ndarray::{Array2, array};
use tzlink::features::{FeatureBundle, NamedArray};
use tzlink::model::{
    CustomLayerSpec, DenseLayer, MODEL_VERSION, ModelArtifact, OutputActivation,
    PairwiseSimilarity, write_artifact,
};
use tzlink::samples::{SampleSet, write_samples};

/// Fixed-weight ranking model over 2-column pair inputs and one extra column.
pub fn rank_artifact(head_scale: f32) -> ModelArtifact {
    ModelArtifact {
        model_version: MODEL_VERSION,
        mode: "rank".to_string(),
        input_dims: vec![2, 2, 1],
        encoder: DenseLayer {
            inputs: 2,
            outputs: 2,
            weights: vec![1.0, 0.0, 0.0, 1.0],
            bias: vec![0.0, 0.0],
        },
        similarity: CustomLayerSpec {
            class_name: PairwiseSimilarity::CLASS_NAME.to_string(),
            config: serde_json::Value::Null,
        },
        head: DenseLayer {
            inputs: 2,
            outputs: 1,
            weights: vec![head_scale, 0.5],
            bias: vec![0.0],
        },
        output: OutputActivation::Linear,
        classes: Vec::new(),
    }
}

pub fn write_rank_models(dir: &Path, scales: &[f32]) -> Vec<PathBuf> {
    scales
        .iter()
        .enumerate()
        .map(|(idx, &scale)| {
            let path = dir.join(format!("model_{idx}.json"));
            write_artifact(&path, &rank_artifact(scale)).expect("write model");
            path
        })
        .collect()
}

/// Four mentions with two candidates each; the first candidate is correct.
pub fn rank_samples() -> SampleSet {
    let mention: Array2<f32> = array![
        [1.0, 0.0],
        [1.0, 0.0],
        [0.0, 1.0],
        [0.0, 1.0],
        [1.0, 1.0],
        [1.0, 1.0],
        [2.0, 0.5],
        [2.0, 0.5]
    ];
    let candidate: Array2<f32> = array![
        [1.0, 0.1],
        [0.0, 1.0],
        [0.1, 1.0],
        [1.0, 0.0],
        [1.0, 0.9],
        [1.0, 0.0],
        [2.0, 0.4],
        [0.0, 2.0]
    ];
    let extra: Array2<f32> = array![[1.0], [-1.0], [1.0], [-1.0], [1.0], [-1.0], [1.0], [-1.0]];
    SampleSet {
        x: FeatureBundle::new(vec![
            NamedArray::new("x_0_mention", mention),
            NamedArray::new("x_1_candidate", candidate),
            NamedArray::new("x_2_prior", extra),
        ]),
        y: Some(vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0]),
        groups: Some(vec![0, 0, 1, 1, 2, 2, 3, 3]),
        scores: None,
    }
}

/// Write `train.zip` and `val.zip` plus a config pointing at them.
///
/// `extra_toml` is appended inside the `[rank]` table.
pub fn write_rank_workspace(dir: &Path, extra_toml: &str) -> PathBuf {
    let data = dir.join("data");
    std::fs::create_dir_all(&data).expect("create data dir");
    write_samples(&data.join("train.zip"), &rank_samples()).expect("write train samples");
    write_samples(&data.join("val.zip"), &rank_samples()).expect("write val samples");
    let config = dir.join("tzlink.toml");
    let toml = format!(
        "[data]\ndir = \"data\"\n\n[rank]\nbatch_size = 3\nepochs = 50\nhidden_size = 4\n{extra_toml}\n"
    );
    std::fs::write(&config, toml).expect("write config");
    config
}
