//! Sample sets read from array archives.
//!
//! Arrays named `x_*` are model inputs (in name order), `y` holds one label
//! column and `group` assigns each row to a mention for ranking evaluation.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Axis};
use thiserror::Error;

use crate::features::archive::{self, ArchiveError};
use crate::features::{FeatureBundle, NamedArray, ScoreMatrix};

pub const INPUT_PREFIX: &str = "x_";
pub const LABELS_NAME: &str = "y";
pub const GROUPS_NAME: &str = "group";

/// Largest magnitude at which every integer is exactly representable as `f32`.
const MAX_EXACT_GROUP: i64 = 1 << 24;

#[derive(Debug, Error)]
pub enum SampleError {
    /// The archive could not be read or written.
    #[error("sample archive {path}: {source}")]
    Archive {
        path: PathBuf,
        source: ArchiveError,
    },
    /// No `x_*` arrays were found.
    #[error("sample archive {0} has no input arrays (expected names starting with 'x_')")]
    NoInputs(PathBuf),
    /// An array has a different row count than the first input.
    #[error("sample archive {path}: array '{name}' has {got} rows, expected {expected}")]
    RowMismatch {
        path: PathBuf,
        name: String,
        expected: usize,
        got: usize,
    },
    /// A label or group array has more than one column.
    #[error("sample archive {path}: array '{name}' must have exactly one column")]
    NotAColumn { path: PathBuf, name: String },
    /// Labels were needed but the set has none.
    #[error("sample set has no labels")]
    Unlabelled,
    /// A mention id that the `f32` archive column cannot hold exactly.
    #[error("sample archive {path}: group id {value} is not an exact integer below 2^24")]
    GroupId { path: PathBuf, value: f64 },
}

/// Model inputs with optional labels, mention groups and, after prediction, scores.
#[derive(Debug, Clone, Default)]
pub struct SampleSet {
    pub x: FeatureBundle,
    pub y: Option<Vec<f32>>,
    pub groups: Option<Vec<i64>>,
    pub scores: Option<ScoreMatrix>,
}

impl SampleSet {
    pub fn rows(&self) -> usize {
        self.x.rows().unwrap_or(0)
    }

    pub fn labels(&self) -> Result<&[f32], SampleError> {
        self.y.as_deref().ok_or(SampleError::Unlabelled)
    }
}

/// Load a sample set from an array archive.
pub fn load_samples(path: &Path) -> Result<SampleSet, SampleError> {
    let arrays = archive::read_arrays(path).map_err(|source| SampleError::Archive {
        path: path.to_path_buf(),
        source,
    })?;
    let mut samples = SampleSet::default();
    for array in arrays {
        if array.name.starts_with(INPUT_PREFIX) {
            samples.x.push(array);
        } else if array.name == LABELS_NAME {
            samples.y = Some(single_column(path, &array)?);
        } else if array.name == GROUPS_NAME {
            let column = single_column(path, &array)?;
            samples.groups = Some(
                column
                    .into_iter()
                    .map(|value| group_from_f32(path, value))
                    .collect::<Result<_, _>>()?,
            );
        } else {
            tracing::debug!("Ignoring array '{}' in {}", array.name, path.display());
        }
    }
    let Some(first) = samples.x.arrays().first() else {
        return Err(SampleError::NoInputs(path.to_path_buf()));
    };
    let expected = first.data.nrows();
    for array in samples.x.arrays() {
        check_rows(path, &array.name, expected, array.data.nrows())?;
    }
    if let Some(y) = &samples.y {
        check_rows(path, LABELS_NAME, expected, y.len())?;
    }
    if let Some(groups) = &samples.groups {
        check_rows(path, GROUPS_NAME, expected, groups.len())?;
    }
    tracing::debug!(
        "Loaded {} samples with {} inputs from {}",
        expected,
        samples.x.len(),
        path.display()
    );
    Ok(samples)
}

/// Write a sample set (inputs, labels, groups) to an array archive.
pub fn write_samples(path: &Path, samples: &SampleSet) -> Result<(), SampleError> {
    let mut arrays: Vec<NamedArray> = samples.x.arrays().to_vec();
    if let Some(y) = &samples.y {
        arrays.push(NamedArray::new(LABELS_NAME, column(y.iter().copied())));
    }
    if let Some(groups) = &samples.groups {
        if let Some(&group) = groups.iter().find(|group| group.abs() > MAX_EXACT_GROUP) {
            return Err(SampleError::GroupId {
                path: path.to_path_buf(),
                value: group as f64,
            });
        }
        arrays.push(NamedArray::new(
            GROUPS_NAME,
            column(groups.iter().map(|&group| group as f32)),
        ));
    }
    archive::write_arrays(path, &arrays).map_err(|source| SampleError::Archive {
        path: path.to_path_buf(),
        source,
    })
}

fn group_from_f32(path: &Path, value: f32) -> Result<i64, SampleError> {
    if !value.is_finite() || value.fract() != 0.0 || value.abs() > MAX_EXACT_GROUP as f32 {
        return Err(SampleError::GroupId {
            path: path.to_path_buf(),
            value: f64::from(value),
        });
    }
    Ok(value as i64)
}

fn column(values: impl Iterator<Item = f32>) -> Array2<f32> {
    Array1::from_iter(values).insert_axis(Axis(1))
}

fn single_column(path: &Path, array: &NamedArray) -> Result<Vec<f32>, SampleError> {
    if array.data.ncols() != 1 {
        return Err(SampleError::NotAColumn {
            path: path.to_path_buf(),
            name: array.name.clone(),
        });
    }
    Ok(array.data.column(0).to_vec())
}

fn check_rows(path: &Path, name: &str, expected: usize, got: usize) -> Result<(), SampleError> {
    if expected != got {
        return Err(SampleError::RowMismatch {
            path: path.to_path_buf(),
            name: name.to_string(),
            expected,
            got,
        });
    }
    Ok(())
}
