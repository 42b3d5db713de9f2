//! Named input arrays and score matrices exchanged between predictor and coordinator.

pub mod archive;

use ndarray::Array2;

/// Scores produced by one model: rows = samples, columns = output dimensions.
pub type ScoreMatrix = Array2<f32>;

/// A 2-D `f32` array with the name it is stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedArray {
    pub name: String,
    pub data: Array2<f32>,
}

impl NamedArray {
    pub fn new(name: impl Into<String>, data: Array2<f32>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Ordered model inputs.
///
/// Order matters to the model: input 0 and 1 feed the pairwise encoder, the rest
/// are appended as extra columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureBundle {
    arrays: Vec<NamedArray>,
}

impl FeatureBundle {
    pub fn new(arrays: Vec<NamedArray>) -> Self {
        Self { arrays }
    }

    /// Name unnamed inputs `x_000`, `x_001`, ... so that name order equals input order.
    pub fn from_positional(arrays: Vec<Array2<f32>>) -> Self {
        Self {
            arrays: arrays
                .into_iter()
                .enumerate()
                .map(|(idx, data)| NamedArray::new(format!("x_{idx:03}"), data))
                .collect(),
        }
    }

    pub fn push(&mut self, array: NamedArray) {
        self.arrays.push(array);
    }

    pub fn arrays(&self) -> &[NamedArray] {
        &self.arrays
    }

    pub fn names(&self) -> Vec<&str> {
        self.arrays.iter().map(|array| array.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Array2<f32>> {
        self.arrays
            .iter()
            .find(|array| array.name == name)
            .map(|array| &array.data)
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Row count shared by every input, or `None` when inputs disagree or are absent.
    pub fn rows(&self) -> Option<usize> {
        let first = self.arrays.first()?.data.nrows();
        self.arrays
            .iter()
            .all(|array| array.data.nrows() == first)
            .then_some(first)
    }

    /// Reorder arrays by lexicographic name.
    pub fn sorted_by_name(mut self) -> Self {
        self.arrays.sort_by(|a, b| a.name.cmp(&b.name));
        self
    }
}
