//! Evaluation metrics for ranking and classification predictions.

use std::collections::BTreeMap;

/// Confusion matrix for a `K`-class classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u32>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    /// Out-of-range classes are ignored.
    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }
}

/// Precision/recall statistics for a single class.
#[derive(Debug, Clone, PartialEq)]
pub struct PerClassStats {
    /// `TP / (TP + FP)`.
    pub precision: f32,
    /// `TP / (TP + FN)`.
    pub recall: f32,
    /// Total number of true examples for the class.
    pub support: u32,
}

pub fn precision_recall_by_class(cm: &ConfusionMatrix) -> Vec<PerClassStats> {
    let k = cm.n_classes;
    (0..k)
        .map(|class_idx| {
            let tp = cm.get(class_idx, class_idx) as f32;
            let mut fp = 0f32;
            let mut fn_ = 0f32;
            let mut support = 0u32;
            for j in 0..k {
                let v = cm.get(class_idx, j);
                support = support.saturating_add(v);
                if j != class_idx {
                    fn_ += v as f32;
                }
                if j != class_idx {
                    fp += cm.get(j, class_idx) as f32;
                }
            }
            PerClassStats {
                precision: if tp + fp == 0.0 { 0.0 } else { tp / (tp + fp) },
                recall: if tp + fn_ == 0.0 { 0.0 } else { tp / (tp + fn_) },
                support,
            }
        })
        .collect()
}

pub fn accuracy(cm: &ConfusionMatrix) -> f32 {
    let mut correct = 0u64;
    let mut total = 0u64;
    for truth in 0..cm.n_classes {
        for predicted in 0..cm.n_classes {
            let v = cm.get(truth, predicted) as u64;
            total += v;
            if truth == predicted {
                correct += v;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        correct as f32 / total as f32
    }
}

/// Index of the largest value; the first wins on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in values.iter().enumerate() {
        match best {
            Some((_, top)) if value <= top => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Ranking quality over mention groups.
#[derive(Debug, Clone, PartialEq)]
pub struct RankStats {
    /// Groups whose top-scored candidate is labelled positive.
    pub correct: usize,
    pub groups: usize,
    pub mean_positive: Option<f32>,
    pub mean_negative: Option<f32>,
}

impl RankStats {
    pub fn accuracy(&self) -> f32 {
        if self.groups == 0 {
            0.0
        } else {
            self.correct as f32 / self.groups as f32
        }
    }
}

/// Accuracy@1 per group plus mean scores of positive and negative rows.
///
/// Without groups every row counts as its own mention.
pub fn rank_stats(scores: &[f32], labels: &[f32], groups: Option<&[i64]>) -> RankStats {
    let mut by_group: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for row in 0..scores.len().min(labels.len()) {
        let key = groups
            .and_then(|groups| groups.get(row).copied())
            .unwrap_or(row as i64);
        by_group.entry(key).or_default().push(row);
    }
    let mut correct = 0;
    for rows in by_group.values() {
        let group_scores: Vec<f32> = rows.iter().map(|&row| scores[row]).collect();
        if let Some(top) = argmax(&group_scores) {
            if labels[rows[top]] > 0.5 {
                correct += 1;
            }
        }
    }
    let mean = |positive: bool| {
        let picked: Vec<f32> = scores
            .iter()
            .zip(labels)
            .filter(|(_, label)| (**label > 0.5) == positive)
            .map(|(score, _)| *score)
            .collect();
        (!picked.is_empty()).then(|| picked.iter().sum::<f32>() / picked.len() as f32)
    };
    RankStats {
        correct,
        groups: by_group.len(),
        mean_positive: mean(true),
        mean_negative: mean(false),
    }
}
