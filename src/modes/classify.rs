use super::{Mode, ModeError};
use crate::features::ScoreMatrix;
use crate::metrics::{ConfusionMatrix, accuracy, argmax, precision_recall_by_class};
use crate::recorder::Summary;
use crate::samples::SampleSet;
use crate::train::Objective;

/// Direct classification: one softmax score per class and row.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifyMode;

impl Mode for ClassifyMode {
    fn name(&self) -> &'static str {
        "classify"
    }

    fn objective(&self, samples: &SampleSet) -> Result<Objective, ModeError> {
        let labels = samples.labels()?;
        let max = labels.iter().copied().fold(0.0f32, f32::max);
        let n_classes = max.round() as usize + 1;
        if n_classes < 2 {
            return Err(ModeError::Invalid(
                "classification needs at least two classes".to_string(),
            ));
        }
        Ok(Objective::Multiclass {
            classes: (0..n_classes).map(|class| class.to_string()).collect(),
        })
    }

    fn evaluate(
        &self,
        samples: &SampleSet,
        scores: &ScoreMatrix,
        summary: &mut Summary,
    ) -> Result<(), ModeError> {
        let labels = samples.labels()?;
        let mut cm = ConfusionMatrix::new(scores.ncols());
        for (row, &label) in scores.rows().into_iter().zip(labels) {
            let values = row.to_vec();
            if let Some(predicted) = argmax(&values) {
                cm.add(label.round().max(0.0) as usize, predicted);
            }
        }
        summary.line(format!("accuracy: {:.4}", accuracy(&cm)));
        for (class, stats) in precision_recall_by_class(&cm).iter().enumerate() {
            summary.line(format!(
                "class {class}: precision {:.4}, recall {:.4}, support {}",
                stats.precision, stats.recall, stats.support
            ));
        }
        Ok(())
    }
}
