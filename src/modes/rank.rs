use super::{Mode, ModeError};
use crate::features::ScoreMatrix;
use crate::metrics::rank_stats;
use crate::recorder::Summary;
use crate::samples::SampleSet;
use crate::train::Objective;

/// Candidate ranking: one score per (mention, candidate) row.
#[derive(Debug, Clone, Copy, Default)]
pub struct RankMode;

impl Mode for RankMode {
    fn name(&self) -> &'static str {
        "rank"
    }

    fn objective(&self, samples: &SampleSet) -> Result<Objective, ModeError> {
        let labels = samples.labels()?;
        if !labels.iter().any(|&y| y > 0.5) {
            return Err(ModeError::Invalid(
                "ranking samples contain no positive candidate".to_string(),
            ));
        }
        Ok(Objective::Binary)
    }

    fn evaluate(
        &self,
        samples: &SampleSet,
        scores: &ScoreMatrix,
        summary: &mut Summary,
    ) -> Result<(), ModeError> {
        if scores.ncols() != 1 {
            return Err(ModeError::Invalid(format!(
                "ranking expects one score column, got {}",
                scores.ncols()
            )));
        }
        let column = scores.column(0).to_vec();
        let stats = rank_stats(&column, samples.labels()?, samples.groups.as_deref());
        summary.line(format!(
            "accuracy@1: {:.4} ({}/{} mentions)",
            stats.accuracy(),
            stats.correct,
            stats.groups
        ));
        if let (Some(pos), Some(neg)) = (stats.mean_positive, stats.mean_negative) {
            summary.line(format!("mean score: positive {pos:.4}, negative {neg:.4}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureBundle;
    use ndarray::array;

    #[test]
    fn evaluate_reports_accuracy_at_one() {
        let samples = SampleSet {
            x: FeatureBundle::from_positional(vec![array![[0.0], [0.0], [0.0], [0.0]]]),
            y: Some(vec![1.0, 0.0, 0.0, 1.0]),
            groups: Some(vec![5, 5, 6, 6]),
            scores: None,
        };
        let mut summary = Summary::quiet();
        RankMode
            .evaluate(&samples, &array![[0.9], [0.2], [0.7], [0.1]], &mut summary)
            .unwrap();
        assert_eq!(summary.lines()[0], "accuracy@1: 0.5000 (1/2 mentions)");
        assert_eq!(summary.lines()[1], "mean score: positive 0.5000, negative 0.4500");
    }

    #[test]
    fn objective_needs_a_positive() {
        let samples = SampleSet {
            y: Some(vec![0.0, 0.0]),
            ..SampleSet::default()
        };
        assert!(matches!(RankMode.objective(&samples), Err(ModeError::Invalid(_))));
    }
}
