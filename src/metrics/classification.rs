//! Pixel-classification metrics for hyperspectral experiments.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Row-major `num_classes x num_classes` matrix, rows are true labels and
/// columns predicted labels.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    pub counts: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Result<Self> {
        if predictions.len() != ground_truth.len() {
            return Err(Error::shape_mismatch(
                &[ground_truth.len()],
                &[predictions.len()],
            ));
        }

        let mut counts = vec![0; num_classes * num_classes];
        for (&pred, &truth) in predictions.iter().zip(ground_truth) {
            if pred >= num_classes || truth >= num_classes {
                return Err(Error::Dataset(format!(
                    "Label out of range: truth {truth}, prediction {pred}, classes {num_classes}"
                )));
            }
            counts[truth * num_classes + pred] += 1;
        }

        Ok(Self {
            num_classes,
            counts,
        })
    }

    pub fn get(&self, truth: usize, pred: usize) -> usize {
        self.counts[truth * self.num_classes + pred]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    fn diagonal(&self) -> usize {
        (0..self.num_classes).map(|c| self.get(c, c)).sum()
    }

    fn row_sum(&self, truth: usize) -> usize {
        (0..self.num_classes).map(|p| self.get(truth, p)).sum()
    }

    fn column_sum(&self, pred: usize) -> usize {
        (0..self.num_classes).map(|t| self.get(t, pred)).sum()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub overall_accuracy: f64,
    /// Recall of every class; classes absent from the ground truth score 0.
    pub per_class_accuracy: Vec<f64>,
    /// Mean of `per_class_accuracy` over classes present in the ground truth.
    pub average_accuracy: f64,
    pub kappa: f64,
    pub confusion_matrix: ConfusionMatrix,
}

impl ClassificationReport {
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Result<Self> {
        let matrix = ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes)?;
        let total = matrix.total() as f64;

        let overall_accuracy = ratio(matrix.diagonal() as f64, total);

        let per_class_accuracy: Vec<f64> = (0..num_classes)
            .map(|c| ratio(matrix.get(c, c) as f64, matrix.row_sum(c) as f64))
            .collect();

        let present: Vec<f64> = (0..num_classes)
            .filter(|&c| matrix.row_sum(c) > 0)
            .map(|c| per_class_accuracy[c])
            .collect();
        let average_accuracy = ratio(present.iter().sum(), present.len() as f64);

        // Agreement expected by chance from the marginals.
        let expected = (0..num_classes)
            .map(|c| matrix.row_sum(c) as f64 * matrix.column_sum(c) as f64)
            .sum::<f64>();
        let expected = ratio(expected, total * total);
        let kappa = ratio(overall_accuracy - expected, 1.0 - expected);

        Ok(Self {
            overall_accuracy,
            per_class_accuracy,
            average_accuracy,
            kappa,
            confusion_matrix: matrix,
        })
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
