//! Set-overlap statistics between a predicted mask and a ground-truth mask.
//!
//! Counts are accumulated over every element of the inputs, so a leading batch
//! dimension is simply summed over (micro-averaging).
//!
//! Every ratio follows the same zero-division rule: when the denominator is
//! exactly zero the ratio is `0.0`. No ratio ever returns NaN or infinity.

use std::ops::Add;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Probability at or above which a predicted pixel counts as positive.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// How predicted values enter the counts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CountMode {
    /// Predictions are used as-is (fractional counts, differentiable).
    Soft,
    /// Predictions are binarised with `pred >= threshold`.
    Thresholded(f32),
}

impl CountMode {
    fn apply(&self, value: f32) -> f32 {
        match self {
            CountMode::Soft => value,
            CountMode::Thresholded(threshold) if value >= *threshold => 1.0,
            CountMode::Thresholded(_) => 0.0,
        }
    }
}

impl Default for CountMode {
    fn default() -> Self {
        CountMode::Thresholded(DEFAULT_THRESHOLD)
    }
}

/// True/false positive/negative mass of a prediction against its ground truth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positives: f64,
    pub false_positives: f64,
    pub false_negatives: f64,
    pub true_negatives: f64,
}

impl ConfusionCounts {
    pub fn soft(truth: &[f32], pred: &[f32]) -> Result<Self> {
        Self::accumulate(truth, pred, CountMode::Soft)
    }

    pub fn thresholded(truth: &[f32], pred: &[f32], threshold: f32) -> Result<Self> {
        Self::accumulate(truth, pred, CountMode::Thresholded(threshold))
    }

    pub fn accumulate(truth: &[f32], pred: &[f32], mode: CountMode) -> Result<Self> {
        if truth.len() != pred.len() {
            return Err(Error::shape_mismatch(&[truth.len()], &[pred.len()]));
        }

        let mut counts = Self::default();
        for (&t, &p) in truth.iter().zip(pred) {
            let t = t as f64;
            let p = mode.apply(p) as f64;

            counts.true_positives += p * t;
            counts.false_positives += p * (1.0 - t);
            counts.false_negatives += (1.0 - p) * t;
            counts.true_negatives += (1.0 - p) * (1.0 - t);
        }

        Ok(counts)
    }

    /// Counts computed on device; only the four sums are transferred back.
    pub fn from_tensors<B: Backend, const D: usize>(
        truth: Tensor<B, D>,
        pred: Tensor<B, D>,
        mode: CountMode,
    ) -> Result<Self> {
        let (truth_dims, pred_dims) = (truth.dims(), pred.dims());
        if truth_dims != pred_dims {
            return Err(Error::shape_mismatch(&truth_dims, &pred_dims));
        }

        let pred = match mode {
            CountMode::Soft => pred,
            CountMode::Thresholded(threshold) => pred.greater_equal_elem(threshold).float(),
        };
        let not_pred = pred.ones_like() - pred.clone();
        let not_truth = truth.ones_like() - truth.clone();

        let total = |tensor: Tensor<B, D>| tensor.sum().into_scalar().elem::<f64>();

        Ok(Self {
            true_positives: total(pred.clone() * truth.clone()),
            false_positives: total(pred * not_truth.clone()),
            false_negatives: total(not_pred.clone() * truth),
            true_negatives: total(not_pred * not_truth),
        })
    }

    pub fn jaccard_index(&self) -> f64 {
        ratio(
            self.true_positives,
            self.true_positives + self.false_positives + self.false_negatives,
        )
    }

    pub fn jaccard_loss(&self) -> f64 {
        1.0 - self.jaccard_index()
    }

    pub fn dice_coefficient(&self) -> f64 {
        ratio(
            2.0 * self.true_positives,
            2.0 * self.true_positives + self.false_positives + self.false_negatives,
        )
    }

    pub fn recall(&self) -> f64 {
        ratio(
            self.true_positives,
            self.true_positives + self.false_negatives,
        )
    }

    pub fn precision(&self) -> f64 {
        ratio(
            self.true_positives,
            self.true_positives + self.false_positives,
        )
    }

    pub fn specificity(&self) -> f64 {
        ratio(
            self.true_negatives,
            self.true_negatives + self.false_positives,
        )
    }

    /// Harmonic mean of precision and recall, which for binary masks is the
    /// Dice coefficient.
    pub fn f1_score(&self) -> f64 {
        self.dice_coefficient()
    }

    pub fn report(&self) -> OverlapReport {
        OverlapReport {
            jaccard_index: self.jaccard_index(),
            jaccard_loss: self.jaccard_loss(),
            dice_coefficient: self.dice_coefficient(),
            recall: self.recall(),
            precision: self.precision(),
            specificity: self.specificity(),
            f1_score: self.f1_score(),
        }
    }
}

impl Add for ConfusionCounts {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            true_positives: self.true_positives + other.true_positives,
            false_positives: self.false_positives + other.false_positives,
            false_negatives: self.false_negatives + other.false_negatives,
            true_negatives: self.true_negatives + other.true_negatives,
        }
    }
}

/// All overlap ratios of one set of counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlapReport {
    pub jaccard_index: f64,
    pub jaccard_loss: f64,
    pub dice_coefficient: f64,
    pub recall: f64,
    pub precision: f64,
    pub specificity: f64,
    pub f1_score: f64,
}

impl OverlapReport {
    pub fn entries(&self) -> [(&'static str, f64); 7] {
        [
            ("jaccard_index", self.jaccard_index),
            ("jaccard_loss", self.jaccard_loss),
            ("dice_coefficient", self.dice_coefficient),
            ("recall", self.recall),
            ("precision", self.precision),
            ("specificity", self.specificity),
            ("f1_score", self.f1_score),
        ]
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    const EPS: f64 = 1e-6;

    const ALL_ONES: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

    // (truth, pred, jaccard_loss, jaccard, dice, recall, precision, specificity)
    const FIXTURES: [([f32; 4], [f32; 4], [f64; 6]); 7] = [
        (ALL_ONES, ALL_ONES, [0.0, 1.0, 1.0, 1.0, 1.0, 0.0]),
        ([0.0, 1.0, 1.0, 1.0], ALL_ONES, [0.25, 0.75, 6.0 / 7.0, 1.0, 0.75, 0.0]),
        ([0.0, 1.0, 0.0, 1.0], ALL_ONES, [0.5, 0.5, 2.0 / 3.0, 1.0, 0.5, 0.0]),
        ([0.0, 0.0, 0.0, 1.0], ALL_ONES, [0.75, 0.25, 0.4, 1.0, 0.25, 0.0]),
        ([0.0, 0.0, 0.0, 0.0], ALL_ONES, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        (
            [1.0, 1.0, 0.0, 0.0],
            [0.25, 0.25, 0.0, 0.0],
            [0.75, 0.0, 0.0, 0.0, 0.0, 1.0],
        ),
        (
            [1.0, 1.0, 0.0, 0.0],
            [0.75, 0.75, 0.0, 0.0],
            [0.25, 1.0, 1.0, 1.0, 1.0, 1.0],
        ),
    ];

    fn assert_close(actual: f64, expected: f64, what: &str) {
        assert!(
            (actual - expected).abs() < EPS,
            "{what}: expected {expected}, got {actual}"
        );
    }

    #[test]
    fn matches_reference_fixtures() {
        for (truth, pred, expected) in FIXTURES {
            let [loss, jaccard, dice, recall, precision, specificity] = expected;
            let soft = ConfusionCounts::soft(&truth, &pred).unwrap();
            let hard = ConfusionCounts::thresholded(&truth, &pred, DEFAULT_THRESHOLD).unwrap();

            assert_close(soft.jaccard_loss(), loss, "jaccard loss");
            assert_close(hard.jaccard_index(), jaccard, "jaccard index");
            assert_close(hard.dice_coefficient(), dice, "dice");
            assert_close(hard.f1_score(), dice, "f1");
            assert_close(hard.recall(), recall, "recall");
            assert_close(hard.precision(), precision, "precision");
            assert_close(hard.specificity(), specificity, "specificity");
        }
    }

    #[test]
    fn identical_masks_overlap_perfectly() {
        let mask = [1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        let report = ConfusionCounts::thresholded(&mask, &mask, DEFAULT_THRESHOLD)
            .unwrap()
            .report();

        assert_close(report.jaccard_index, 1.0, "jaccard");
        assert_close(report.dice_coefficient, 1.0, "dice");
        assert_close(report.f1_score, 1.0, "f1");
        assert_close(report.recall, 1.0, "recall");
        assert_close(report.precision, 1.0, "precision");
        assert_close(report.specificity, 1.0, "specificity");
        assert_close(report.jaccard_loss, 0.0, "loss");
    }

    #[test]
    fn empty_truth_and_prediction_yield_zero_not_nan() {
        let empty = [0.0; 8];
        let counts = ConfusionCounts::soft(&empty, &empty).unwrap();

        for (name, value) in counts.report().entries() {
            assert!(value.is_finite(), "{name} is not finite");
        }
        assert_eq!(counts.jaccard_index(), 0.0);
        assert_eq!(counts.dice_coefficient(), 0.0);
        assert_eq!(counts.recall(), 0.0);
        assert_eq!(counts.precision(), 0.0);
        assert_eq!(counts.jaccard_loss(), 1.0);
        assert_eq!(counts.specificity(), 1.0);
    }

    #[test]
    fn all_positive_truth_has_zero_specificity() {
        let counts = ConfusionCounts::thresholded(&ALL_ONES, &ALL_ONES, 0.5).unwrap();
        assert_eq!(counts.true_negatives + counts.false_positives, 0.0);
        assert_eq!(counts.specificity(), 0.0);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let result = ConfusionCounts::soft(&[1.0, 0.0], &[1.0]);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn counts_accumulate_across_batches() {
        let first = ConfusionCounts::thresholded(&[1.0, 0.0], &[1.0, 1.0], 0.5).unwrap();
        let second = ConfusionCounts::thresholded(&[1.0, 1.0], &[0.0, 1.0], 0.5).unwrap();
        let joint =
            ConfusionCounts::thresholded(&[1.0, 0.0, 1.0, 1.0], &[1.0, 1.0, 0.0, 1.0], 0.5)
                .unwrap();

        assert_eq!(first + second, joint);
    }

    #[test]
    fn tensor_counts_match_slice_counts_over_a_batch() {
        let device = Default::default();
        let truth = Tensor::<TestBackend, 3>::from_floats(
            [[[0.0, 1.0], [1.0, 1.0]], [[1.0, 1.0], [0.0, 0.0]]],
            &device,
        );
        let pred = Tensor::<TestBackend, 3>::from_floats(
            [[[1.0, 1.0], [1.0, 1.0]], [[0.75, 0.25], [0.0, 0.6]]],
            &device,
        );

        let truth_flat = [0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0];
        let pred_flat = [1.0, 1.0, 1.0, 1.0, 0.75, 0.25, 0.0, 0.6];

        for mode in [CountMode::Soft, CountMode::Thresholded(0.5)] {
            let on_device =
                ConfusionCounts::from_tensors(truth.clone(), pred.clone(), mode).unwrap();
            let on_host = ConfusionCounts::accumulate(&truth_flat, &pred_flat, mode).unwrap();

            assert_close(on_device.true_positives, on_host.true_positives, "tp");
            assert_close(on_device.false_positives, on_host.false_positives, "fp");
            assert_close(on_device.false_negatives, on_host.false_negatives, "fn");
            assert_close(on_device.true_negatives, on_host.true_negatives, "tn");
        }
    }

    #[test]
    fn tensor_shape_mismatch_is_rejected() {
        let device = Default::default();
        let truth = Tensor::<TestBackend, 2>::zeros([2, 2], &device);
        let pred = Tensor::<TestBackend, 2>::zeros([2, 3], &device);

        let result = ConfusionCounts::from_tensors(truth, pred, CountMode::Soft);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }
}
