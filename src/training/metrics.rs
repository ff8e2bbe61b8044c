use std::marker::PhantomData;

use burn::prelude::*;
use burn::train::metric::state::{FormatOptions, NumericMetricState};
use burn::train::metric::{Metric, MetricEntry, MetricMetadata, Numeric};
use derive_new::new;

use crate::metrics::{ConfusionCounts, CountMode, DEFAULT_THRESHOLD};
use crate::model::positive_class;

/// One ratio derived from thresholded confusion counts.
pub trait OverlapStatistic: Send + Sync {
    const NAME: &'static str;

    fn value(counts: &ConfusionCounts) -> f64;
}

macro_rules! overlap_statistic {
    ($name:ident, $display:literal, $method:ident) => {
        pub struct $name;

        impl OverlapStatistic for $name {
            const NAME: &'static str = $display;

            fn value(counts: &ConfusionCounts) -> f64 {
                counts.$method()
            }
        }
    };
}

overlap_statistic!(JaccardIndex, "Jaccard", jaccard_index);
overlap_statistic!(DiceCoefficient, "Dice", dice_coefficient);
overlap_statistic!(Recall, "Recall", recall);
overlap_statistic!(Precision, "Precision", precision);
overlap_statistic!(Specificity, "Specificity", specificity);
overlap_statistic!(F1Score, "F1", f1_score);

pub type JaccardMetric<B> = OverlapMetric<B, JaccardIndex>;
pub type DiceMetric<B> = OverlapMetric<B, DiceCoefficient>;
pub type RecallMetric<B> = OverlapMetric<B, Recall>;
pub type PrecisionMetric<B> = OverlapMetric<B, Precision>;
pub type SpecificityMetric<B> = OverlapMetric<B, Specificity>;
pub type F1Metric<B> = OverlapMetric<B, F1Score>;

/// Batch overlap statistic in percent. The positive class probability is the
/// last output channel, binarised with `>= threshold`; every non-zero target
/// is positive.
pub struct OverlapMetric<B: Backend, S: OverlapStatistic> {
    state: NumericMetricState,
    threshold: f32,
    _b: PhantomData<B>,
    _s: PhantomData<S>,
}

#[derive(new)]
pub struct OverlapInput<B: Backend> {
    outputs: Tensor<B, 4>,
    targets: Tensor<B, 4, Int>,
}

impl<B: Backend, S: OverlapStatistic> OverlapMetric<B, S> {
    pub fn new() -> Self {
        Self {
            state: NumericMetricState::default(),
            threshold: DEFAULT_THRESHOLD,
            _b: PhantomData,
            _s: PhantomData,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }
}

impl<B: Backend, S: OverlapStatistic> Default for OverlapMetric<B, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend, S: OverlapStatistic> Metric for OverlapMetric<B, S> {
    type Input = OverlapInput<B>;
    const NAME: &'static str = S::NAME;

    fn update(&mut self, input: &OverlapInput<B>, _metadata: &MetricMetadata) -> MetricEntry {
        let [batch_size, _, _, _] = input.outputs.dims();

        let predictions = positive_class(input.outputs.clone());
        let targets = input.targets.clone().greater_elem(0).float();

        let counts = ConfusionCounts::from_tensors(
            targets,
            predictions,
            CountMode::Thresholded(self.threshold),
        )
        .unwrap_or_else(|err| panic!("{} metric: {err}", S::NAME));

        self.state.update(
            100.0 * S::value(&counts),
            batch_size,
            FormatOptions::new(Self::NAME).unit("%").precision(2),
        )
    }

    fn clear(&mut self) {
        self.state.reset()
    }
}

impl<B: Backend, S: OverlapStatistic> Numeric for OverlapMetric<B, S> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::data::dataloader::Progress;

    type TestBackend = NdArray<f32>;

    fn metadata() -> MetricMetadata {
        MetricMetadata {
            progress: Progress {
                items_processed: 1,
                items_total: 1,
            },
            epoch: 1,
            epoch_total: 1,
            iteration: 1,
            lr: None,
        }
    }

    fn input() -> OverlapInput<TestBackend> {
        let device = Default::default();
        OverlapInput::new(
            Tensor::<TestBackend, 1>::from_floats([0.9, 0.8, 0.7, 0.6], &device)
                .reshape([1, 1, 2, 2]),
            Tensor::<TestBackend, 1, Int>::from_ints([0, 1, 1, 1], &device).reshape([1, 1, 2, 2]),
        )
    }

    #[test]
    fn reports_percentages_of_thresholded_counts() {
        let metadata = metadata();

        let mut jaccard = JaccardMetric::<TestBackend>::new();
        jaccard.update(&input(), &metadata);
        assert!((jaccard.value() - 75.0).abs() < 1e-9);

        let mut recall = RecallMetric::<TestBackend>::new();
        recall.update(&input(), &metadata);
        assert!((recall.value() - 100.0).abs() < 1e-9);

        let mut specificity = SpecificityMetric::<TestBackend>::new();
        specificity.update(&input(), &metadata);
        assert_eq!(specificity.value(), 0.0);
    }

    #[test]
    fn threshold_changes_the_positive_set() {
        let metadata = metadata();
        // Only 0.9 and 0.8 survive: TP 1, FP 1, FN 2.
        let mut precision = PrecisionMetric::<TestBackend>::new().with_threshold(0.75);
        precision.update(&input(), &metadata);
        assert!((precision.value() - 50.0).abs() < 1e-9);

        let mut dice = DiceMetric::<TestBackend>::new().with_threshold(0.75);
        dice.update(&input(), &metadata);
        assert!((dice.value() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn names_follow_the_statistic() {
        assert_eq!(<F1Metric<TestBackend> as Metric>::NAME, "F1");
        assert_eq!(<JaccardMetric<TestBackend> as Metric>::NAME, "Jaccard");
    }
}
