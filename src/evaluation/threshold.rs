//! Threshold selection on validation predictions.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::dataset::cloud::load_patch;
use crate::dataset::{CloudPatchFiles, SegmentationBatcher, SegmentationConfig};
use crate::metrics::{ConfusionCounts, CountMode};
use crate::model::{UNet, positive_class};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdScore {
    pub threshold: f32,
    pub counts: ConfusionCounts,
    pub jaccard_index: f64,
}

/// `steps - 1` evenly spaced thresholds strictly between 0 and 1.
pub fn threshold_candidates(steps: usize) -> Vec<f32> {
    (1..steps).map(|i| i as f32 / steps as f32).collect()
}

/// Counts of `probabilities` against `truth` for every candidate threshold.
pub fn threshold_scores<B: Backend, const D: usize>(
    truth: Tensor<B, D>,
    probabilities: Tensor<B, D>,
    candidates: &[f32],
) -> Result<Vec<ThresholdScore>> {
    candidates
        .iter()
        .map(|&threshold| {
            let counts = ConfusionCounts::from_tensors(
                truth.clone(),
                probabilities.clone(),
                CountMode::Thresholded(threshold),
            )?;
            Ok(score(threshold, counts))
        })
        .collect()
}

/// Highest Jaccard index; ties go to the lowest threshold.
pub fn best_threshold(scores: &[ThresholdScore]) -> Option<ThresholdScore> {
    scores.iter().copied().fold(None, |best, candidate| match best {
        Some(best) if best.jaccard_index >= candidate.jaccard_index => Some(best),
        _ => Some(candidate),
    })
}

/// Scores thresholds on validation patches, `batch_size` patches at a time.
/// Counts are summed over all patches before the ratios are taken.
pub fn validation_threshold_scores<B: Backend>(
    model: &UNet<B>,
    files: &[CloudPatchFiles],
    segmentation: SegmentationConfig,
    batch_size: usize,
    candidates: &[f32],
    device: &B::Device,
) -> Result<Vec<ThresholdScore>> {
    let batcher = SegmentationBatcher::<B>::new(device.clone(), segmentation);
    let mut totals = vec![ConfusionCounts::default(); candidates.len()];

    for chunk in files.chunks(batch_size.max(1)) {
        let items = chunk.iter().map(load_patch).collect::<Result<Vec<_>>>()?;
        let batch = batcher.batch(items);
        let probabilities = positive_class(model.forward(batch.images));

        let scores = threshold_scores(batch.masks.float(), probabilities, candidates)?;
        for (total, score) in totals.iter_mut().zip(scores) {
            *total = *total + score.counts;
        }
    }

    let scores: Vec<ThresholdScore> = candidates
        .iter()
        .zip(totals)
        .map(|(&threshold, counts)| score(threshold, counts))
        .collect();

    for score in &scores {
        tracing::debug!(
            "Threshold {:.2}: Jaccard {:.4}",
            score.threshold,
            score.jaccard_index
        );
    }

    Ok(scores)
}

fn score(threshold: f32, counts: ConfusionCounts) -> ThresholdScore {
    ThresholdScore {
        threshold,
        counts,
        jaccard_index: counts.jaccard_index(),
    }
}
