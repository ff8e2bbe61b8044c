//! Whole-scene cloud masks from a patch-trained U-Net.

use std::path::Path;
use std::time::{Duration, Instant};

use burn::prelude::*;
use image::{GrayImage, ImageBuffer};

use super::report::{EvaluationReport, SceneReport};
use crate::dataset::{SceneFiles, SceneTiles, list_scenes};
use crate::metrics::{ConfusionCounts, CountMode};
use crate::model::{UNet, positive_class};
use crate::patches::{reconstruct, unpad};
use crate::{Error, Result};

/// Cloud probability of every scene pixel, `[height, width]`.
#[derive(Debug)]
pub struct ScenePrediction<B: Backend> {
    pub probabilities: Tensor<B, 2>,
    pub elapsed: Duration,
}

impl<B: Backend> ScenePrediction<B> {
    /// Writes the thresholded mask as an 8-bit image (255 for cloud).
    pub fn save_mask(&self, path: &Path, threshold: f32) -> Result<()> {
        let [height, width] = self.probabilities.dims();
        let pixels: Vec<u8> = self
            .probabilities
            .clone()
            .greater_equal_elem(threshold)
            .float()
            .into_data()
            .iter::<f32>()
            .map(|cloud| if cloud > 0.0 { u8::MAX } else { 0 })
            .collect();

        let image: GrayImage = ImageBuffer::from_raw(width as u32, height as u32, pixels)
            .ok_or_else(|| Error::shape_mismatch(&[height, width], &[0]))?;
        image.save(path).map_err(|source| Error::Image {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Predicts a scene `batch_size` patches at a time, then reassembles the
/// patch outputs and strips the padding.
pub fn predict_scene<B: Backend>(
    model: &UNet<B>,
    tiles: &SceneTiles,
    batch_size: usize,
    device: &B::Device,
) -> Result<ScenePrediction<B>> {
    let batch_size = batch_size.max(1);
    let start = Instant::now();

    let outputs: Vec<Tensor<B, 4>> = (0..tiles.len())
        .step_by(batch_size)
        .map(|first| {
            let images = tiles.batch::<B>(first, first + batch_size, device);
            positive_class(model.forward(images))
        })
        .collect();

    if outputs.is_empty() {
        return Err(Error::PatchGrid("scene has no patches".to_string()));
    }

    let padded = reconstruct(Tensor::cat(outputs, 0), tiles.grid())?;
    let image = unpad(padded, tiles.padding())?;
    let [_, height, width] = image.dims();
    let probabilities = image.reshape([height, width]);
    let elapsed = start.elapsed();

    tracing::debug!(
        "Predicted {height}x{width} scene from {} patches in {:.2?}",
        tiles.len(),
        elapsed
    );

    Ok(ScenePrediction {
        probabilities,
        elapsed,
    })
}

/// Predicts one scene and compares it with its ground truth.
pub fn evaluate_scene<B: Backend>(
    model: &UNet<B>,
    scene: &SceneFiles,
    patch_size: usize,
    batch_size: usize,
    threshold: f32,
    device: &B::Device,
) -> Result<(SceneReport, ScenePrediction<B>)> {
    let ground_truth = scene.load_ground_truth()?.ok_or_else(|| {
        Error::Dataset(format!("Scene {} has no ground truth", scene.name))
    })?;

    let tiles = SceneTiles::new(scene.load()?, patch_size)?;
    let prediction = predict_scene(model, &tiles, batch_size, device)?;

    let truth = ground_truth
        .to_tensor::<B>(device)
        .reshape([ground_truth.height, ground_truth.width]);
    let counts = ConfusionCounts::from_tensors(
        truth,
        prediction.probabilities.clone(),
        CountMode::Thresholded(threshold),
    )?;

    let report = SceneReport {
        name: scene.name.clone(),
        counts,
        metrics: counts.report(),
        inference_seconds: prediction.elapsed.as_secs_f64(),
    };

    Ok((report, prediction))
}

/// Evaluates every scene directory under `root`. When `masks_dir` is given the
/// predicted masks are written there as `<scene>.png`.
pub fn evaluate_scenes<B: Backend>(
    model: &UNet<B>,
    root: &Path,
    patch_size: usize,
    batch_size: usize,
    threshold: f32,
    masks_dir: Option<&Path>,
    device: &B::Device,
) -> Result<EvaluationReport> {
    let scenes = list_scenes(root)?;
    if let Some(dir) = masks_dir {
        std::fs::create_dir_all(dir)?;
    }

    let mut reports = Vec::with_capacity(scenes.len());
    for scene in &scenes {
        tracing::info!("Processing scene {}", scene.name);

        let (report, prediction) =
            evaluate_scene(model, scene, patch_size, batch_size, threshold, device)?;
        if let Some(dir) = masks_dir {
            prediction.save_mask(&dir.join(format!("{}.png", scene.name)), threshold)?;
        }

        tracing::info!(
            "Scene {}: Jaccard {:.4}, prediction took {:.2}s",
            scene.name,
            report.metrics.jaccard_index,
            report.inference_seconds
        );
        reports.push(report);
    }

    let report = EvaluationReport::new(threshold, reports);
    tracing::info!(
        "Average inference time: {:.2}s, overall Jaccard {:.4}",
        report.average_inference_seconds,
        report.overall.jaccard_index
    );

    Ok(report)
}
