use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::{backend::wgpu::WgpuDevice, module::AutodiffModule, optim::AdamConfig};
use burn_remote_sensing::{
    UNetConfig,
    dataset::load_image_paths,
    evaluation::{
        best_threshold, evaluate_scenes, save_json, threshold_candidates,
        validation_threshold_scores,
    },
    metrics::DEFAULT_THRESHOLD,
    training::{CloudTrainingConfig, load_trained_unet, train_clouds},
};
use clap::Args;

use super::{AutodiffBackend, Backend};

const THRESHOLDS_FILE: &str = "thresholds.json";

#[derive(Args)]
pub struct TrainCloudsArgs {
    /// 38-Cloud training root holding `train_<band>` and `train_gt`
    #[arg(short, long)]
    pub data_dir: PathBuf,

    #[arg(short, long, default_value = "artifacts/clouds")]
    pub artifact_dir: PathBuf,

    #[arg(short, long, default_value_t = 200)]
    pub epochs: usize,

    #[arg(short, long, default_value_t = 8)]
    pub batch_size: usize,

    #[arg(short, long, default_value_t = 0.01)]
    pub lr: f64,

    #[arg(long, default_value_t = 20)]
    pub patience: usize,

    #[arg(long, default_value_t = 0.8)]
    pub train_fraction: f64,

    #[arg(long, default_value_t = 16)]
    pub base_channels: usize,

    #[arg(long, default_value_t = 0.9)]
    pub bn_momentum: f64,

    #[arg(long, default_value_t = 0.0)]
    pub dropout: f64,

    #[arg(long, default_value_t = 384)]
    pub patch_size: usize,

    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Sweep this many thresholds on the validation patches after training
    #[arg(long, default_value_t = 0)]
    pub threshold_steps: usize,
}

pub fn train(args: &TrainCloudsArgs) -> Result<()> {
    let device = WgpuDevice::default();

    let (train_files, valid_files) =
        load_image_paths(&args.data_dir, args.train_fraction, args.seed)
            .with_context(|| format!("Failed to list patches in {}", args.data_dir.display()))?;

    let model = UNetConfig::new()
        .with_base_channels(args.base_channels)
        .with_bn_momentum(args.bn_momentum)
        .with_dropout(args.dropout);
    let config = CloudTrainingConfig::new(model, AdamConfig::new())
        .with_num_epochs(args.epochs)
        .with_batch_size(args.batch_size)
        .with_learning_rate(args.lr)
        .with_patience(args.patience)
        .with_train_fraction(args.train_fraction)
        .with_patch_size(args.patch_size)
        .with_num_workers(args.num_workers)
        .with_seed(args.seed);
    let segmentation = config.segmentation();

    let model = train_clouds::<AutodiffBackend>(
        &args.artifact_dir,
        train_files,
        valid_files.clone(),
        config,
        device.clone(),
    )?;

    if args.threshold_steps > 1 {
        let scores = validation_threshold_scores(
            &model.valid(),
            &valid_files,
            segmentation,
            args.batch_size,
            &threshold_candidates(args.threshold_steps),
            &device,
        )?;
        if let Some(best) = best_threshold(&scores) {
            tracing::info!(
                "Best validation threshold {:.2} (Jaccard {:.4})",
                best.threshold,
                best.jaccard_index
            );
        }
        save_json(&args.artifact_dir.join(THRESHOLDS_FILE), &scores)?;
    }

    tracing::info!("Training completed");
    Ok(())
}

#[derive(Args)]
pub struct EvaluateCloudsArgs {
    /// Directory written by `train-clouds`
    #[arg(short, long, default_value = "artifacts/clouds")]
    pub artifact_dir: PathBuf,

    /// Directory with one subdirectory per scene
    #[arg(short, long)]
    pub scenes_dir: PathBuf,

    #[arg(short, long, default_value_t = 10)]
    pub batch_size: usize,

    #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: f32,

    /// Write predicted masks here
    #[arg(long)]
    pub masks_dir: Option<PathBuf>,

    /// Report file name (without extension) inside the artifact directory
    #[arg(long, default_value = "evaluation")]
    pub report: String,
}

pub fn evaluate(args: &EvaluateCloudsArgs) -> Result<()> {
    let device = WgpuDevice::default();

    let (model, config) = load_trained_unet::<Backend>(&args.artifact_dir, &device)
        .with_context(|| format!("Failed to load model from {}", args.artifact_dir.display()))?;

    let report = evaluate_scenes(
        &model,
        &args.scenes_dir,
        config.patch_size,
        args.batch_size,
        args.threshold,
        args.masks_dir.as_deref(),
        &device,
    )?;

    report.save(&args.artifact_dir, &args.report)?;
    for (metric, value) in report.overall.entries() {
        tracing::info!("{metric}: {value:.4}");
    }

    Ok(())
}
