use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::{backend::wgpu::WgpuDevice, optim::AdamConfig};
use burn_remote_sensing::{
    SplitConfig, TrainSize,
    dataset::{HyperspectralCube, LabelMap},
    model::SpectralVariant,
    training::{
        Ensemble, SpectralTrainingConfig, Voting, prepare_unmixing, run_experiments as run,
        run_unmixing_ensemble,
    },
};
use clap::Args;

use super::AutodiffBackend;

/// Network and optimisation settings shared by the spectral commands.
#[derive(Args)]
pub struct SpectralModelArgs {
    /// `model_2d` (strided), `pool_model_2d` (pooled) or `model_3d_mfl` (cube)
    #[arg(long, default_value = "model_2d")]
    pub model_name: SpectralVariant,

    /// Side of the pixel window per sample; the cube model needs at least 5
    #[arg(long, default_value_t = 1)]
    pub neighborhood_size: usize,

    #[arg(long, default_value_t = 3)]
    pub kernel_size: usize,

    #[arg(long, default_value_t = 16)]
    pub n_kernels: usize,

    #[arg(long, default_value_t = 1)]
    pub n_layers: usize,

    #[arg(short, long, default_value_t = 0.005)]
    pub lr: f64,

    #[arg(short, long, default_value_t = 150)]
    pub batch_size: usize,

    #[arg(short, long, default_value_t = 10)]
    pub epochs: usize,

    #[arg(long, default_value_t = 3)]
    pub patience: usize,

    /// Scale each band with its own training range
    #[arg(long)]
    pub per_band: bool,
}

impl SpectralModelArgs {
    fn config(&self) -> SpectralTrainingConfig {
        SpectralTrainingConfig::new(AdamConfig::new())
            .with_variant(self.model_name.clone())
            .with_kernel_size(self.kernel_size)
            .with_n_kernels(self.n_kernels)
            .with_n_layers(self.n_layers)
            .with_learning_rate(self.lr)
            .with_batch_size(self.batch_size)
            .with_num_epochs(self.epochs)
            .with_patience(self.patience)
            .with_per_band_normalization(self.per_band)
            .with_neighborhood_size(self.neighborhood_size)
    }
}

#[derive(Args)]
pub struct ExperimentArgs {
    /// Directory of `band_<k>` images
    #[arg(short, long)]
    pub data_dir: PathBuf,

    /// Label raster with one class value per pixel
    #[arg(long)]
    pub labels: PathBuf,

    #[arg(long, default_value = "artifacts/experiments")]
    pub dest: PathBuf,

    #[arg(short, long, default_value_t = 1)]
    pub n_runs: usize,

    /// Fraction (e.g. 0.8) or per-class count (e.g. 250)
    #[arg(long, default_value = "0.8")]
    pub train_size: TrainSize,

    #[arg(long, default_value_t = 0.1)]
    pub val_size: f64,

    /// Draw the split from all pixels instead of per class
    #[arg(long)]
    pub no_stratify: bool,

    /// Label value ignored as unlabeled
    #[arg(long, default_value_t = 0)]
    pub background: usize,

    /// Keep pixels carrying the background label
    #[arg(long)]
    pub keep_background: bool,

    #[command(flatten)]
    pub model: SpectralModelArgs,
}

pub fn run_experiments(args: &ExperimentArgs) -> Result<()> {
    let device = WgpuDevice::default();

    let cube = HyperspectralCube::from_band_dir(&args.data_dir)
        .with_context(|| format!("Failed to load bands from {}", args.data_dir.display()))?;
    let labels = LabelMap::load(&args.labels)?;
    let background = (!args.keep_background).then_some(args.background);
    let samples = cube.samples(&labels, background, args.model.neighborhood_size)?;

    let split = SplitConfig::new(args.train_size)
        .with_val_fraction(args.val_size)
        .with_stratified(!args.no_stratify);

    let reports = run::<AutodiffBackend>(
        &args.dest,
        &samples,
        &split,
        &args.model.config(),
        args.n_runs,
        device,
    )?;

    let n = reports.len().max(1) as f64;
    let mean_oa = reports.iter().map(|r| r.overall_accuracy).sum::<f64>() / n;
    let mean_kappa = reports.iter().map(|r| r.kappa).sum::<f64>() / n;
    tracing::info!(
        "{} runs: mean OA {mean_oa:.4}, mean kappa {mean_kappa:.4}",
        reports.len()
    );

    Ok(())
}

#[derive(Args)]
pub struct UnmixingArgs {
    /// Directory of `band_<k>` images
    #[arg(short, long)]
    pub data_dir: PathBuf,

    /// Directory of `abundance_<k>` maps
    #[arg(long)]
    pub abundances: PathBuf,

    #[arg(long, default_value = "artifacts/unmixing")]
    pub dest: PathBuf,

    #[arg(short, long, default_value_t = 1)]
    pub n_models: usize,

    #[arg(long, default_value = "mean")]
    pub voting: Voting,

    /// Fraction (e.g. 0.8) or count of training pixels
    #[arg(long, default_value = "0.8")]
    pub train_size: TrainSize,

    #[arg(long, default_value_t = 0.1)]
    pub val_size: f64,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    #[command(flatten)]
    pub model: SpectralModelArgs,
}

pub fn train_unmixing(args: &UnmixingArgs) -> Result<()> {
    let device = WgpuDevice::default();

    let cube = HyperspectralCube::from_band_dir(&args.data_dir)
        .with_context(|| format!("Failed to load bands from {}", args.data_dir.display()))?;
    let items = cube.abundance_samples(&args.abundances, args.model.neighborhood_size)?;

    let config = args.model.config().with_seed(args.seed);
    let data = prepare_unmixing(&items, args.train_size, args.val_size, &config)?;

    let report = run_unmixing_ensemble::<AutodiffBackend>(
        &args.dest,
        &data,
        &config,
        args.n_models,
        Ensemble::new(args.voting),
        device,
    )?;

    tracing::info!(
        "Ensemble of {}: RMSE {:.4}, aRMSE {:.4}, rmsAAD {:.4}",
        report.members.len(),
        report.ensemble.rmse,
        report.ensemble.per_class_rmse_sum,
        report.ensemble.rms_abundance_angle_distance
    );

    Ok(())
}
