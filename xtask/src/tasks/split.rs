use std::path::PathBuf;

use anyhow::{Context, Result};
use burn_remote_sensing::{
    SplitConfig, TrainSize,
    dataset::{LabelMap, SplitIndices},
    evaluation::save_json,
    train_val_test_split,
};
use clap::Args;

#[derive(Args)]
pub struct SplitArgs {
    /// Label raster with one class value per pixel
    #[arg(long)]
    pub labels: PathBuf,

    /// Output JSON with `train`, `val` and `test` pixel indices
    #[arg(short, long, default_value = "split.json")]
    pub output: PathBuf,

    /// Fraction (e.g. 0.8) or per-class count (e.g. 250)
    #[arg(long, default_value = "0.8")]
    pub train_size: TrainSize,

    #[arg(long, default_value_t = 0.1)]
    pub val_size: f64,

    #[arg(long)]
    pub no_stratify: bool,

    /// Label value excluded from every split
    #[arg(long)]
    pub background: Option<usize>,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

pub fn run(args: &SplitArgs) -> Result<()> {
    let labels = LabelMap::load(&args.labels)
        .with_context(|| format!("Failed to read labels {}", args.labels.display()))?;

    let (pixels, kept): (Vec<usize>, Vec<usize>) = labels
        .labels
        .iter()
        .enumerate()
        .filter(|&(_, &label)| Some(label) != args.background)
        .unzip();

    let config = SplitConfig::new(args.train_size)
        .with_val_fraction(args.val_size)
        .with_stratified(!args.no_stratify)
        .with_seed(args.seed);
    let split = train_val_test_split(&kept, &config)?;

    // Indices into the full raster rather than into the kept pixels.
    let (train, val, test) = split.select(&pixels);
    tracing::info!(
        "Split {} pixels into {} train, {} validation and {} test",
        pixels.len(),
        train.len(),
        val.len(),
        test.len()
    );

    save_json(&args.output, &SplitIndices { train, val, test })?;
    Ok(())
}
