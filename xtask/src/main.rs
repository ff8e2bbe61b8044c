use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod tasks;

#[derive(Parser)]
#[command(
    name = "burn-remote-sensing",
    about = "Cloud segmentation and hyperspectral experiments",
    author,
    version
)]
struct Cli {
    /// Log debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a U-Net on 38-Cloud patches
    TrainClouds(tasks::clouds::TrainCloudsArgs),
    /// Evaluate a trained U-Net on full scenes
    EvaluateClouds(tasks::clouds::EvaluateCloudsArgs),
    /// Repeated hyperspectral classification runs
    RunExperiments(tasks::spectral::ExperimentArgs),
    /// Train an ensemble of unmixing networks
    TrainUnmixing(tasks::spectral::UnmixingArgs),
    /// Write train/validation/test indices of a label map
    Split(tasks::split::SplitArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match &cli.command {
        Commands::TrainClouds(args) => tasks::clouds::train(args),
        Commands::EvaluateClouds(args) => tasks::clouds::evaluate(args),
        Commands::RunExperiments(args) => tasks::spectral::run_experiments(args),
        Commands::TrainUnmixing(args) => tasks::spectral::train_unmixing(args),
        Commands::Split(args) => tasks::split::run(args),
    }
}
