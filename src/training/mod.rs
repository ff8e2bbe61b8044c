pub mod cloud;
pub mod ensemble;
pub mod learner;
pub mod loss;
pub mod metrics;
pub mod spectral;

pub use cloud::{CloudTrainingConfig, load_trained_unet, train_clouds};
pub use ensemble::{Ensemble, Voting};
pub use learner::SegmentationOutput;
pub use loss::{JaccardLoss, JaccardLossConfig};
pub use metrics::{
    DiceMetric, F1Metric, JaccardMetric, OverlapInput, OverlapMetric, PrecisionMetric,
    RecallMetric, SpecificityMetric,
};
pub use spectral::{
    PreparedSplit, SpectralTrainingConfig, UnmixingEnsembleReport, load_trained_spectral,
    prepare_classification, prepare_unmixing, run_experiments, run_unmixing_ensemble,
    train_spectral, train_unmixing,
};
