mod error;

pub mod metrics;
pub mod model;
pub mod patches;

#[cfg(feature = "dataset")]
pub mod dataset;

#[cfg(feature = "training")]
pub mod evaluation;
#[cfg(feature = "training")]
pub mod training;

pub use error::{Error, Result};
pub use model::{SpectralCnn, SpectralCnnConfig, UNet, UNetConfig, UnmixingCnn};

#[cfg(feature = "dataset")]
pub use dataset::{SegmentationConfig, SplitConfig, TrainSize, train_val_test_split};

#[cfg(feature = "training")]
pub use training::{JaccardLoss, JaccardLossConfig, JaccardMetric, SegmentationOutput};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
