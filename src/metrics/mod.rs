pub mod classification;
pub mod overlap;
pub mod unmixing;

pub use classification::{ClassificationReport, ConfusionMatrix};
pub use overlap::{ConfusionCounts, CountMode, DEFAULT_THRESHOLD, OverlapReport};
pub use unmixing::UnmixingReport;
