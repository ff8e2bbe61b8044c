pub mod cloud;
pub mod hyperspectral;
pub mod raster;
pub mod scene;
pub mod segmentation;
pub mod split;
pub mod transforms;

pub use cloud::{CloudPatchDataset, CloudPatchFiles, load_image_paths};
pub use hyperspectral::{
    AbundanceBatch, AbundanceBatcher, AbundanceItem, HyperspectralCube, LabelMap, LabeledSamples,
    SpectralBatch, SpectralBatcher, SpectralItem,
};
pub use raster::Raster;
pub use scene::{SceneFiles, SceneTiles, list_scenes};
pub use segmentation::{SegmentationBatch, SegmentationBatcher, SegmentationConfig, SegmentationItem};
pub use split::{SplitConfig, SplitIndices, TrainSize, train_val_test_split};
pub use transforms::{MinMaxNormalize, Normalization, PerBandMinMax};
