//! 38-Cloud style training patches.
//!
//! Each patch is split over one directory per band plus a ground truth
//! directory, all sharing the patch id in their file names:
//!
//! ```text
//! <root>/train_red/red_<id>.TIF
//! <root>/train_green/green_<id>.TIF
//! <root>/train_blue/blue_<id>.TIF
//! <root>/train_nir/nir_<id>.TIF
//! <root>/train_gt/gt_<id>.TIF
//! ```

use std::path::{Path, PathBuf};

use burn::data::dataset::transform::{Mapper, MapperDataset};
use burn::data::dataset::{Dataset, InMemDataset};
use serde::{Deserialize, Serialize};

use super::raster::{Raster, has_supported_extension, load_mask};
use super::segmentation::SegmentationItem;
use super::split::SplitIndices;
use crate::{Error, Result};

/// Band order of the network input.
pub const BANDS: [&str; 4] = ["red", "green", "blue", "nir"];

/// Ground truth pixels above this scaled value are cloud.
pub const GROUND_TRUTH_THRESHOLD: f32 = 0.0;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudPatchFiles {
    pub id: String,
    pub bands: Vec<PathBuf>,
    pub ground_truth: PathBuf,
}

impl CloudPatchFiles {
    /// Paths for patch `id` under `root`, or `None` if any file is missing.
    pub fn locate(root: &Path, id: &str, extension: &str) -> Option<Self> {
        let bands: Vec<PathBuf> = BANDS
            .iter()
            .map(|band| {
                root.join(format!("train_{band}"))
                    .join(format!("{band}_{id}.{extension}"))
            })
            .collect();
        let ground_truth = root
            .join("train_gt")
            .join(format!("gt_{id}.{extension}"));

        let complete = bands.iter().all(|path| path.is_file()) && ground_truth.is_file();
        complete.then(|| Self {
            id: id.to_string(),
            bands,
            ground_truth,
        })
    }
}

/// Every complete patch under `root`, sorted by id.
pub fn load_patch_files(root: &Path) -> Result<Vec<CloudPatchFiles>> {
    let first_band = root.join(format!("train_{}", BANDS[0]));
    if !first_band.is_dir() {
        return Err(Error::Dataset(format!(
            "Band directory does not exist: {}",
            first_band.display()
        )));
    }

    let prefix = format!("{}_", BANDS[0]);
    let mut patches = Vec::new();

    for entry in std::fs::read_dir(&first_band)? {
        let path = entry?.path();
        if !path.is_file() || !has_supported_extension(&path) {
            continue;
        }

        let (Some(stem), Some(extension)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        let Some(id) = stem.strip_prefix(&prefix) else {
            continue;
        };

        match CloudPatchFiles::locate(root, id, extension) {
            Some(files) => patches.push(files),
            None => tracing::warn!("Skipping incomplete patch {id}"),
        }
    }

    if patches.is_empty() {
        return Err(Error::Dataset(format!(
            "No complete patches found under {}",
            root.display()
        )));
    }

    patches.sort_by(|a, b| a.id.cmp(&b.id));
    tracing::info!("Found {} patches under {}", patches.len(), root.display());

    Ok(patches)
}

/// Seeded `(train, validation)` holdout of the patches under `root`.
pub fn load_image_paths(
    root: &Path,
    train_fraction: f64,
    seed: u64,
) -> Result<(Vec<CloudPatchFiles>, Vec<CloudPatchFiles>)> {
    let files = load_patch_files(root)?;
    let split = SplitIndices::holdout(files.len(), train_fraction, seed)?;
    let (train, _, valid) = split.select(&files);

    tracing::info!(
        "Split patches into {} training and {} validation",
        train.len(),
        valid.len()
    );

    Ok((train, valid))
}

/// Reads the four bands and the binarised ground truth of a patch.
pub fn load_patch(files: &CloudPatchFiles) -> Result<SegmentationItem> {
    let image = Raster::load_bands(&files.bands)?;
    let mask = load_mask(&files.ground_truth, GROUND_TRUTH_THRESHOLD)?;

    if (mask.height, mask.width) != (image.height, image.width) {
        return Err(Error::shape_mismatch(
            &[image.height, image.width],
            &[mask.height, mask.width],
        ));
    }

    Ok(SegmentationItem {
        image: image.data,
        mask: mask.data.into_iter().map(|v| v > 0.0).collect(),
    })
}

struct PathToCloudPatch;

impl Mapper<CloudPatchFiles, SegmentationItem> for PathToCloudPatch {
    fn map(&self, item: &CloudPatchFiles) -> SegmentationItem {
        load_patch(item).unwrap_or_else(|err| panic!("Failed to load patch {}: {err}", item.id))
    }
}

type CloudPatchMapper = MapperDataset<InMemDataset<CloudPatchFiles>, PathToCloudPatch, CloudPatchFiles>;

/// Lazily loaded patches; images are read when an item is requested.
pub struct CloudPatchDataset {
    dataset: CloudPatchMapper,
}

impl CloudPatchDataset {
    pub fn new(files: Vec<CloudPatchFiles>) -> Self {
        let dataset = MapperDataset::new(InMemDataset::new(files), PathToCloudPatch);
        Self { dataset }
    }
}

impl Dataset<SegmentationItem> for CloudPatchDataset {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}
