//! Full scenes for inference, served one patch at a time.
//!
//! A scene directory holds one image per band plus the ground truth:
//! `<scene>/{red,green,blue,nir}.<ext>` and `<scene>/gt.<ext>`.

use std::path::{Path, PathBuf};

use burn::prelude::*;

use super::cloud::BANDS;
use super::raster::{Raster, find_image, load_mask};
use crate::patches::{Padding, PatchGrid};
use crate::{Error, Result};

/// Scene ground truth pixels above this scaled value are cloud.
pub const SCENE_GROUND_TRUTH_THRESHOLD: f32 = 128.0 / 255.0;

#[derive(Clone, Debug, PartialEq)]
pub struct SceneFiles {
    pub name: String,
    pub bands: Vec<PathBuf>,
    pub ground_truth: Option<PathBuf>,
}

impl SceneFiles {
    pub fn locate(dir: &Path) -> Result<Self> {
        let bands = BANDS
            .iter()
            .map(|band| {
                find_image(dir, band).ok_or_else(|| {
                    Error::Dataset(format!("Missing {band} band in {}", dir.display()))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            bands,
            ground_truth: find_image(dir, "gt"),
        })
    }

    pub fn load(&self) -> Result<Raster> {
        Raster::load_bands(&self.bands)
    }

    pub fn load_ground_truth(&self) -> Result<Option<Raster>> {
        self.ground_truth
            .as_deref()
            .map(|path| load_mask(path, SCENE_GROUND_TRUTH_THRESHOLD))
            .transpose()
    }
}

/// Scene subdirectories of `root`, sorted by name.
pub fn list_scenes(root: &Path) -> Result<Vec<SceneFiles>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();

    let scenes: Vec<SceneFiles> = dirs
        .iter()
        .filter_map(|dir| match SceneFiles::locate(dir) {
            Ok(scene) => Some(scene),
            Err(err) => {
                tracing::warn!("Skipping {}: {err}", dir.display());
                None
            }
        })
        .collect();

    if scenes.is_empty() {
        return Err(Error::Dataset(format!(
            "No scenes found under {}",
            root.display()
        )));
    }

    Ok(scenes)
}

/// Patch view over a scene padded symmetrically to whole patches. Patches are
/// cut on demand so only one batch is materialised at a time.
#[derive(Clone, Debug)]
pub struct SceneTiles {
    scene: Raster,
    grid: PatchGrid,
    padding: Padding,
}

impl SceneTiles {
    pub fn new(scene: Raster, patch_size: usize) -> Result<Self> {
        let (grid, padding) = PatchGrid::covering(scene.height, scene.width, patch_size)?;
        Ok(Self {
            scene,
            grid,
            padding,
        })
    }

    pub fn grid(&self) -> &PatchGrid {
        &self.grid
    }

    pub fn padding(&self) -> &Padding {
        &self.padding
    }

    pub fn channels(&self) -> usize {
        self.scene.channels
    }

    pub fn len(&self) -> usize {
        self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    /// Patch `index` as `[channels, p, p]`; pixels in the padding are zero.
    pub fn patch(&self, index: usize) -> Vec<f32> {
        let size = self.grid.patch_size;
        let (origin_y, origin_x) = self.grid.origin(index);
        let mut patch = vec![0.0; self.scene.channels * size * size];

        for c in 0..self.scene.channels {
            let band = self.scene.band(c);
            for dy in 0..size {
                let Some(y) = (origin_y + dy).checked_sub(self.padding.top) else {
                    continue;
                };
                if y >= self.scene.height {
                    continue;
                }
                for dx in 0..size {
                    let Some(x) = (origin_x + dx).checked_sub(self.padding.left) else {
                        continue;
                    };
                    if x >= self.scene.width {
                        continue;
                    }
                    patch[(c * size + dy) * size + dx] = band[y * self.scene.width + x];
                }
            }
        }

        patch
    }

    /// Patches `start..end` stacked as `[n, channels, p, p]`.
    pub fn batch<B: Backend>(&self, start: usize, end: usize, device: &B::Device) -> Tensor<B, 4> {
        let end = end.min(self.len());
        let size = self.grid.patch_size;
        let data: Vec<f32> = (start..end).flat_map(|index| self.patch(index)).collect();

        Tensor::from_data(
            TensorData::new(
                data,
                Shape::new([end - start, self.scene.channels, size, size]),
            )
            .convert::<B::FloatElem>(),
            device,
        )
    }
}
