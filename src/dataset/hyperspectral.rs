//! Hyperspectral cubes and per-pixel samples for spectral classification and
//! unmixing.
//!
//! A cube is a directory of single-band images `band_<k>.<ext>`; abundance
//! maps are stored the same way as `abundance_<k>.<ext>`, one per endmember.
//!
//! A sample is either one pixel spectrum or, with a neighborhood size `n > 1`,
//! the `n x n` window centred on the pixel: row by row, every pixel with all
//! of its bands. Pixels beyond the image border read as zeros.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use burn::{data::dataloader::batcher::Batcher, prelude::*};

use super::raster::{Raster, has_supported_extension, load_labels};
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct SpectralItem {
    pub spectrum: Vec<f32>,
    pub label: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AbundanceItem {
    pub spectrum: Vec<f32>,
    pub abundances: Vec<f32>,
}

impl AsRef<[f32]> for SpectralItem {
    fn as_ref(&self) -> &[f32] {
        &self.spectrum
    }
}

impl AsRef<[f32]> for AbundanceItem {
    fn as_ref(&self) -> &[f32] {
        &self.spectrum
    }
}

#[derive(Clone, Debug)]
pub struct LabelMap {
    pub height: usize,
    pub width: usize,
    pub labels: Vec<usize>,
}

impl LabelMap {
    pub fn load(path: &Path) -> Result<Self> {
        let (labels, height, width) = load_labels(path)?;
        Ok(Self {
            height,
            width,
            labels,
        })
    }
}

/// Labeled pixels with labels remapped to `0..num_classes`.
#[derive(Clone, Debug)]
pub struct LabeledSamples {
    pub items: Vec<SpectralItem>,
    /// Original label value of each remapped class.
    pub class_ids: Vec<usize>,
}

impl LabeledSamples {
    pub fn num_classes(&self) -> usize {
        self.class_ids.len()
    }

    pub fn labels(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.label).collect()
    }
}

#[derive(Clone, Debug)]
pub struct HyperspectralCube {
    raster: Raster,
}

impl HyperspectralCube {
    pub fn new(raster: Raster) -> Self {
        Self { raster }
    }

    /// Loads `band_<k>` images from `dir`, ordered by `k`.
    pub fn from_band_dir(dir: &Path) -> Result<Self> {
        let bands = numbered_files(dir, "band_")?;
        tracing::info!("Loading {} bands from {}", bands.len(), dir.display());
        Ok(Self::new(Raster::load_bands(&bands)?))
    }

    pub fn bands(&self) -> usize {
        self.raster.channels
    }

    pub fn height(&self) -> usize {
        self.raster.height
    }

    pub fn width(&self) -> usize {
        self.raster.width
    }

    /// Window of `size x size` pixels centred on `(y, x)`.
    pub fn neighborhood(&self, y: usize, x: usize, size: usize) -> Vec<f32> {
        let radius = size / 2;
        let mut values = Vec::with_capacity(size * size * self.bands());

        for dy in 0..size {
            for dx in 0..size {
                let row = (y + dy).checked_sub(radius).filter(|&r| r < self.height());
                let col = (x + dx).checked_sub(radius).filter(|&c| c < self.width());
                match (row, col) {
                    (Some(row), Some(col)) => values.extend(self.raster.pixel(row, col)),
                    _ => values.resize(values.len() + self.bands(), 0.0),
                }
            }
        }

        values
    }

    /// One item per pixel whose label is not `background_label`, holding its
    /// spectrum or its `neighborhood_size` window.
    pub fn samples(
        &self,
        labels: &LabelMap,
        background_label: Option<usize>,
        neighborhood_size: usize,
    ) -> Result<LabeledSamples> {
        self.check_size(labels.height, labels.width)?;
        check_neighborhood(neighborhood_size)?;

        let class_ids: Vec<usize> = labels
            .labels
            .iter()
            .copied()
            .filter(|&label| Some(label) != background_label)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if class_ids.is_empty() {
            return Err(Error::Dataset("No labeled pixels".to_string()));
        }

        let items = labels
            .labels
            .iter()
            .enumerate()
            .filter(|&(_, &label)| Some(label) != background_label)
            .map(|(pixel, label)| SpectralItem {
                spectrum: self.neighborhood(
                    pixel / self.width(),
                    pixel % self.width(),
                    neighborhood_size,
                ),
                label: class_ids.binary_search(label).unwrap_or_default(),
            })
            .collect::<Vec<_>>();

        tracing::info!(
            "Extracted {} labeled pixels in {} classes",
            items.len(),
            class_ids.len()
        );

        Ok(LabeledSamples { items, class_ids })
    }

    /// Loads `abundance_<k>` maps from `dir` and pairs them with every pixel.
    pub fn abundance_samples(
        &self,
        dir: &Path,
        neighborhood_size: usize,
    ) -> Result<Vec<AbundanceItem>> {
        check_neighborhood(neighborhood_size)?;
        let abundances = Raster::load_bands(&numbered_files(dir, "abundance_")?)?;
        self.check_size(abundances.height, abundances.width)?;

        Ok((0..self.height() * self.width())
            .map(|pixel| {
                let (y, x) = (pixel / self.width(), pixel % self.width());
                AbundanceItem {
                    spectrum: self.neighborhood(y, x, neighborhood_size),
                    abundances: abundances.pixel(y, x),
                }
            })
            .collect())
    }

    fn check_size(&self, height: usize, width: usize) -> Result<()> {
        if (height, width) != (self.height(), self.width()) {
            return Err(Error::shape_mismatch(
                &[self.height(), self.width()],
                &[height, width],
            ));
        }
        Ok(())
    }
}

fn check_neighborhood(size: usize) -> Result<()> {
    if size % 2 == 0 {
        return Err(Error::Config(format!(
            "Neighborhood size must be odd to centre on a pixel, got {size}"
        )));
    }
    Ok(())
}

/// Files `<prefix><k>.<ext>` in `dir`, sorted by `k`.
fn numbered_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut numbered = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !has_supported_extension(&path) {
            continue;
        }
        let index = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.strip_prefix(prefix))
            .and_then(|k| k.parse::<usize>().ok());
        if let Some(index) = index {
            numbered.push((index, path));
        }
    }

    if numbered.is_empty() {
        return Err(Error::Dataset(format!(
            "No `{prefix}<k>` images in {}",
            dir.display()
        )));
    }

    numbered.sort();
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}

#[derive(Clone, Debug)]
pub struct SpectralBatch<B: Backend> {
    /// `[batch, 1, values, 1]`, one column per sample
    pub spectra: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct AbundanceBatch<B: Backend> {
    /// `[batch, 1, values, 1]`, one column per sample
    pub spectra: Tensor<B, 4>,
    /// `[batch, endmembers]`
    pub targets: Tensor<B, 2>,
}

fn spectra_tensor<B: Backend>(spectra: Vec<f32>, batch_size: usize, device: &B::Device) -> Tensor<B, 4> {
    let values = spectra.len().checked_div(batch_size).unwrap_or(0);
    Tensor::from_data(
        TensorData::new(spectra, Shape::new([batch_size, 1, values, 1])).convert::<B::FloatElem>(),
        device,
    )
}

#[derive(Clone, Debug)]
pub struct SpectralBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> SpectralBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<SpectralItem, SpectralBatch<B>> for SpectralBatcher<B> {
    fn batch(&self, items: Vec<SpectralItem>) -> SpectralBatch<B> {
        let batch_size = items.len();
        let targets: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let spectra: Vec<f32> = items.into_iter().flat_map(|item| item.spectrum).collect();

        SpectralBatch {
            spectra: spectra_tensor(spectra, batch_size, &self.device),
            targets: Tensor::from_data(
                TensorData::new(targets, Shape::new([batch_size])).convert::<B::IntElem>(),
                &self.device,
            ),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AbundanceBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> AbundanceBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<AbundanceItem, AbundanceBatch<B>> for AbundanceBatcher<B> {
    fn batch(&self, items: Vec<AbundanceItem>) -> AbundanceBatch<B> {
        let batch_size = items.len();
        let endmembers = items.first().map_or(0, |item| item.abundances.len());

        let mut spectra = Vec::new();
        let mut targets = Vec::with_capacity(batch_size * endmembers);
        for item in items {
            spectra.extend(item.spectrum);
            targets.extend(item.abundances);
        }

        AbundanceBatch {
            spectra: spectra_tensor(spectra, batch_size, &self.device),
            targets: Tensor::from_data(
                TensorData::new(targets, Shape::new([batch_size, endmembers]))
                    .convert::<B::FloatElem>(),
                &self.device,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::raster::tests::{scratch_dir, write_gray};
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn cube() -> HyperspectralCube {
        // 3 bands over a 2x2 image; band b at pixel p holds 10 * b + p.
        let data = (0..3)
            .flat_map(|b| (0..4).map(move |p| (10 * b + p) as f32))
            .collect();
        HyperspectralCube::new(Raster::new(3, 2, 2, data).unwrap())
    }

    #[test]
    fn samples_drop_background_and_remap_labels() {
        let labels = LabelMap {
            height: 2,
            width: 2,
            labels: vec![0, 7, 3, 7],
        };
        let samples = cube().samples(&labels, Some(0), 1).unwrap();

        assert_eq!(samples.class_ids, vec![3, 7]);
        assert_eq!(samples.num_classes(), 2);
        assert_eq!(samples.labels(), vec![1, 0, 1]);
        assert_eq!(samples.items[0].spectrum, vec![1.0, 11.0, 21.0]);

        let all = cube().samples(&labels, None, 1).unwrap();
        assert_eq!(all.items.len(), 4);
        assert_eq!(all.class_ids, vec![0, 3, 7]);
    }

    #[test]
    fn neighborhoods_are_zero_padded_windows() {
        let cube = cube();
        // Window around the top-left pixel: only the bottom-right 2x2 of the
        // 3x3 window lies inside the image.
        let window = cube.neighborhood(0, 0, 3);
        assert_eq!(window.len(), 3 * 3 * 3);

        let pixel = |row: usize, col: usize| &window[(row * 3 + col) * 3..(row * 3 + col + 1) * 3];
        assert_eq!(pixel(0, 0), &[0.0; 3]);
        assert_eq!(pixel(1, 0), &[0.0; 3]);
        assert_eq!(pixel(1, 1), &[0.0, 10.0, 20.0]);
        assert_eq!(pixel(1, 2), &[1.0, 11.0, 21.0]);
        assert_eq!(pixel(2, 2), &[3.0, 13.0, 23.0]);

        assert_eq!(cube.neighborhood(1, 1, 1), vec![3.0, 13.0, 23.0]);

        let labels = LabelMap {
            height: 2,
            width: 2,
            labels: vec![1, 1, 2, 2],
        };
        let samples = cube.samples(&labels, None, 3).unwrap();
        assert_eq!(samples.items[0].spectrum, window);
        assert!(matches!(
            cube.samples(&labels, None, 2),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn mismatched_label_map_is_rejected() {
        let labels = LabelMap {
            height: 1,
            width: 4,
            labels: vec![1; 4],
        };
        assert!(matches!(
            cube().samples(&labels, None, 1),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn bands_load_in_numeric_order() {
        let dir = scratch_dir("hsi");
        write_gray(&dir.join("band_10.png"), 1, 1, &[255]);
        write_gray(&dir.join("band_2.png"), 1, 1, &[0]);
        write_gray(&dir.join("labels.png"), 1, 1, &[1]);

        let cube = HyperspectralCube::from_band_dir(&dir).unwrap();
        assert_eq!(cube.bands(), 2);

        let labels = LabelMap::load(&dir.join("labels.png")).unwrap();
        let samples = cube.samples(&labels, Some(0), 1).unwrap();
        assert_eq!(samples.items[0].spectrum, vec![0.0, 1.0]);

        write_gray(&dir.join("abundance_0.png"), 1, 1, &[255]);
        write_gray(&dir.join("abundance_1.png"), 1, 1, &[0]);
        let abundances = cube.abundance_samples(&dir, 1).unwrap();
        assert_eq!(abundances[0].abundances, vec![1.0, 0.0]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn batchers_shape_spectra_as_columns() {
        let batch = SpectralBatcher::<TestBackend>::new(Default::default()).batch(vec![
            SpectralItem {
                spectrum: vec![1.0, 2.0, 3.0],
                label: 2,
            },
            SpectralItem {
                spectrum: vec![4.0, 5.0, 6.0],
                label: 0,
            },
        ]);
        assert_eq!(batch.spectra.dims(), [2, 1, 3, 1]);
        let targets: Vec<i64> = batch.targets.into_data().iter::<i64>().collect();
        assert_eq!(targets, vec![2, 0]);

        let batch = AbundanceBatcher::<TestBackend>::new(Default::default()).batch(vec![AbundanceItem {
            spectrum: vec![1.0, 2.0],
            abundances: vec![0.25, 0.75],
        }]);
        assert_eq!(batch.spectra.dims(), [1, 1, 2, 1]);
        assert_eq!(batch.targets.dims(), [1, 2]);
    }
}
