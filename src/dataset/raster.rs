use std::path::{Path, PathBuf};

use burn::prelude::*;
use image::{ColorType, DynamicImage};

use crate::{Error, Result};

/// File extensions accepted for band, mask and label images.
pub const SUPPORTED_FILES: [&str; 6] = ["tif", "tiff", "png", "bmp", "jpg", "jpeg"];

/// Channel-first `[channels, height, width]` image.
#[derive(Clone, Debug, PartialEq)]
pub struct Raster {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl Raster {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != channels * height * width {
            return Err(Error::shape_mismatch(
                &[channels * height * width],
                &[data.len()],
            ));
        }

        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    /// Stacks single-band images of identical size.
    pub fn from_bands(bands: Vec<Vec<f32>>, height: usize, width: usize) -> Result<Self> {
        let channels = bands.len();
        let mut data = Vec::with_capacity(channels * height * width);
        for band in bands {
            if band.len() != height * width {
                return Err(Error::shape_mismatch(&[height * width], &[band.len()]));
            }
            data.extend(band);
        }

        Self::new(channels, height, width, data)
    }

    /// Loads one grayscale image per band, scaled to `[0, 1]` by the range of
    /// its pixel type.
    pub fn load_bands<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut bands = Vec::with_capacity(paths.len());
        let mut size = None;

        for path in paths {
            let image = open(path.as_ref())?;
            let dims = (image.height() as usize, image.width() as usize);

            match size {
                None => size = Some(dims),
                Some(expected) if expected != dims => {
                    return Err(Error::shape_mismatch(
                        &[expected.0, expected.1],
                        &[dims.0, dims.1],
                    ));
                }
                Some(_) => {}
            }

            bands.push(image.to_luma32f().into_raw());
        }

        let (height, width) = size.ok_or_else(|| Error::Dataset("no bands given".to_string()))?;
        Self::from_bands(bands, height, width)
    }

    pub fn band(&self, channel: usize) -> &[f32] {
        let len = self.height * self.width;
        &self.data[channel * len..(channel + 1) * len]
    }

    /// All channel values at pixel `(y, x)`.
    pub fn pixel(&self, y: usize, x: usize) -> Vec<f32> {
        let offset = y * self.width + x;
        let len = self.height * self.width;
        (0..self.channels)
            .map(|c| self.data[c * len + offset])
            .collect()
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        Tensor::from_data(
            TensorData::new(
                self.data.clone(),
                Shape::new([self.channels, self.height, self.width]),
            )
            .convert::<B::FloatElem>(),
            device,
        )
    }
}

/// Binary mask: a pixel is positive when its scaled value exceeds `threshold`.
pub fn load_mask(path: &Path, threshold: f32) -> Result<Raster> {
    let image = open(path)?;
    let (height, width) = (image.height() as usize, image.width() as usize);
    let mask = image
        .to_luma32f()
        .into_raw()
        .into_iter()
        .map(|v| if v > threshold { 1.0 } else { 0.0 })
        .collect();

    Raster::new(1, height, width, mask)
}

/// Integer labels stored in the first channel, without rescaling.
pub fn load_labels(path: &Path) -> Result<(Vec<usize>, usize, usize)> {
    let image = open(path)?;
    let (height, width) = (image.height() as usize, image.width() as usize);

    let labels = match image.color() {
        ColorType::L8 => image.into_luma8().iter().map(|&x| x as usize).collect(),
        ColorType::L16 => image.into_luma16().iter().map(|&x| x as usize).collect(),
        ColorType::Rgb8 => image
            .into_rgb8()
            .iter()
            .step_by(3)
            .map(|&x| x as usize)
            .collect(),
        ColorType::Rgb16 => image
            .into_rgb16()
            .iter()
            .step_by(3)
            .map(|&x| x as usize)
            .collect(),
        other => {
            return Err(Error::Dataset(format!(
                "Unsupported label image color type {other:?}: {}",
                path.display()
            )));
        }
    };

    Ok((labels, height, width))
}

/// First existing `<dir>/<stem>.<ext>` over the supported extensions.
pub fn find_image(dir: &Path, stem: &str) -> Option<PathBuf> {
    SUPPORTED_FILES
        .iter()
        .flat_map(|ext| [ext.to_string(), ext.to_uppercase()])
        .map(|ext| dir.join(format!("{stem}.{ext}")))
        .find(|path| path.is_file())
}

pub fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_FILES
                .iter()
                .any(|valid_ext| valid_ext.eq_ignore_ascii_case(ext))
        })
}

fn open(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|source| Error::Image {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{GrayImage, ImageBuffer};

    /// Fresh directory under the system temp dir.
    pub(crate) fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "burn-remote-sensing-{name}-{}",
            std::process::id()
        ));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub(crate) fn write_gray(path: &Path, width: u32, height: u32, pixels: &[u8]) {
        let image: GrayImage = ImageBuffer::from_raw(width, height, pixels.to_vec()).unwrap();
        image.save(path).unwrap();
    }

    #[test]
    fn bands_stack_channel_first() {
        let raster = Raster::from_bands(vec![vec![1.0, 2.0], vec![3.0, 4.0]], 1, 2).unwrap();
        assert_eq!(raster.band(1), &[3.0, 4.0]);
        assert_eq!(raster.pixel(0, 1), vec![2.0, 4.0]);

        let tensor = raster.to_tensor::<NdArray<f32>>(&Default::default());
        assert_eq!(tensor.dims(), [2, 1, 2]);
    }

    #[test]
    fn ragged_bands_are_rejected() {
        let result = Raster::from_bands(vec![vec![1.0, 2.0], vec![3.0]], 1, 2);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn loads_scaled_bands_masks_and_labels() {
        let dir = scratch_dir("raster");
        write_gray(&dir.join("a.png"), 2, 1, &[0, 255]);
        write_gray(&dir.join("b.png"), 2, 1, &[51, 102]);

        let raster = Raster::load_bands(&[dir.join("a.png"), dir.join("b.png")]).unwrap();
        assert_eq!((raster.channels, raster.height, raster.width), (2, 1, 2));
        assert_eq!(raster.band(0), &[0.0, 1.0]);
        assert!((raster.band(1)[0] - 0.2).abs() < 1e-6);

        write_gray(&dir.join("gt.png"), 3, 1, &[0, 128, 200]);
        let mask = load_mask(&dir.join("gt.png"), 128.0 / 255.0).unwrap();
        assert_eq!(mask.data, vec![0.0, 0.0, 1.0]);

        write_gray(&dir.join("labels.png"), 3, 1, &[0, 3, 7]);
        let (labels, height, width) = load_labels(&dir.join("labels.png")).unwrap();
        assert_eq!((height, width), (1, 3));
        assert_eq!(labels, vec![0, 3, 7]);

        assert_eq!(find_image(&dir, "gt"), Some(dir.join("gt.png")));
        assert_eq!(find_image(&dir, "missing"), None);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn mismatched_band_sizes_are_rejected() {
        let dir = scratch_dir("raster-mismatch");
        write_gray(&dir.join("a.png"), 2, 1, &[0, 255]);
        write_gray(&dir.join("b.png"), 1, 2, &[0, 255]);

        let result = Raster::load_bands(&[dir.join("a.png"), dir.join("b.png")]);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
        std::fs::remove_dir_all(&dir).ok();
    }
}
