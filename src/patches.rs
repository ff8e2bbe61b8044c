//! Tiling of large scenes into square patches and reassembly of per-patch
//! predictions.
//!
//! Images are channel-first `[channels, height, width]` tensors. Patches are
//! ordered row-major: index `i` sits at grid cell `(i / cols, i % cols)`, whose
//! top-left pixel is `(row * patch_size, col * patch_size)`.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Zero padding added around an image so that it splits into whole patches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Padding {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl Padding {
    /// Smallest symmetric padding that makes both dimensions multiples of
    /// `patch_size`. Odd totals put the extra pixel at the bottom/right.
    pub fn symmetric(height: usize, width: usize, patch_size: usize) -> Self {
        let (top, bottom) = split_evenly(height.next_multiple_of(patch_size) - height);
        let (left, right) = split_evenly(width.next_multiple_of(patch_size) - width);

        Self {
            top,
            bottom,
            left,
            right,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn split_evenly(total: usize) -> (usize, usize) {
    let first = total / 2;
    (first, total - first)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchGrid {
    pub rows: usize,
    pub cols: usize,
    pub patch_size: usize,
}

impl PatchGrid {
    pub fn new(height: usize, width: usize, patch_size: usize) -> Result<Self> {
        if patch_size == 0 {
            return Err(Error::PatchGrid("patch size must be positive".to_string()));
        }
        if height % patch_size != 0 || width % patch_size != 0 {
            return Err(Error::PatchGrid(format!(
                "{height}x{width} is not a multiple of patch size {patch_size}"
            )));
        }

        Ok(Self {
            rows: height / patch_size,
            cols: width / patch_size,
            patch_size,
        })
    }

    /// Grid over the padded image together with the padding to apply.
    pub fn covering(height: usize, width: usize, patch_size: usize) -> Result<(Self, Padding)> {
        if patch_size == 0 {
            return Err(Error::PatchGrid("patch size must be positive".to_string()));
        }
        let padding = Padding::symmetric(height, width, patch_size);
        let grid = Self::new(
            height + padding.top + padding.bottom,
            width + padding.left + padding.right,
            patch_size,
        )?;

        Ok((grid, padding))
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn height(&self) -> usize {
        self.rows * self.patch_size
    }

    pub fn width(&self) -> usize {
        self.cols * self.patch_size
    }

    pub fn position(&self, index: usize) -> (usize, usize) {
        (index / self.cols, index % self.cols)
    }

    /// Top-left pixel `(y, x)` of the patch at `index`.
    pub fn origin(&self, index: usize) -> (usize, usize) {
        let (row, col) = self.position(index);
        (row * self.patch_size, col * self.patch_size)
    }
}

pub fn pad<B: Backend>(image: Tensor<B, 3>, padding: &Padding) -> Tensor<B, 3> {
    if padding.is_empty() {
        return image;
    }

    let device = image.device();
    let [channels, height, _] = image.dims();

    let mut horizontal = Vec::with_capacity(3);
    if padding.left > 0 {
        horizontal.push(Tensor::zeros([channels, height, padding.left], &device));
    }
    horizontal.push(image);
    if padding.right > 0 {
        horizontal.push(Tensor::zeros([channels, height, padding.right], &device));
    }
    let image = Tensor::cat(horizontal, 2);

    let [_, _, width] = image.dims();
    let mut vertical = Vec::with_capacity(3);
    if padding.top > 0 {
        vertical.push(Tensor::zeros([channels, padding.top, width], &device));
    }
    vertical.push(image);
    if padding.bottom > 0 {
        vertical.push(Tensor::zeros([channels, padding.bottom, width], &device));
    }

    Tensor::cat(vertical, 1)
}

pub fn unpad<B: Backend>(image: Tensor<B, 3>, padding: &Padding) -> Result<Tensor<B, 3>> {
    let [_, height, width] = image.dims();
    let vertical = padding.top + padding.bottom;
    let horizontal = padding.left + padding.right;

    if vertical > height || horizontal > width {
        return Err(Error::PatchGrid(format!(
            "padding {padding:?} exceeds image {height}x{width}"
        )));
    }

    Ok(image
        .narrow(1, padding.top, height - vertical)
        .narrow(2, padding.left, width - horizontal))
}

/// Strips symmetric padding so that the image becomes `height x width`.
pub fn unpad_to<B: Backend>(image: Tensor<B, 3>, height: usize, width: usize) -> Result<Tensor<B, 3>> {
    let [_, padded_height, padded_width] = image.dims();
    if height > padded_height || width > padded_width {
        return Err(Error::PatchGrid(format!(
            "cannot unpad {padded_height}x{padded_width} to {height}x{width}"
        )));
    }

    let (top, bottom) = split_evenly(padded_height - height);
    let (left, right) = split_evenly(padded_width - width);

    unpad(
        image,
        &Padding {
            top,
            bottom,
            left,
            right,
        },
    )
}

/// Splits an image whose dimensions match `grid` into `[n, channels, p, p]`.
pub fn tile<B: Backend>(image: Tensor<B, 3>, grid: &PatchGrid) -> Result<Tensor<B, 4>> {
    let [channels, height, width] = image.dims();
    if height != grid.height() || width != grid.width() {
        return Err(Error::shape_mismatch(
            &[channels, grid.height(), grid.width()],
            &[channels, height, width],
        ));
    }
    if grid.is_empty() {
        return Err(Error::PatchGrid("grid has no patches".to_string()));
    }

    let patches = (0..grid.len())
        .map(|index| {
            let (y, x) = grid.origin(index);
            image
                .clone()
                .narrow(1, y, grid.patch_size)
                .narrow(2, x, grid.patch_size)
        })
        .collect();

    Ok(Tensor::stack::<4>(patches, 0))
}

/// Places every patch of `[n, channels, p, p]` back at its grid cell.
pub fn reconstruct<B: Backend>(patches: Tensor<B, 4>, grid: &PatchGrid) -> Result<Tensor<B, 3>> {
    let [count, channels, patch_height, patch_width] = patches.dims();
    let expected = [grid.len(), channels, grid.patch_size, grid.patch_size];
    if [count, channels, patch_height, patch_width] != expected || grid.is_empty() {
        return Err(Error::shape_mismatch(
            &expected,
            &[count, channels, patch_height, patch_width],
        ));
    }

    let rows = (0..grid.rows)
        .map(|row| {
            let cells = (0..grid.cols)
                .map(|col| {
                    patches
                        .clone()
                        .narrow(0, row * grid.cols + col, 1)
                        .reshape([channels, grid.patch_size, grid.patch_size])
                })
                .collect();
            Tensor::cat(cells, 2)
        })
        .collect();

    Ok(Tensor::cat(rows, 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn ramp(channels: usize, height: usize, width: usize) -> Tensor<TestBackend, 3> {
        let len = (channels * height * width) as i64;
        Tensor::<TestBackend, 1, Int>::arange(0..len, &Default::default())
            .float()
            .reshape([channels, height, width])
    }

    #[test]
    fn grid_requires_whole_patches() {
        assert!(PatchGrid::new(8, 12, 4).is_ok());
        assert!(matches!(PatchGrid::new(8, 10, 4), Err(Error::PatchGrid(_))));
        assert!(matches!(PatchGrid::new(8, 8, 0), Err(Error::PatchGrid(_))));
    }

    #[test]
    fn patch_origins_are_row_major() {
        let grid = PatchGrid::new(6, 9, 3).unwrap();
        assert_eq!(grid.len(), 6);
        assert_eq!(grid.origin(0), (0, 0));
        assert_eq!(grid.origin(2), (0, 6));
        assert_eq!(grid.origin(3), (3, 0));
        assert_eq!(grid.origin(5), (3, 6));
    }

    #[test]
    fn symmetric_padding_puts_the_odd_pixel_last() {
        let padding = Padding::symmetric(5, 8, 4);
        assert_eq!(
            padding,
            Padding {
                top: 1,
                bottom: 2,
                left: 0,
                right: 0
            }
        );

        let (grid, _) = PatchGrid::covering(5, 8, 4).unwrap();
        assert_eq!((grid.rows, grid.cols), (2, 2));
    }

    #[test]
    fn tile_then_reconstruct_is_identity() {
        let image = ramp(2, 6, 9);
        let grid = PatchGrid::new(6, 9, 3).unwrap();

        let patches = tile(image.clone(), &grid).unwrap();
        assert_eq!(patches.dims(), [6, 2, 3, 3]);

        let rebuilt = reconstruct(patches, &grid).unwrap();
        rebuilt.into_data().assert_eq(&image.into_data(), true);
    }

    #[test]
    fn tiles_hold_the_expected_pixels() {
        let image = ramp(1, 4, 4);
        let grid = PatchGrid::new(4, 4, 2).unwrap();
        let patches = tile(image, &grid).unwrap();

        // Patch 1 is the top-right 2x2 block: pixels 2, 3, 6, 7.
        let second: Vec<f32> = patches.narrow(0, 1, 1).into_data().iter::<f32>().collect();
        assert_eq!(second, vec![2.0, 3.0, 6.0, 7.0]);
    }

    #[test]
    fn pad_then_unpad_is_identity() {
        let image = ramp(3, 5, 7);
        let (grid, padding) = PatchGrid::covering(5, 7, 4).unwrap();

        let padded = pad(image.clone(), &padding);
        assert_eq!(padded.dims(), [3, grid.height(), grid.width()]);

        let restored = unpad(padded.clone(), &padding).unwrap();
        restored.into_data().assert_eq(&image.clone().into_data(), true);

        let restored = unpad_to(padded, 5, 7).unwrap();
        restored.into_data().assert_eq(&image.into_data(), true);
    }

    #[test]
    fn padded_scene_round_trips_through_patches() {
        let image = ramp(1, 10, 7);
        let (grid, padding) = PatchGrid::covering(10, 7, 4).unwrap();

        let patches = tile(pad(image.clone(), &padding), &grid).unwrap();
        let rebuilt = unpad(reconstruct(patches, &grid).unwrap(), &padding).unwrap();

        rebuilt.into_data().assert_eq(&image.into_data(), true);
    }

    #[test]
    fn reconstruct_rejects_wrong_patch_count() {
        let grid = PatchGrid::new(4, 4, 2).unwrap();
        let patches = Tensor::<TestBackend, 4>::zeros([3, 1, 2, 2], &Default::default());
        assert!(matches!(
            reconstruct(patches, &grid),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
