use burn::{data::dataloader::batcher::Batcher, prelude::*};

/// One training patch: channel-first image and binary mask.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentationItem {
    /// `[channels, patch_size, patch_size]`, row-major.
    pub image: Vec<f32>,
    /// `[patch_size, patch_size]`, row-major.
    pub mask: Vec<bool>,
}

#[derive(Config, Debug)]
pub struct SegmentationConfig {
    #[config(default = 4)]
    pub channels: usize,
    #[config(default = 384)]
    pub patch_size: usize,
}

impl SegmentationConfig {
    pub fn image_len(&self) -> usize {
        self.channels * self.mask_len()
    }

    pub fn mask_len(&self) -> usize {
        self.patch_size * self.patch_size
    }
}

#[derive(Clone)]
pub struct SegmentationBatcher<B: Backend> {
    device: B::Device,
    config: SegmentationConfig,
}

impl<B: Backend> SegmentationBatcher<B> {
    pub fn new(device: B::Device, config: SegmentationConfig) -> Self {
        Self { device, config }
    }
}

#[derive(Clone, Debug)]
pub struct SegmentationBatch<B: Backend> {
    /// `[batch, channels, patch_size, patch_size]`
    pub images: Tensor<B, 4, Float>,
    /// `[batch, 1, patch_size, patch_size]` with values 0 or 1.
    pub masks: Tensor<B, 4, Int>,
}

impl<B: Backend> Batcher<SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher<B> {
    fn batch(&self, items: Vec<SegmentationItem>) -> SegmentationBatch<B> {
        let batch_size = items.len();
        let size = self.config.patch_size;

        let mut images = Vec::with_capacity(batch_size * self.config.image_len());
        let mut masks = Vec::with_capacity(batch_size * self.config.mask_len());

        for item in items {
            assert_eq!(
                item.image.len(),
                self.config.image_len(),
                "Patch does not hold {} bands of {size}x{size} pixels",
                self.config.channels
            );
            assert_eq!(
                item.mask.len(),
                self.config.mask_len(),
                "Mask is not {size}x{size} pixels"
            );

            images.extend(item.image);
            masks.extend(item.mask.into_iter().map(|positive| positive as i32));
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(
                images,
                Shape::new([batch_size, self.config.channels, size, size]),
            )
            .convert::<B::FloatElem>(),
            &self.device,
        );
        let masks = Tensor::<B, 4, Int>::from_data(
            TensorData::new(masks, Shape::new([batch_size, 1, size, size]))
                .convert::<B::IntElem>(),
            &self.device,
        );

        SegmentationBatch { images, masks }
    }
}
