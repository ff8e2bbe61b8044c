use burn::{
    nn::conv::{Conv2d, Conv2dConfig},
    prelude::*,
    tensor::activation::{sigmoid, softmax},
};

#[cfg(feature = "training")]
use crate::{
    dataset::SegmentationBatch,
    training::{SegmentationOutput, loss::JaccardLossConfig},
};
#[cfg(feature = "training")]
use burn::{
    tensor::backend::AutodiffBackend,
    train::{TrainOutput, TrainStep, ValidStep},
};

use nn::PaddingConfig2d;

use super::blocks::{ConvBlock, ConvBlockConfig, DownBlock, UpBlock};

const LEVELS: u32 = 4;

/// Four-level encoder/decoder with skip connections. Output is a per-pixel
/// probability map `[batch, num_classes, height, width]`: sigmoid for a
/// single class, softmax otherwise.
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    down: Vec<DownBlock<B>>,
    bottleneck: ConvBlock<B>,
    up: Vec<UpBlock<B>>,
    conv: Conv2d<B>,
    head: Conv2d<B>,
    num_classes: usize,
}

#[derive(Config, Debug)]
pub struct UNetConfig {
    /// Red, green, blue and near infrared.
    #[config(default = "4")]
    pub input_channels: usize,
    #[config(default = "16")]
    pub base_channels: usize,
    #[config(default = "1")]
    pub num_classes: usize,
    #[config(default = "0.9")]
    pub bn_momentum: f64,
    #[config(default = "0.0")]
    pub dropout: f64,
}

impl UNetConfig {
    fn conv_block(&self, input_channels: usize, filters: usize) -> ConvBlockConfig {
        ConvBlockConfig::new(input_channels, filters)
            .with_bn_momentum(self.bn_momentum)
            .with_dropout(self.dropout)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet<B> {
        assert!(self.input_channels > 0, "U-Net needs at least one input channel");
        assert!(self.num_classes > 0, "U-Net needs at least one output class");

        let base = self.base_channels;
        let filters = |level: u32| base * 2usize.pow(level);

        let down = (0..LEVELS)
            .map(|level| {
                let input = if level == 0 { self.input_channels } else { filters(level - 1) };
                self.conv_block(input, filters(level)).down(device)
            })
            .collect();
        let up = (0..LEVELS)
            .rev()
            .map(|level| self.conv_block(filters(level + 1), filters(level)).up(device))
            .collect();

        UNet {
            down,
            bottleneck: self.conv_block(filters(LEVELS - 1), filters(LEVELS)).init(device),
            up,
            conv: Conv2dConfig::new([base, base], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            head: Conv2dConfig::new([base, self.num_classes], [1, 1]).init(device),
            num_classes: self.num_classes,
        }
    }
}

impl<B: Backend> UNet<B> {
    /// Height and width must be multiples of 16.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut skips = Vec::with_capacity(self.down.len());
        let mut x = images;
        for block in &self.down {
            let (pooled, skip) = block.forward(x);
            skips.push(skip);
            x = pooled;
        }

        let x = self.bottleneck.forward(x);
        let x = self
            .up
            .iter()
            .zip(skips.into_iter().rev())
            .fold(x, |x, (block, skip)| block.forward(x, skip));

        let x = self.head.forward(self.conv.forward(x));

        if self.num_classes == 1 {
            sigmoid(x)
        } else {
            softmax(x, 1)
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    #[cfg(feature = "training")]
    pub fn forward_segmentation(&self, item: SegmentationBatch<B>) -> SegmentationOutput<B> {
        let targets = item.masks;
        let output = self.forward(item.images);

        let loss = JaccardLossConfig::new()
            .with_num_classes(self.num_classes)
            .init()
            .forward(output.clone(), targets.clone());

        SegmentationOutput {
            loss,
            output,
            targets,
        }
    }
}

/// Probability of the positive class: the last channel of a probability map.
pub fn positive_class<B: Backend>(probabilities: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, channels, _, _] = probabilities.dims();
    probabilities.narrow(1, channels - 1, 1)
}

#[cfg(feature = "training")]
impl<B: AutodiffBackend> TrainStep<SegmentationBatch<B>, SegmentationOutput<B>> for UNet<B> {
    fn step(&self, batch: SegmentationBatch<B>) -> TrainOutput<SegmentationOutput<B>> {
        let item = self.forward_segmentation(batch);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

#[cfg(feature = "training")]
impl<B: Backend> ValidStep<SegmentationBatch<B>, SegmentationOutput<B>> for UNet<B> {
    fn step(&self, batch: SegmentationBatch<B>) -> SegmentationOutput<B> {
        self.forward_segmentation(batch)
    }
}
