//! Convolutional networks over hyperspectral samples.
//!
//! Samples enter as `[batch, 1, values, 1]`. The pixel variants read one
//! spectrum per sample: every convolution and pooling window has width 1 and
//! slides along the spectral axis only. The cube variant reads an `n x n`
//! neighborhood, pixel after pixel with all bands each, and convolves over
//! the window with the bands as channels.

use std::str::FromStr;

use burn::{
    nn::{
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
    tensor::activation::softmax,
};

use crate::{Error, Result};

#[cfg(feature = "training")]
use crate::dataset::{AbundanceBatch, SpectralBatch};
#[cfg(feature = "training")]
use burn::{
    nn::loss::{CrossEntropyLossConfig, MseLoss, Reduction},
    tensor::backend::AutodiffBackend,
    train::{ClassificationOutput, RegressionOutput, TrainOutput, TrainStep, ValidStep},
};

/// Strides of the four convolutions in a strided block.
const STRIDED_BLOCK_STRIDES: [usize; 4] = [1, 3, 2, 2];

/// Smallest window the cube variant reduces to a single position.
pub const CUBE_MIN_NEIGHBORHOOD: usize = 4;

#[derive(Config, Debug, PartialEq, Eq)]
pub enum SpectralVariant {
    /// Four convolutions with strides 1, 3, 2 and 2.
    Strided,
    /// Convolution with stride 2, batch norm and a max pool of 2.
    Pooled,
    /// Spatial convolutions over a pixel neighborhood, classified by a final
    /// convolution instead of dense layers.
    Cube,
}

impl SpectralVariant {
    /// Looks up a variant by its registered model name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "model_2d" | "strided" => Ok(SpectralVariant::Strided),
            "pool_model_2d" | "pooled" => Ok(SpectralVariant::Pooled),
            "model_3d_mfl" | "cube" => Ok(SpectralVariant::Cube),
            other => Err(Error::Config(format!("Unknown model `{other}`"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpectralVariant::Strided => "model_2d",
            SpectralVariant::Pooled => "pool_model_2d",
            SpectralVariant::Cube => "model_3d_mfl",
        }
    }

    /// Whether samples are pixel neighborhoods rather than single spectra.
    pub fn takes_neighborhoods(&self) -> bool {
        matches!(self, SpectralVariant::Cube)
    }

    fn hidden_units(&self) -> usize {
        match self {
            SpectralVariant::Strided => 200,
            SpectralVariant::Pooled | SpectralVariant::Cube => 512,
        }
    }

    /// Spectral length after one block, `None` if a window no longer fits.
    fn block_output(&self, length: usize, kernel_size: usize) -> Option<usize> {
        let conv = |length: usize, stride: usize| {
            length
                .checked_sub(kernel_size)
                .map(|rest| rest / stride + 1)
        };

        match self {
            SpectralVariant::Strided => STRIDED_BLOCK_STRIDES
                .iter()
                .try_fold(length, |length, &stride| conv(length, stride)),
            SpectralVariant::Pooled => conv(length, 2)?.checked_sub(1).filter(|&l| l > 0),
            SpectralVariant::Cube => Some(length),
        }
    }
}

impl FromStr for SpectralVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

#[derive(Config, Debug)]
pub struct SpectralCnnConfig {
    /// Number of spectral bands.
    pub input_size: usize,
    pub n_classes: usize,
    #[config(default = 5)]
    pub kernel_size: usize,
    #[config(default = 200)]
    pub n_kernels: usize,
    #[config(default = 1)]
    pub n_layers: usize,
    #[config(default = "SpectralVariant::Strided")]
    pub variant: SpectralVariant,
    #[config(default = 0.9)]
    pub bn_momentum: f64,
    /// Side of the pixel window in each sample; 1 for single spectra.
    #[config(default = 1)]
    pub neighborhood_size: usize,
}

impl SpectralCnnConfig {
    /// Spectral length left after every block, or `None` when the input is
    /// too short for the configured depth and kernel size.
    ///
    /// The cube variant collapses its window to a single position.
    pub fn output_length(&self) -> Option<usize> {
        if self.variant.takes_neighborhoods() {
            return (self.neighborhood_size >= CUBE_MIN_NEIGHBORHOOD).then_some(1);
        }
        (0..self.n_layers).try_fold(self.input_size, |length, _| {
            self.variant.block_output(length, self.kernel_size)
        })
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SpectralCnn<B> {
        self.assertions();

        if self.variant.takes_neighborhoods() {
            return SpectralCnn {
                blocks: Vec::new(),
                cube: Some(self.cube_block(device)),
                dense: Vec::new(),
                activation: Relu::new(),
            };
        }

        let length = self.output_length().unwrap_or_default();

        let blocks = (0..self.n_layers)
            .map(|layer| {
                let input_channels = if layer == 0 { 1 } else { self.n_kernels };
                self.block(input_channels, device)
            })
            .collect();

        let hidden = self.variant.hidden_units();

        SpectralCnn {
            blocks,
            cube: None,
            dense: vec![
                LinearConfig::new(self.n_kernels * length, hidden).init(device),
                LinearConfig::new(hidden, 128).init(device),
                LinearConfig::new(128, self.n_classes).init(device),
            ],
            activation: Relu::new(),
        }
    }

    fn cube_block<B: Backend>(&self, device: &B::Device) -> CubeBlock<B> {
        let window = self.neighborhood_size - 3;

        CubeBlock {
            spatial: Conv2dConfig::new([self.input_size, self.n_kernels], [window, window])
                .init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            mix: Conv2dConfig::new([self.n_kernels, self.n_kernels], [2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            classifier: Conv2dConfig::new([self.n_kernels, self.n_classes], [2, 2]).init(device),
            activation: Relu::new(),
            neighborhood: self.neighborhood_size,
            bands: self.input_size,
        }
    }

    fn block<B: Backend>(&self, input_channels: usize, device: &B::Device) -> SpectralBlock<B> {
        let conv = |input_channels: usize, stride: usize| {
            Conv2dConfig::new([input_channels, self.n_kernels], [self.kernel_size, 1])
                .with_stride([stride, 1])
                .init(device)
        };

        match self.variant {
            SpectralVariant::Strided | SpectralVariant::Cube => SpectralBlock {
                convs: STRIDED_BLOCK_STRIDES
                    .iter()
                    .enumerate()
                    .map(|(i, &stride)| conv(if i == 0 { input_channels } else { self.n_kernels }, stride))
                    .collect(),
                norm: None,
                pool: None,
                activation: Relu::new(),
            },
            SpectralVariant::Pooled => SpectralBlock {
                convs: vec![conv(input_channels, 2)],
                norm: Some(
                    BatchNormConfig::new(self.n_kernels)
                        .with_momentum(1.0 - self.bn_momentum)
                        .init(device),
                ),
                pool: Some(MaxPool2dConfig::new([2, 1]).with_strides([1, 1]).init()),
                activation: Relu::new(),
            },
        }
    }

    fn assertions(&self) {
        assert!(self.input_size > 0, "Spectra need at least one band");
        assert!(self.n_classes > 0, "Number of classes must be positive");
        assert!(self.n_layers > 0, "At least one convolutional block is needed");
        assert!(self.kernel_size > 0, "Kernel size must be positive");
        if self.variant.takes_neighborhoods() {
            assert!(
                self.neighborhood_size >= CUBE_MIN_NEIGHBORHOOD,
                "{} needs a neighborhood of at least {CUBE_MIN_NEIGHBORHOOD} pixels, got {}",
                self.variant.name(),
                self.neighborhood_size
            );
            return;
        }
        assert!(
            self.neighborhood_size == 1,
            "{} reads single spectra, got a neighborhood of {}",
            self.variant.name(),
            self.neighborhood_size
        );
        assert!(
            self.output_length().is_some(),
            "{} bands are too few for {} {} block(s) with kernel size {}",
            self.input_size,
            self.n_layers,
            self.variant.name(),
            self.kernel_size
        );
    }
}

#[derive(Module, Debug)]
pub struct SpectralBlock<B: Backend> {
    convs: Vec<Conv2d<B>>,
    norm: Option<BatchNorm<B, 2>>,
    pool: Option<MaxPool2d>,
    activation: Relu,
}

impl<B: Backend> SpectralBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = x;
        for conv in &self.convs {
            x = self.activation.forward(conv.forward(x));
        }
        if let Some(norm) = &self.norm {
            x = norm.forward(x);
        }
        if let Some(pool) = &self.pool {
            x = pool.forward(x);
        }
        x
    }
}

/// Window convolution, 2x2 max pool, a `same` 2x2 convolution and a final
/// 2x2 convolution with one channel per class.
#[derive(Module, Debug)]
pub struct CubeBlock<B: Backend> {
    spatial: Conv2d<B>,
    pool: MaxPool2d,
    mix: Conv2d<B>,
    classifier: Conv2d<B>,
    activation: Relu,
    neighborhood: usize,
    bands: usize,
}

impl<B: Backend> CubeBlock<B> {
    /// `[batch, 1, n * n * bands, 1]` to `[batch, n_classes]` logits.
    pub fn forward(&self, samples: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch, ..] = samples.dims();
        let n = self.neighborhood;

        // [batch, row, col, band] to [batch, band, row, col]
        let x = samples
            .reshape([batch, n, n, self.bands])
            .swap_dims(1, 3)
            .swap_dims(2, 3);

        let x = self.pool.forward(self.spatial.forward(x));
        let [_, _, height, width] = x.dims();

        // An even kernel padded to keep the size pads after only: pad both
        // sides, then drop the leading row and column.
        let x = self.mix.forward(x);
        let [_, channels, _, _] = x.dims();
        let x = self
            .activation
            .forward(x.slice([0..batch, 0..channels, 1..height + 1, 1..width + 1]));

        self.classifier.forward(x).flatten::<2>(1, 3)
    }
}

/// Spectral blocks followed by three dense layers, or a cube block. Produces
/// class logits.
#[derive(Module, Debug)]
pub struct SpectralCnn<B: Backend> {
    blocks: Vec<SpectralBlock<B>>,
    cube: Option<CubeBlock<B>>,
    dense: Vec<Linear<B>>,
    activation: Relu,
}

impl<B: Backend> SpectralCnn<B> {
    /// `[batch, 1, values, 1]` to `[batch, n_classes]` logits.
    pub fn forward(&self, samples: Tensor<B, 4>) -> Tensor<B, 2> {
        if let Some(cube) = &self.cube {
            return cube.forward(samples);
        }

        let x = self
            .blocks
            .iter()
            .fold(samples, |x, block| block.forward(x));

        let last = self.dense.len().saturating_sub(1);
        self.dense
            .iter()
            .enumerate()
            .fold(x.flatten::<2>(1, 3), |x, (i, layer)| {
                let x = layer.forward(x);
                if i < last { self.activation.forward(x) } else { x }
            })
    }

    pub fn probabilities(&self, spectra: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(spectra), 1)
    }

    #[cfg(feature = "training")]
    pub fn forward_classification(&self, batch: SpectralBatch<B>) -> ClassificationOutput<B> {
        let output = self.forward(batch.spectra);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), batch.targets.clone());

        ClassificationOutput::new(loss, output, batch.targets)
    }
}

#[cfg(feature = "training")]
impl<B: AutodiffBackend> TrainStep<SpectralBatch<B>, ClassificationOutput<B>> for SpectralCnn<B> {
    fn step(&self, batch: SpectralBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

#[cfg(feature = "training")]
impl<B: Backend> ValidStep<SpectralBatch<B>, ClassificationOutput<B>> for SpectralCnn<B> {
    fn step(&self, batch: SpectralBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch)
    }
}

/// Spectral CNN regressing per-pixel endmember abundances, which sum to 1.
#[derive(Module, Debug)]
pub struct UnmixingCnn<B: Backend> {
    backbone: SpectralCnn<B>,
}

impl SpectralCnnConfig {
    /// Unmixing network with one output per endmember (`n_classes`).
    pub fn init_unmixing<B: Backend>(&self, device: &B::Device) -> UnmixingCnn<B> {
        UnmixingCnn {
            backbone: self.init(device),
        }
    }
}

impl<B: Backend> UnmixingCnn<B> {
    pub fn forward(&self, spectra: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.backbone.forward(spectra), 1)
    }

    #[cfg(feature = "training")]
    pub fn forward_regression(&self, batch: AbundanceBatch<B>) -> RegressionOutput<B> {
        let output = self.forward(batch.spectra);
        let loss = MseLoss::new().forward(output.clone(), batch.targets.clone(), Reduction::Mean);

        RegressionOutput::new(loss, output, batch.targets)
    }
}

#[cfg(feature = "training")]
impl<B: AutodiffBackend> TrainStep<AbundanceBatch<B>, RegressionOutput<B>> for UnmixingCnn<B> {
    fn step(&self, batch: AbundanceBatch<B>) -> TrainOutput<RegressionOutput<B>> {
        let item = self.forward_regression(batch);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

#[cfg(feature = "training")]
impl<B: Backend> ValidStep<AbundanceBatch<B>, RegressionOutput<B>> for UnmixingCnn<B> {
    fn step(&self, batch: AbundanceBatch<B>) -> RegressionOutput<B> {
        self.forward_regression(batch)
    }
}
