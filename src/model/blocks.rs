use burn::{
    nn::{
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
};

/// Two same-padded 3x3 convolutions, each followed by batch norm and ReLU,
/// with dropout in between.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    first: Conv2d<B>,
    first_norm: BatchNorm<B, 2>,
    second: Conv2d<B>,
    second_norm: BatchNorm<B, 2>,
    dropout: Dropout,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.first_norm.forward(self.first.forward(x)));
        let x = self.dropout.forward(x);

        self.activation
            .forward(self.second_norm.forward(self.second.forward(x)))
    }
}

#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    pub input_channels: usize,
    pub filters: usize,
    #[config(default = "0.0")]
    pub dropout: f64,
    /// Weight of the running statistics, as in Keras (`0.9` keeps 90% of the
    /// previous running mean at every step).
    #[config(default = "0.9")]
    pub bn_momentum: f64,
}

impl ConvBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBlock<B> {
        assert!(
            (0.0..1.0).contains(&self.bn_momentum),
            "Batch norm momentum must lie in [0, 1), got {}",
            self.bn_momentum
        );
        // burn weighs the new batch statistics instead of the running ones.
        let norm = || {
            BatchNormConfig::new(self.filters)
                .with_momentum(1.0 - self.bn_momentum)
                .init(device)
        };
        let conv = |input: usize| {
            Conv2dConfig::new([input, self.filters], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };

        ConvBlock {
            first: conv(self.input_channels),
            first_norm: norm(),
            second: conv(self.filters),
            second_norm: norm(),
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Relu::new(),
        }
    }

    /// Contracting level: this block followed by a 2x2 max pool.
    pub fn down<B: Backend>(&self, device: &B::Device) -> DownBlock<B> {
        DownBlock {
            features: self.init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    /// Expanding level: a 2x2 transposed convolution from `input_channels` to
    /// `filters`, concatenated with the skip features, then this block applied
    /// to the `2 * filters` result.
    pub fn up<B: Backend>(&self, device: &B::Device) -> UpBlock<B> {
        UpBlock {
            upsample: ConvTranspose2dConfig::new([self.input_channels, self.filters], [2, 2])
                .with_stride([2, 2])
                .init(device),
            features: ConvBlockConfig {
                input_channels: 2 * self.filters,
                ..self.clone()
            }
            .init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct DownBlock<B: Backend> {
    features: ConvBlock<B>,
    pool: MaxPool2d,
}

impl<B: Backend> DownBlock<B> {
    /// Returns the pooled output and the full-resolution skip features.
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let skip = self.features.forward(x);
        (self.pool.forward(skip.clone()), skip)
    }
}

#[derive(Module, Debug)]
pub struct UpBlock<B: Backend> {
    upsample: ConvTranspose2d<B>,
    features: ConvBlock<B>,
}

impl<B: Backend> UpBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.upsample.forward(x);
        self.features.forward(Tensor::cat(vec![x, skip], 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn levels_halve_and_restore_resolution() {
        let device = Default::default();
        let down = ConvBlockConfig::new(4, 8).down::<TestBackend>(&device);
        let up = ConvBlockConfig::new(16, 8).up::<TestBackend>(&device);

        let (pooled, skip) = down.forward(Tensor::ones([2, 4, 8, 8], &device));
        assert_eq!(pooled.dims(), [2, 8, 4, 4]);
        assert_eq!(skip.dims(), [2, 8, 8, 8]);

        let deeper = Tensor::ones([2, 16, 4, 4], &device);
        assert_eq!(up.forward(deeper, skip).dims(), [2, 8, 8, 8]);
    }

    #[test]
    #[should_panic(expected = "momentum")]
    fn momentum_uses_the_keras_range() {
        ConvBlockConfig::new(1, 1)
            .with_bn_momentum(1.0)
            .init::<TestBackend>(&Default::default());
    }
}
