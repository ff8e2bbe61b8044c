mod blocks;
pub mod spectral;
mod unet;

pub use blocks::{ConvBlock, ConvBlockConfig, DownBlock, UpBlock};

pub use spectral::{CubeBlock, SpectralCnn, SpectralCnnConfig, SpectralVariant, UnmixingCnn};
pub use unet::{UNet, UNetConfig, positive_class};
