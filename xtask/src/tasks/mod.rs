use burn::backend::{Autodiff, Wgpu};

pub mod clouds;
pub mod spectral;
pub mod split;

pub type Backend = Wgpu<f32, i32>;
pub type AutodiffBackend = Autodiff<Backend>;
