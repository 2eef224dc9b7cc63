pub mod activation;
pub mod conv;

pub use activation::{activation_layer, LeakyReLU, Sigmoid};
pub use conv::{Conv2D, ConvTranspose2D, DecoderKernel, MaxPool2D};
