pub mod conv2d;
pub mod pool;

pub use conv2d::{Conv2D, ConvTranspose2D, DecoderKernel};
pub use pool::MaxPool2D;
