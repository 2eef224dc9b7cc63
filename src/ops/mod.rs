pub mod arithmetic;
pub mod convolution;
pub mod shape;
