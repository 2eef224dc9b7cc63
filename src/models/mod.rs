pub mod cae;

pub use cae::{ConvAutoencoder, ForwardPass, Walkthrough};
