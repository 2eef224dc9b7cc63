// src/lib.rs

pub mod autograd;
pub mod error;
pub mod config;
#[macro_use] pub mod module;
pub mod optim;
pub mod loss;
pub mod ops;
pub mod init;
pub mod layers;
pub mod models;
pub mod dataset;
pub mod checkpoint;
pub mod train;
pub mod visualize;

pub use checkpoint::{CheckpointKey, CheckpointMetadata, CheckpointStore};
pub use config::{
    ActivationFunction, AutoencoderConfig, ErrorFunction, InputShape, LayerSpec, PoolingType,
    RunConfig, TrainingConfig,
};
pub use dataset::{DatasetProvider, InMemoryDataset, Split};
pub use error::{CaeError, Result};
pub use models::{ConvAutoencoder, ForwardPass, Walkthrough};
pub use train::{LossLog, LossSink, Trainer, TrainingReport, TrainingState};
pub use visualize::Visualizer;
