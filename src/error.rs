// src/error.rs
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaeError {
    /// Unknown option name, empty layer list, non-positive dimension, ...
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Input batch does not match the geometry the model was built for.
    #[error("shape error: {0}")]
    Shape(String),

    #[error("i/o error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint encoding error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("metadata encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("dataset error: {0}")]
    Dataset(String),
}

impl CaeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CaeError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CaeError::Configuration(msg.into())
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        CaeError::Shape(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CaeError>;
