use std::path::PathBuf;

use thiserror::Error;

/// Library error type for kiosk operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured library root is invalid or unreadable.
    #[error("invalid picture directory: {0}")]
    BadDir(String),

    /// The library scan completed but found no images.
    #[error("no images found in picture library")]
    NoImagesFound,

    /// A single image failed to decode or read; the candidate is dropped.
    #[error("failed to load image {path}: {source}")]
    LoadFailure {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// A frame buffer could not be allocated; degrade to a placeholder.
    #[error("frame allocation failed ({width}x{height})")]
    AllocationFailure { width: u32, height: u32 },

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),

    /// Display surface failure from the rendering backend.
    #[error("render error: {0}")]
    Render(anyhow::Error),
}

impl Error {
    pub fn load(path: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self {
        Self::LoadFailure {
            path: path.into(),
            source: source.into(),
        }
    }
}
