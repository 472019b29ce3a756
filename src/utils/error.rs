//! Error Handling Module
//!
//! Defines the error taxonomy for checkpoint loading and prediction.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the detector
#[derive(Error, Debug)]
pub enum DetectorError {
    /// Checkpoint path does not exist (fatal at startup)
    #[error("Model file not found at {}", .0.display())]
    CheckpointNotFound(PathBuf),

    /// Checkpoint exists but matches none of the recognized shapes (fatal at startup)
    #[error("Unsupported checkpoint format: {0}")]
    UnsupportedCheckpoint(String),

    /// Recognized checkpoint whose contents could not be loaded
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Upload without a filename
    #[error("No file provided")]
    MissingFile,

    /// Upload whose content type is not `image/*`
    #[error("Unsupported file type. Please upload an image.")]
    UnsupportedMediaType,

    /// Request body could not be parsed
    #[error("{0}")]
    BadRequest(String),

    /// Decode, preprocessing or forward pass failure
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DetectorError {
    /// Whether the caller sent something we refuse to process
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DetectorError::MissingFile
                | DetectorError::UnsupportedMediaType
                | DetectorError::BadRequest(_)
        )
    }
}

impl From<image::ImageError> for DetectorError {
    fn from(err: image::ImageError) -> Self {
        DetectorError::Inference(err.to_string())
    }
}

/// Convenience Result type for detector operations
pub type Result<T> = std::result::Result<T, DetectorError>;
