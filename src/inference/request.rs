//! An uploaded image waiting to be classified

use std::fs;
use std::path::Path;

use image::ImageFormat;

use crate::utils::error::{DetectorError, Result};

/// Media type prefix every accepted upload must carry
pub const IMAGE_MEDIA_PREFIX: &str = "image/";

/// Raw upload: the filename and content type as declared by the client, plus the bytes
#[derive(Debug, Clone, Default)]
pub struct PredictionRequest {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl PredictionRequest {
    pub fn new(file_name: Option<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name,
            content_type,
            bytes,
        }
    }

    /// Build a request from a file on disk, guessing the content type from its extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let content_type = ImageFormat::from_path(path)
            .ok()
            .map(|format| format.to_mime_type().to_string());
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());

        Ok(Self::new(file_name, content_type, bytes))
    }

    /// Reject uploads without a filename, then uploads that are not images
    pub fn validate(&self) -> Result<()> {
        if self.file_name.as_deref().map_or(true, str::is_empty) {
            return Err(DetectorError::MissingFile);
        }

        match self.content_type.as_deref() {
            Some(content_type) if content_type.starts_with(IMAGE_MEDIA_PREFIX) => Ok(()),
            _ => Err(DetectorError::UnsupportedMediaType),
        }
    }
}
