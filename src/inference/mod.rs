//! Inference module for single-image prediction
//!
//! This module provides:
//! - Upload validation (filename present, `image/*` content type)
//! - Fixed preprocessing: RGB, 224x224 bilinear resize, ImageNet normalization
//! - Interpretation of single-logit and multi-logit heads as `real` / `fake`
//!
//! ## Concurrency
//!
//! The model is read-only after startup. Each request runs its forward pass on
//! its own handle to the shared parameters, with no queueing or batching.

pub mod predictor;
pub mod preprocess;
pub mod request;

// Re-export main types for convenience
pub use predictor::{interpret_logits, BurnClassifier, Label, LogitModel, Prediction, Predictor};
pub use preprocess::{preprocess_image, IMAGENET_MEAN, IMAGENET_STD};
pub use request::PredictionRequest;
