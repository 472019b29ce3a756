//! Model module for the real/fake classifier using the Burn framework
//!
//! This module provides:
//! - The EfficientNet-B0 backbone, laid out like torchvision's
//! - The classification head on top of it
//!
//! ## Architecture
//!
//! The model is built once at startup and only ever used for inference:
//! it lives on a non-autodiff backend, so dropout is inert and batch norm
//! uses its running statistics.

pub mod classifier;
pub mod efficientnet;

// Re-export main types for convenience
pub use classifier::{DeepfakeClassifier, DeepfakeClassifierConfig, DeepfakeClassifierRecord};
pub use efficientnet::{EfficientNetB0, EfficientNetB0Record, B0_STAGES, FEATURE_CHANNELS};
