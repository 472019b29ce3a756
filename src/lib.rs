//! # Deepfake Detect
//!
//! A Rust inference service that classifies uploaded images as `real` or `fake`
//! using an EfficientNet-B0 built with the Burn framework.
//!
//! ## Features
//!
//! - **Checkpoint-tolerant loading** of Burn records and PyTorch `torch.save` archives
//! - **Fixed ImageNet preprocessing** (224x224, per-channel normalization)
//! - **Single-logit and multi-logit heads** normalized into one label/score contract
//! - **HTTP API** built on axum with `/health` and `/predict`
//!
//! ## Modules
//!
//! - `backend`: Backend aliases and compute device selection
//! - `model`: EfficientNet-B0 classifier built with Burn
//! - `checkpoint`: Checkpoint format detection and loading
//! - `inference`: Preprocessing, prediction and output interpretation
//! - `server`: HTTP routes and shared state
//! - `config`: Runtime configuration
//! - `utils`: Logging and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deepfake_detect::backend::{default_device, CpuBackend};
//! use deepfake_detect::checkpoint::load_classifier;
//!
//! let device = default_device::<CpuBackend>();
//! let model = load_classifier::<CpuBackend>("efficientnet_b0_deepfake.pth".as_ref(), &device)?;
//! ```

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod inference;
pub mod model;
pub mod server;
pub mod utils;

// Re-export commonly used items for convenience
pub use backend::ComputeDevice;
pub use checkpoint::{load_classifier, Checkpoint};
pub use config::ServerConfig;
pub use inference::{BurnClassifier, Label, LogitModel, Prediction, PredictionRequest, Predictor};
pub use model::{DeepfakeClassifier, DeepfakeClassifierConfig};
pub use utils::error::{DetectorError, Result};

/// Side length of the square network input
pub const INPUT_SIZE: usize = 224;

/// Number of output classes assumed when a checkpoint does not say otherwise
pub const DEFAULT_NUM_CLASSES: usize = 2;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
