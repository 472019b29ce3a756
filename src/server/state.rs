//! Application state shared by every request

use std::sync::Arc;

use crate::backend::ComputeDevice;
use crate::inference::Predictor;

/// Shared application state
///
/// Built once at startup and read-only afterwards.
pub struct AppState {
    /// Loaded model behind the prediction pipeline
    pub predictor: Predictor,
    /// Device the model runs on, reported by `/health`
    pub device: ComputeDevice,
}

impl AppState {
    pub fn new(predictor: Predictor, device: ComputeDevice) -> Self {
        Self { predictor, device }
    }
}

pub type SharedState = Arc<AppState>;
