//! Inference Predictor Module
//!
//! Runs the classifier on one image and turns its raw logits into a
//! `real` / `fake` label with the confidence of that label.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::DynamicImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::preprocess::{decode_rgb, preprocess_image};
use super::request::PredictionRequest;
use crate::model::DeepfakeClassifier;
use crate::utils::error::{DetectorError, Result};
use crate::utils::round_to;
use crate::INPUT_SIZE;

/// Decimal places kept in reported scores
pub const SCORE_DECIMALS: i32 = 4;

/// Probability at which the positive class of each head wins
const DECISION_THRESHOLD: f64 = 0.5;

/// Index of the "fake" class in multi-logit heads
const FAKE_CLASS_INDEX: usize = 1;

/// Predicted label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Real,
    Fake,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Real => "real",
            Label::Fake => "fake",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label plus the confidence of that label (always >= 0.5)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: Label,
    pub score: f64,
}

impl Prediction {
    /// The same prediction with the score rounded for reporting
    pub fn rounded(self) -> Self {
        Self {
            score: round_to(self.score, SCORE_DECIMALS),
            ..self
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    let exps: Vec<f64> = logits.iter().map(|&l| (l as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Map the logits of one example to a label and score
///
/// A single logit is the probability of "real" after a sigmoid, and "real"
/// wins at exactly 0.5. Two or more logits go through a softmax where index 1
/// is "fake", and "fake" wins at exactly 0.5.
pub fn interpret_logits(logits: &[f32]) -> Result<Prediction> {
    let prediction = match logits {
        [] => {
            return Err(DetectorError::Inference(
                "model produced no output".to_string(),
            ))
        }
        [logit] => {
            let prob_real = sigmoid(*logit as f64);
            if prob_real >= DECISION_THRESHOLD {
                Prediction { label: Label::Real, score: prob_real }
            } else {
                Prediction { label: Label::Fake, score: 1.0 - prob_real }
            }
        }
        _ => {
            let probs = softmax(logits);
            let score_fake = probs
                .get(FAKE_CLASS_INDEX)
                .copied()
                .unwrap_or_else(|| probs.iter().copied().fold(0.0, f64::max));
            if score_fake >= DECISION_THRESHOLD {
                Prediction { label: Label::Fake, score: score_fake }
            } else {
                Prediction { label: Label::Real, score: 1.0 - score_fake }
            }
        }
    };

    if !prediction.score.is_finite() {
        return Err(DetectorError::Inference(format!(
            "model produced non-finite logits {:?}",
            logits
        )));
    }

    Ok(prediction)
}

/// Anything that maps a normalized CHW image to raw logits
///
/// The server only sees this trait, so tests can swap the network for a stub.
pub trait LogitModel: Send + Sync {
    /// Logits for a single `[3, image_size, image_size]` image
    fn logits(&self, pixels: Vec<f32>, image_size: usize) -> Result<Vec<f32>>;

    /// Number of logits per example
    fn num_classes(&self) -> usize;
}

/// [`LogitModel`] backed by the Burn classifier
pub struct BurnClassifier<B: Backend> {
    model: Mutex<DeepfakeClassifier<B>>,
    device: B::Device,
    num_classes: usize,
}

impl<B: Backend> BurnClassifier<B> {
    pub fn new(model: DeepfakeClassifier<B>, device: B::Device) -> Self {
        let num_classes = model.num_classes();
        Self {
            model: Mutex::new(model),
            device,
            num_classes,
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "forward pass panicked".to_string()
    }
}

impl<B: Backend> LogitModel for BurnClassifier<B> {
    fn logits(&self, pixels: Vec<f32>, image_size: usize) -> Result<Vec<f32>> {
        let expected = 3 * image_size * image_size;
        if pixels.len() != expected {
            return Err(DetectorError::Inference(format!(
                "expected {} input values, got {}",
                expected,
                pixels.len()
            )));
        }

        // Parameters are shared between clones, so this only copies handles
        let model = self.model.lock().clone();

        let output = panic::catch_unwind(AssertUnwindSafe(|| {
            let data = TensorData::new(pixels, [1, 3, image_size, image_size]);
            let input = Tensor::<B, 4>::from_data(data, &self.device);
            model.forward(input).into_data()
        }))
        .map_err(|payload| DetectorError::Inference(panic_message(payload)))?;

        output
            .to_vec::<f32>()
            .map_err(|e| DetectorError::Inference(format!("unreadable model output: {:?}", e)))
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Predictor for running inference on single images
#[derive(Clone)]
pub struct Predictor {
    model: Arc<dyn LogitModel>,
}

impl Predictor {
    /// Create a predictor for `INPUT_SIZE` x `INPUT_SIZE` inputs
    pub fn new(model: Arc<dyn LogitModel>) -> Self {
        Self { model }
    }

    pub fn num_classes(&self) -> usize {
        self.model.num_classes()
    }

    /// Preprocess a decoded image and classify it
    pub fn predict_image(&self, image: &DynamicImage) -> Result<Prediction> {
        let start = Instant::now();

        let pixels = preprocess_image(image, INPUT_SIZE as u32)?;
        let logits = self.model.logits(pixels, INPUT_SIZE)?;
        let prediction = interpret_logits(&logits)?;

        debug!(
            "Logits {:?} -> {} in {:.1} ms",
            logits,
            prediction.label,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(prediction)
    }

    /// Decode raw image bytes and classify them
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction> {
        let image = DynamicImage::ImageRgb8(decode_rgb(bytes)?);
        self.predict_image(&image)
    }

    /// Validate an upload, then classify it
    ///
    /// Failures after validation are logged here with full detail.
    pub fn predict_request(&self, request: &PredictionRequest) -> Result<Prediction> {
        request.validate()?;

        self.predict_bytes(&request.bytes).inspect_err(|e| {
            error!(
                "Inference failed for {}: {:?}",
                request.file_name.as_deref().unwrap_or_default(),
                e
            );
        })
    }

    /// Classify an image file on disk
    pub fn predict_file(&self, path: &Path) -> Result<Prediction> {
        self.predict_request(&PredictionRequest::from_path(path)?)
    }
}
