//! Real/fake classifier: EfficientNet-B0 features followed by a linear head
//!
//! The head width is not fixed by the architecture: checkpoints trained with a
//! single sigmoid logit and with a two-way softmax are both in circulation, so
//! the class count always comes from the loaded weights.

use burn::{
    config::Config,
    module::Module,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig, LinearRecord},
    tensor::{backend::Backend, Tensor},
};

use super::efficientnet::{EfficientNetB0, EfficientNetB0Record, FEATURE_CHANNELS};

/// Configuration for the DeepfakeClassifier model
#[derive(Config, Debug)]
pub struct DeepfakeClassifierConfig {
    /// Number of output logits (1 for sigmoid heads, 2 for softmax heads)
    #[config(default = "2")]
    pub num_classes: usize,

    /// Dropout rate before the classifier (inert outside training)
    #[config(default = "0.2")]
    pub dropout_rate: f64,
}

/// EfficientNet-B0 with a replaceable classification head
#[derive(Module, Debug)]
pub struct DeepfakeClassifier<B: Backend> {
    pub features: EfficientNetB0<B>,
    pub dropout: Dropout,
    pub classifier: Linear<B>,
}

impl<B: Backend> DeepfakeClassifier<B> {
    /// Create a freshly initialized classifier from configuration
    pub fn new(config: &DeepfakeClassifierConfig, device: &B::Device) -> Self {
        Self {
            features: EfficientNetB0::new(device),
            dropout: DropoutConfig::new(config.dropout_rate).init(),
            classifier: LinearConfig::new(FEATURE_CHANNELS, config.num_classes).init(device),
        }
    }

    /// Rebuild a classifier from a complete record, sizing the head from its weights
    pub fn from_record(record: DeepfakeClassifierRecord<B>, device: &B::Device) -> Self {
        let num_classes = record.classifier.weight.dims()[1];
        let config = DeepfakeClassifierConfig::new().with_num_classes(num_classes);
        Self::new(&config, device).load_record(record)
    }

    /// Replace the backbone weights
    pub fn with_features_record(mut self, record: EfficientNetB0Record<B>) -> Self {
        self.features = self.features.load_record(record);
        self
    }

    /// Replace the classification head weights
    pub fn with_head_record(mut self, record: LinearRecord<B>) -> Self {
        self.classifier = self.classifier.load_record(record);
        self
    }

    /// Forward pass through the network
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features.forward(x);
        let x = self.dropout.forward(x);
        self.classifier.forward(x)
    }

    /// Number of output logits per example
    pub fn num_classes(&self) -> usize {
        // Burn stores linear weights as [d_input, d_output]
        self.classifier.weight.dims()[1]
    }
}
