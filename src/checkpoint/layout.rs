//! torchvision parameter layout for EfficientNet-B0 state dicts
//!
//! PyTorch names parameters by position (`features.2.0.block.1.0.weight`),
//! the Burn module tree names them by role (`stage2.0.depthwise.conv.weight`).
//! This module knows both sides: which tensors a weights-only checkpoint must
//! carry, and the regex remaps burn-import applies while reading it.

use std::collections::BTreeMap;

use crate::model::efficientnet::{StageSpec, B0_STAGES, FEATURE_CHANNELS, STEM_CHANNELS};
use crate::DEFAULT_NUM_CLASSES;

/// Prefix added by `torch.nn.DataParallel` / DDP wrappers
pub const DATA_PARALLEL_PREFIX: &str = "module.";

/// Weight of the final linear layer, shaped `[num_classes, 1280]`
pub const HEAD_WEIGHT_KEY: &str = "classifier.1.weight";

/// Bias of the final linear layer, shaped `[num_classes]`
pub const HEAD_BIAS_KEY: &str = "classifier.1.bias";

/// Batch norm tensors that must be present (num_batches_tracked is optional)
const BATCH_NORM_SUFFIXES: [&str; 4] = ["weight", "bias", "running_mean", "running_var"];

/// Remaps from torchvision names onto [`EfficientNetB0`](crate::model::EfficientNetB0) fields.
///
/// Applied in order; each rule sees the output of the previous one.
pub const BACKBONE_KEY_REMAP: [(&str, &str); 12] = [
    (r"^module\.", ""),
    (r"^features\.0\.", "stem."),
    (r"^features\.8\.", "head."),
    // Stage 1 has no expansion conv, so its block indices are shifted by one
    (r"^features\.1\.(\d+)\.block\.0\.", "stage1.${1}.depthwise."),
    (r"^features\.1\.(\d+)\.block\.1\.", "stage1.${1}.se."),
    (r"^features\.1\.(\d+)\.block\.2\.", "stage1.${1}.project."),
    (r"^features\.([2-7])\.(\d+)\.block\.0\.", "stage${1}.${2}.expand."),
    (r"^features\.([2-7])\.(\d+)\.block\.1\.", "stage${1}.${2}.depthwise."),
    (r"^features\.([2-7])\.(\d+)\.block\.2\.", "stage${1}.${2}.se."),
    (r"^features\.([2-7])\.(\d+)\.block\.3\.", "stage${1}.${2}.project."),
    (r"(^|\.)(stem|head|expand|depthwise|project)\.0\.", "${1}${2}.conv."),
    (r"(^|\.)(stem|head|expand|depthwise|project)\.1\.", "${1}${2}.bn."),
];

/// Remaps the classifier head onto a bare [`Linear`](burn::nn::Linear) record
pub const HEAD_KEY_REMAP: [(&str, &str); 2] = [(r"^module\.", ""), (r"^classifier\.1\.", "")];

/// Strip the data-parallel prefix from a parameter name
pub fn strip_data_parallel(name: &str) -> &str {
    name.strip_prefix(DATA_PARALLEL_PREFIX).unwrap_or(name)
}

/// Every backbone tensor torchvision's `efficientnet_b0` puts in its state dict, with its shape
pub fn backbone_tensors() -> Vec<(String, Vec<usize>)> {
    let mut tensors = Vec::new();

    push_conv_bn(&mut tensors, "features.0", [STEM_CHANNELS, 3, 3, 3]);

    for (stage_index, spec) in B0_STAGES.iter().enumerate() {
        for layer in 0..spec.num_layers {
            let block = format!("features.{}.{}.block", stage_index + 1, layer);
            let (in_channels, _) = spec.layer_geometry(layer);
            let expanded = spec.expanded_channels(in_channels);
            let squeeze = StageSpec::squeeze_channels(in_channels);
            let kernel = spec.kernel_size;
            let mut position = 0;

            if expanded != in_channels {
                push_conv_bn(&mut tensors, &format!("{block}.{position}"), [expanded, in_channels, 1, 1]);
                position += 1;
            }

            // Depthwise: one input channel per group
            push_conv_bn(&mut tensors, &format!("{block}.{position}"), [expanded, 1, kernel, kernel]);
            position += 1;

            let se = format!("{block}.{position}");
            tensors.push((format!("{se}.fc1.weight"), vec![squeeze, expanded, 1, 1]));
            tensors.push((format!("{se}.fc1.bias"), vec![squeeze]));
            tensors.push((format!("{se}.fc2.weight"), vec![expanded, squeeze, 1, 1]));
            tensors.push((format!("{se}.fc2.bias"), vec![expanded]));
            position += 1;

            push_conv_bn(&mut tensors, &format!("{block}.{position}"), [spec.out_channels, expanded, 1, 1]);
        }
    }

    let last = B0_STAGES[B0_STAGES.len() - 1].out_channels;
    push_conv_bn(
        &mut tensors,
        &format!("features.{}", B0_STAGES.len() + 1),
        [FEATURE_CHANNELS, last, 1, 1],
    );
    tensors
}

/// Names of [`backbone_tensors`]
pub fn backbone_tensor_names() -> Vec<String> {
    backbone_tensors().into_iter().map(|(name, _)| name).collect()
}

fn push_conv_bn(tensors: &mut Vec<(String, Vec<usize>)>, prefix: &str, conv_shape: [usize; 4]) {
    tensors.push((format!("{prefix}.0.weight"), conv_shape.to_vec()));
    for suffix in BATCH_NORM_SUFFIXES {
        tensors.push((format!("{prefix}.1.{suffix}"), vec![conv_shape[0]]));
    }
}

/// Names and shapes of the tensors in a weights-only checkpoint
#[derive(Debug, Clone, Default)]
pub struct StateDictLayout {
    /// Parameter name (data-parallel prefix removed) -> shape
    tensors: BTreeMap<String, Vec<usize>>,
}

impl StateDictLayout {
    /// Build a layout from raw `(name, shape)` pairs
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<usize>)>,
        S: AsRef<str>,
    {
        let tensors = entries
            .into_iter()
            .map(|(name, shape)| (strip_data_parallel(name.as_ref()).to_string(), shape))
            .collect();
        Self { tensors }
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn shape(&self, name: &str) -> Option<&[usize]> {
        self.tensors.get(name).map(Vec::as_slice)
    }

    /// Output classes declared by the head weight, or the default when absent
    pub fn num_classes(&self) -> usize {
        match self.shape(HEAD_WEIGHT_KEY) {
            Some([num_classes, ..]) if *num_classes > 0 => *num_classes,
            _ => DEFAULT_NUM_CLASSES,
        }
    }

    /// Backbone tensors the checkpoint does not provide
    pub fn missing_backbone_tensors(&self) -> Vec<String> {
        backbone_tensor_names()
            .into_iter()
            .filter(|name| !self.tensors.contains_key(name))
            .collect()
    }

    /// Backbone tensors present with a shape the architecture does not accept
    pub fn mismatched_backbone_tensors(&self) -> Vec<String> {
        backbone_tensors()
            .into_iter()
            .filter_map(|(name, expected)| match self.shape(&name) {
                Some(found) if found != expected.as_slice() => {
                    Some(format!("{name} {found:?} (expected {expected:?})"))
                }
                _ => None,
            })
            .collect()
    }

    /// Whether the head tensors exist and fit a `[1280 -> num_classes]` linear layer
    pub fn head_is_loadable(&self) -> bool {
        let num_classes = self.num_classes();
        matches!(
            (self.shape(HEAD_WEIGHT_KEY), self.shape(HEAD_BIAS_KEY)),
            (Some([rows, cols]), Some([bias]))
                if *rows == num_classes && *cols == FEATURE_CHANNELS && *bias == num_classes
        )
    }
}
