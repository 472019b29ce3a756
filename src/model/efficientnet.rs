//! EfficientNet-B0 backbone built with Burn
//!
//! Layer geometry mirrors torchvision's `efficientnet_b0` so weights exported
//! from PyTorch map one-to-one onto this module tree (see
//! [`crate::checkpoint::layout`] for the name mapping).

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{
        activation::{sigmoid, silu},
        backend::Backend,
        Tensor,
    },
};

/// Channels produced by the stem convolution
pub const STEM_CHANNELS: usize = 32;

/// Channels produced by the final 1x1 convolution (classifier input width)
pub const FEATURE_CHANNELS: usize = 1280;

/// Geometry of one MBConv stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    pub expand_ratio: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub num_layers: usize,
}

impl StageSpec {
    const fn new(
        expand_ratio: usize,
        kernel_size: usize,
        stride: usize,
        in_channels: usize,
        out_channels: usize,
        num_layers: usize,
    ) -> Self {
        Self {
            expand_ratio,
            kernel_size,
            stride,
            in_channels,
            out_channels,
            num_layers,
        }
    }

    /// Input channels, stride for layer `index` within the stage
    pub fn layer_geometry(&self, index: usize) -> (usize, usize) {
        if index == 0 {
            (self.in_channels, self.stride)
        } else {
            (self.out_channels, 1)
        }
    }

    /// Width of the expanded representation for a layer with `in_channels` inputs
    pub fn expanded_channels(&self, in_channels: usize) -> usize {
        make_divisible(in_channels * self.expand_ratio, 8)
    }

    /// Channels of the squeeze-excitation bottleneck
    pub fn squeeze_channels(in_channels: usize) -> usize {
        (in_channels / 4).max(1)
    }
}

/// The seven MBConv stages of EfficientNet-B0 (width and depth multipliers of 1.0)
pub const B0_STAGES: [StageSpec; 7] = [
    StageSpec::new(1, 3, 1, 32, 16, 1),
    StageSpec::new(6, 3, 2, 16, 24, 2),
    StageSpec::new(6, 5, 2, 24, 40, 2),
    StageSpec::new(6, 3, 2, 40, 80, 3),
    StageSpec::new(6, 5, 1, 80, 112, 3),
    StageSpec::new(6, 5, 2, 112, 192, 4),
    StageSpec::new(6, 3, 1, 192, 320, 1),
];

/// Round `value` to the nearest multiple of `divisor`, never dropping more than 10%
pub fn make_divisible(value: usize, divisor: usize) -> usize {
    let rounded = ((value + divisor / 2) / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * value as f64 {
        rounded + divisor
    } else {
        rounded
    }
}

/// Bias-free convolution followed by batch normalization
///
/// Activation is applied by the owner, since the projection conv has none.
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBn<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        let padding = (kernel_size - 1) / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);

        let bn = BatchNormConfig::new(out_channels).init(device);

        Self { conv, bn }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Channel attention: global pool -> reduce -> SiLU -> expand -> sigmoid gate
#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    pub pool: AdaptiveAvgPool2d,
    pub fc1: Conv2d<B>,
    pub fc2: Conv2d<B>,
}

impl<B: Backend> SqueezeExcitation<B> {
    pub fn new(channels: usize, squeeze_channels: usize, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: Conv2dConfig::new([channels, squeeze_channels], [1, 1]).init(device),
            fc2: Conv2dConfig::new([squeeze_channels, channels], [1, 1]).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.pool.forward(x.clone());
        let scale = silu(self.fc1.forward(scale));
        let scale = sigmoid(self.fc2.forward(scale));
        x * scale
    }
}

/// Inverted residual block with squeeze-excitation
#[derive(Module, Debug)]
pub struct MbConv<B: Backend> {
    /// 1x1 expansion, absent when the expand ratio is 1
    pub expand: Option<ConvBn<B>>,
    pub depthwise: ConvBn<B>,
    pub se: SqueezeExcitation<B>,
    pub project: ConvBn<B>,
}

impl<B: Backend> MbConv<B> {
    pub fn new(spec: &StageSpec, index: usize, device: &B::Device) -> Self {
        let (in_channels, stride) = spec.layer_geometry(index);
        let expanded = spec.expanded_channels(in_channels);

        let expand = (expanded != in_channels)
            .then(|| ConvBn::new(in_channels, expanded, 1, 1, 1, device));

        Self {
            expand,
            depthwise: ConvBn::new(expanded, expanded, spec.kernel_size, stride, expanded, device),
            se: SqueezeExcitation::new(expanded, StageSpec::squeeze_channels(in_channels), device),
            project: ConvBn::new(expanded, spec.out_channels, 1, 1, 1, device),
        }
    }

    /// Build every layer of a stage
    pub fn stage(spec: &StageSpec, device: &B::Device) -> Vec<Self> {
        (0..spec.num_layers)
            .map(|index| Self::new(spec, index, device))
            .collect()
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input.clone();
        if let Some(expand) = &self.expand {
            x = silu(expand.forward(x));
        }
        let x = silu(self.depthwise.forward(x));
        let x = self.se.forward(x);
        let x = self.project.forward(x);

        // Residual only when stride is 1 and channels are unchanged, i.e. same shape.
        // Stochastic depth is a training-time regularizer and is the identity here.
        if x.dims() == input.dims() {
            x + input
        } else {
            x
        }
    }
}

/// EfficientNet-B0 feature extractor producing `[batch, 1280]` embeddings
#[derive(Module, Debug)]
pub struct EfficientNetB0<B: Backend> {
    pub stem: ConvBn<B>,
    pub stage1: Vec<MbConv<B>>,
    pub stage2: Vec<MbConv<B>>,
    pub stage3: Vec<MbConv<B>>,
    pub stage4: Vec<MbConv<B>>,
    pub stage5: Vec<MbConv<B>>,
    pub stage6: Vec<MbConv<B>>,
    pub stage7: Vec<MbConv<B>>,
    pub head: ConvBn<B>,
    pub pool: AdaptiveAvgPool2d,
}

impl<B: Backend> EfficientNetB0<B> {
    pub fn new(device: &B::Device) -> Self {
        let [stage1, stage2, stage3, stage4, stage5, stage6, stage7] =
            B0_STAGES.map(|spec| MbConv::stage(&spec, device));

        let last = B0_STAGES[B0_STAGES.len() - 1].out_channels;

        Self {
            stem: ConvBn::new(3, STEM_CHANNELS, 3, 2, 1, device),
            stage1,
            stage2,
            stage3,
            stage4,
            stage5,
            stage6,
            stage7,
            head: ConvBn::new(last, FEATURE_CHANNELS, 1, 1, 1, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    pub(crate) fn stages(&self) -> [&[MbConv<B>]; 7] {
        [
            self.stage1.as_slice(),
            self.stage2.as_slice(),
            self.stage3.as_slice(),
            self.stage4.as_slice(),
            self.stage5.as_slice(),
            self.stage6.as_slice(),
            self.stage7.as_slice(),
        ]
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Pooled features of shape [batch_size, 1280]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = silu(self.stem.forward(x));

        for stage in self.stages() {
            for block in stage {
                x = block.forward(x);
            }
        }

        let x = silu(self.head.forward(x));
        let x = self.pool.forward(x);

        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }
}
