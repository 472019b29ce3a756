//! Checkpoint loading
//!
//! A checkpoint on disk can come in several shapes. Each one is recognised by
//! [`Checkpoint::read`], in a fixed order, and every shape ends up as the same
//! [`DeepfakeClassifier`]:
//!
//! 1. `FullModel`: a Burn record of the complete classifier (`.mpk`)
//! 2. `ModelWrapper`: a Burn record holding the classifier under `model`
//! 3. `NestedStateDict`: a PyTorch archive with the weights under
//!    `state_dict` or `model_state_dict`
//! 4. `StateDict`: a PyTorch archive that is the weights mapping itself
//!
//! Anything else is rejected as an unsupported checkpoint.

pub mod layout;
#[cfg(test)]
mod torch_archive;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    nn::LinearRecord,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder},
    tensor::backend::Backend,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use tracing::{debug, info, warn};

use crate::model::{
    DeepfakeClassifier, DeepfakeClassifierConfig, DeepfakeClassifierRecord, EfficientNetB0Record,
};
use crate::utils::error::{DetectorError, Result};

use layout::{StateDictLayout, BACKBONE_KEY_REMAP, HEAD_KEY_REMAP};

type PyTorchRecorder = PyTorchFileRecorder<FullPrecisionSettings>;

/// Burn-native records keep full precision so a converted model gives the same logits
pub type BurnRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Extension of Burn-native checkpoints
pub const BURN_RECORD_EXTENSION: &str = "mpk";

/// Keys under which training scripts nest the weights mapping, in lookup order
pub const NESTED_STATE_DICT_KEYS: [&str; 2] = ["state_dict", "model_state_dict"];

/// Local file header signature; `torch.save` writes zip archives
const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

/// Training checkpoint that stores the classifier next to bookkeeping fields
#[derive(Record)]
pub struct TrainingCheckpointRecord<B: Backend> {
    pub model: DeepfakeClassifierRecord<B>,
    pub epoch: Option<usize>,
}

/// A weights-only mapping inside a PyTorch archive
#[derive(Debug, Clone)]
pub struct StateDictSource {
    pub path: PathBuf,
    /// Key the mapping is nested under, `None` when it is the top-level object
    pub top_level_key: Option<String>,
    pub layout: StateDictLayout,
}

impl StateDictSource {
    /// Probe the tensor names and shapes stored under `key` without reading tensor data
    pub fn probe(path: &Path, key: Option<&str>) -> Option<Self> {
        let infos = match candle_core::pickle::read_pth_tensor_info(path, false, key) {
            Ok(infos) => infos,
            Err(e) => {
                debug!("No weights mapping under {:?} in {:?}: {}", key, path, e);
                return None;
            }
        };

        let layout = StateDictLayout::new(
            infos
                .into_iter()
                .map(|info| (info.name, info.layout.shape().dims().to_vec())),
        );

        if layout.is_empty() {
            return None;
        }

        Some(Self {
            path: path.to_path_buf(),
            top_level_key: key.map(str::to_string),
            layout,
        })
    }

    fn load_args(&self, remap: &[(&str, &str)]) -> LoadArgs {
        let args = remap
            .iter()
            .fold(LoadArgs::new(self.path.clone()), |args, (pattern, replacement)| {
                args.with_key_remap(pattern, replacement)
            });

        match &self.top_level_key {
            Some(key) => args.with_top_level_key(key),
            None => args,
        }
    }

    /// Build a fresh classifier sized from the head and load the weights into it
    ///
    /// Every backbone tensor must be present. The head is only loaded when its
    /// shape fits, otherwise the freshly initialized head is kept.
    pub fn load<B: Backend>(&self, device: &B::Device) -> Result<DeepfakeClassifier<B>> {
        let missing = self.layout.missing_backbone_tensors();
        if !missing.is_empty() {
            return Err(self.backbone_error("missing from", &missing));
        }

        let mismatched = self.layout.mismatched_backbone_tensors();
        if !mismatched.is_empty() {
            return Err(self.backbone_error("with the wrong shape in", &mismatched));
        }

        let num_classes = self.layout.num_classes();
        let config = DeepfakeClassifierConfig::new().with_num_classes(num_classes);
        let recorder = PyTorchRecorder::default();

        let features = <PyTorchRecorder as Recorder<B>>::load::<EfficientNetB0Record<B>>(
            &recorder,
            self.load_args(&BACKBONE_KEY_REMAP),
            device,
        )
        .map_err(|e| DetectorError::Checkpoint(format!("Failed to load backbone weights: {}", e)))?;

        let mut model = DeepfakeClassifier::new(&config, device).with_features_record(features);

        if self.layout.head_is_loadable() {
            let head = <PyTorchRecorder as Recorder<B>>::load::<LinearRecord<B>>(
                &recorder,
                self.load_args(&HEAD_KEY_REMAP),
                device,
            )
            .map_err(|e| DetectorError::Checkpoint(format!("Failed to load classifier head: {}", e)))?;
            model = model.with_head_record(head);
        } else {
            warn!(
                "Classifier head missing or mis-shaped in {}; keeping a freshly initialized {}-class head",
                self.path.display(),
                num_classes
            );
        }

        Ok(model)
    }

    fn backbone_error(&self, problem: &str, tensors: &[String]) -> DetectorError {
        let preview: Vec<&str> = tensors.iter().take(5).map(String::as_str).collect();
        DetectorError::Checkpoint(format!(
            "{} backbone tensors {} {}: {}{}",
            tensors.len(),
            problem,
            self.path.display(),
            preview.join(", "),
            if tensors.len() > preview.len() { ", ..." } else { "" }
        ))
    }
}

/// A checkpoint resolved to one of the supported on-disk shapes
pub enum Checkpoint<B: Backend> {
    FullModel(DeepfakeClassifierRecord<B>),
    ModelWrapper(TrainingCheckpointRecord<B>),
    StateDict(StateDictSource),
    NestedStateDict(StateDictSource),
}

impl<B: Backend> Checkpoint<B> {
    /// Detect the checkpoint shape stored at `path`
    pub fn read(path: &Path, device: &B::Device) -> Result<Self> {
        if !path.is_file() {
            return Err(DetectorError::CheckpointNotFound(path.to_path_buf()));
        }

        let is_burn_record = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(BURN_RECORD_EXTENSION));

        if is_burn_record {
            return Self::read_burn_record(path, device);
        }

        if is_zip_archive(path)? {
            return Self::read_pytorch_archive(path);
        }

        Err(DetectorError::UnsupportedCheckpoint(format!(
            "{} is neither a Burn record nor a PyTorch archive",
            path.display()
        )))
    }

    fn read_burn_record(path: &Path, device: &B::Device) -> Result<Self> {
        let recorder = BurnRecorder::new();

        let full_model = <BurnRecorder as Recorder<B>>::load::<DeepfakeClassifierRecord<B>>(
            &recorder,
            path.to_path_buf(),
            device,
        );
        let full_model_err = match full_model {
            Ok(record) => return Ok(Self::FullModel(record)),
            Err(e) => e,
        };

        let wrapper = <BurnRecorder as Recorder<B>>::load::<TrainingCheckpointRecord<B>>(
            &recorder,
            path.to_path_buf(),
            device,
        );
        match wrapper {
            Ok(record) => Ok(Self::ModelWrapper(record)),
            Err(wrapper_err) => Err(DetectorError::UnsupportedCheckpoint(format!(
                "{} is not a classifier record ({}) nor a training checkpoint ({})",
                path.display(),
                full_model_err,
                wrapper_err
            ))),
        }
    }

    fn read_pytorch_archive(path: &Path) -> Result<Self> {
        for key in NESTED_STATE_DICT_KEYS {
            if let Some(source) = StateDictSource::probe(path, Some(key)) {
                return Ok(Self::NestedStateDict(source));
            }
        }

        if let Some(source) = StateDictSource::probe(path, None) {
            return Ok(Self::StateDict(source));
        }

        Err(DetectorError::UnsupportedCheckpoint(format!(
            "{} holds no weights mapping (pickled modules cannot be loaded, save a state_dict instead)",
            path.display()
        )))
    }

    /// Short name of the detected shape, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FullModel(_) => "full model",
            Self::ModelWrapper(_) => "model wrapper",
            Self::StateDict(_) => "state dict",
            Self::NestedStateDict(_) => "nested state dict",
        }
    }

    /// Turn the checkpoint into a ready-to-run classifier on `device`
    pub fn into_classifier(self, device: &B::Device) -> Result<DeepfakeClassifier<B>> {
        match self {
            Self::FullModel(record) => Ok(DeepfakeClassifier::from_record(record, device)),
            Self::ModelWrapper(wrapper) => {
                if let Some(epoch) = wrapper.epoch {
                    debug!("Training checkpoint saved at epoch {}", epoch);
                }
                Ok(DeepfakeClassifier::from_record(wrapper.model, device))
            }
            Self::StateDict(source) | Self::NestedStateDict(source) => source.load(device),
        }
    }
}

/// Load a classifier from any supported checkpoint at `path`
pub fn load_classifier<B: Backend>(path: &Path, device: &B::Device) -> Result<DeepfakeClassifier<B>> {
    info!("Loading model from {}", path.display());

    let checkpoint = Checkpoint::<B>::read(path, device)?;
    info!("Detected {} checkpoint", checkpoint.kind());

    let model = checkpoint.into_classifier(device)?;
    info!("Model ready with {} output logit(s)", model.num_classes());

    Ok(model)
}

/// Write a classifier as a full-precision Burn `FullModel` record
///
/// Returns the path actually written, since the recorder enforces the `.mpk` extension.
pub fn save_classifier<B: Backend>(model: DeepfakeClassifier<B>, path: &Path) -> Result<PathBuf> {
    let path = path.with_extension(BURN_RECORD_EXTENSION);

    model
        .save_file(path.clone(), &BurnRecorder::new())
        .map_err(|e| DetectorError::Checkpoint(format!("Failed to save model: {}", e)))?;

    Ok(path)
}

/// Whether the file starts with a zip local file header
pub fn is_zip_archive(path: &Path) -> Result<bool> {
    let mut magic = [0u8; 4];
    let mut file = File::open(path)?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == ZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use std::io::Write;
    use tempfile::TempDir;

    use super::torch_archive::{self, NamedTensor};

    type TestBackend = NdArray<f32>;

    /// torchvision-named backbone with recognisable constants, plus an optional head
    /// whose row `r` (one per class) is filled with `10 * r`
    fn torchvision_tensors(prefix: &str, head_shape: Option<[usize; 2]>) -> Vec<NamedTensor> {
        let mut tensors: Vec<NamedTensor> = layout::backbone_tensors()
            .into_iter()
            .map(|(name, shape)| {
                let value = match name.as_str() {
                    "features.0.0.weight" => 0.001,
                    "features.2.0.block.0.1.weight" => 0.024,
                    "features.8.1.running_var" => 1.5,
                    _ if name.ends_with("running_var") => 1.0,
                    _ => 0.01,
                };
                let numel = shape.iter().product();
                (format!("{prefix}{name}"), shape, vec![value; numel])
            })
            .collect();

        if let Some([rows, cols]) = head_shape {
            let weight = (0..rows * cols).map(|i| (i / cols) as f32 * 10.0).collect();
            tensors.push((format!("{prefix}classifier.1.weight"), vec![rows, cols], weight));
            tensors.push((format!("{prefix}classifier.1.bias"), vec![rows], vec![0.5; rows]));
        }
        tensors
    }

    fn values<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    /// Backbone constants from `torchvision_tensors` landed on the right Burn parameters
    fn assert_backbone_loaded(model: &DeepfakeClassifier<TestBackend>) {
        let features = &model.features;
        assert_eq!(values(features.stem.conv.weight.val())[0], 0.001);

        let expand = features.stage2[0].expand.as_ref().unwrap();
        assert_eq!(values(expand.bn.gamma.val())[0], 0.024);

        assert_eq!(values(features.head.bn.running_var.value())[0], 1.5);
        assert_eq!(values(features.stage1[0].se.fc1.bias.as_ref().unwrap().val())[0], 0.01);
    }

    fn read_archive(
        tensors: &[NamedTensor],
        top_level_key: Option<&str>,
    ) -> (TempDir, Checkpoint<TestBackend>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("efficientnet_b0_deepfake.pth");
        torch_archive::write(&path, tensors, top_level_key).unwrap();

        let checkpoint = Checkpoint::<TestBackend>::read(&path, &Default::default()).unwrap();
        (dir, checkpoint)
    }

    fn small_model(num_classes: usize) -> DeepfakeClassifier<TestBackend> {
        let config = DeepfakeClassifierConfig::new().with_num_classes(num_classes);
        DeepfakeClassifier::new(&config, &Default::default())
    }

    #[test]
    fn test_missing_file() {
        let device = Default::default();
        let err = load_classifier::<TestBackend>(Path::new("/nonexistent/model.pth"), &device)
            .unwrap_err();
        assert!(matches!(err, DetectorError::CheckpointNotFound(_)));
        assert!(err.to_string().contains("/nonexistent/model.pth"));
    }

    #[test]
    fn test_directory_is_not_a_checkpoint() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let err = load_classifier::<TestBackend>(dir.path(), &device).unwrap_err();
        assert!(matches!(err, DetectorError::CheckpointNotFound(_)));
    }

    #[test]
    fn test_garbage_file_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.pth");
        File::create(&path).unwrap().write_all(b"definitely not a model").unwrap();

        let device = Default::default();
        let err = load_classifier::<TestBackend>(&path, &device).unwrap_err();
        assert!(matches!(err, DetectorError::UnsupportedCheckpoint(_)));
    }

    #[test]
    fn test_garbage_record_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.mpk");
        File::create(&path).unwrap().write_all(&[0xde, 0xad, 0xbe, 0xef]).unwrap();

        let device = Default::default();
        let err = load_classifier::<TestBackend>(&path, &device).unwrap_err();
        assert!(matches!(err, DetectorError::UnsupportedCheckpoint(_)));
    }

    #[test]
    fn test_zip_magic_detection() {
        let dir = TempDir::new().unwrap();

        let zip = dir.path().join("a.pth");
        File::create(&zip).unwrap().write_all(b"PK\x03\x04rest").unwrap();
        assert!(is_zip_archive(&zip).unwrap());

        let short = dir.path().join("b.pth");
        File::create(&short).unwrap().write_all(b"PK").unwrap();
        assert!(!is_zip_archive(&short).unwrap());
    }

    #[test]
    fn test_full_model_round_trip() {
        let dir = TempDir::new().unwrap();
        let written = save_classifier(small_model(1), &dir.path().join("model")).unwrap();
        assert_eq!(written.extension().unwrap(), BURN_RECORD_EXTENSION);

        let device = Default::default();
        let checkpoint = Checkpoint::<TestBackend>::read(&written, &device).unwrap();
        assert!(matches!(checkpoint, Checkpoint::FullModel(_)));

        let model = checkpoint.into_classifier(&device).unwrap();
        assert_eq!(model.num_classes(), 1);
    }

    #[test]
    fn test_model_wrapper_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("training.mpk");

        let record = TrainingCheckpointRecord {
            model: small_model(2).into_record(),
            epoch: Some(7),
        };
        Recorder::<TestBackend>::record(&BurnRecorder::new(), record, path.clone()).unwrap();

        let device = Default::default();
        let checkpoint = Checkpoint::<TestBackend>::read(&path, &device).unwrap();
        assert_eq!(checkpoint.kind(), "model wrapper");

        let model = checkpoint.into_classifier(&device).unwrap();
        assert_eq!(model.num_classes(), 2);
    }

    #[test]
    fn test_full_model_keeps_full_precision() {
        let dir = TempDir::new().unwrap();
        let model = small_model(2);
        let before = values(model.classifier.weight.val());

        let written = save_classifier(model, &dir.path().join("model.mpk")).unwrap();
        let loaded = load_classifier::<TestBackend>(&written, &Default::default()).unwrap();

        assert_eq!(values(loaded.classifier.weight.val()), before);
    }

    #[test]
    fn test_flat_state_dict_single_logit() {
        let (_dir, checkpoint) = read_archive(&torchvision_tensors("", Some([1, 1280])), None);
        assert_eq!(checkpoint.kind(), "state dict");

        let model = checkpoint.into_classifier(&Default::default()).unwrap();
        assert_eq!(model.num_classes(), 1);
        assert_backbone_loaded(&model);

        assert_eq!(model.classifier.weight.dims(), [1280, 1]);
        assert_eq!(values(model.classifier.bias.as_ref().unwrap().val()), vec![0.5]);
    }

    #[test]
    fn test_nested_state_dict_two_logits() {
        let tensors = torchvision_tensors("", Some([2, 1280]));
        let (_dir, checkpoint) = read_archive(&tensors, Some("state_dict"));

        match &checkpoint {
            Checkpoint::NestedStateDict(source) => {
                assert_eq!(source.top_level_key.as_deref(), Some("state_dict"))
            }
            _ => panic!("expected a nested state dict, got {}", checkpoint.kind()),
        }

        let model = checkpoint.into_classifier(&Default::default()).unwrap();
        assert_eq!(model.num_classes(), 2);
        assert_backbone_loaded(&model);

        // PyTorch stores [classes, features]; Burn stores [features, classes]
        let weight = values(model.classifier.weight.val());
        assert_eq!(weight[0], 0.0);
        assert_eq!(weight[1], 10.0);
        assert_eq!(weight[2], 0.0);
    }

    #[test]
    fn test_model_state_dict_with_data_parallel_prefix() {
        let tensors = torchvision_tensors("module.", Some([2, 1280]));
        let (_dir, checkpoint) = read_archive(&tensors, Some("model_state_dict"));
        assert_eq!(checkpoint.kind(), "nested state dict");

        let model = checkpoint.into_classifier(&Default::default()).unwrap();
        assert_eq!(model.num_classes(), 2);
        assert_backbone_loaded(&model);
        assert_eq!(values(model.classifier.weight.val())[1], 10.0);
    }

    #[test]
    fn test_mis_shaped_head_keeps_fresh_head() {
        let (_dir, checkpoint) = read_archive(&torchvision_tensors("", Some([2, 512])), None);

        let model = checkpoint.into_classifier(&Default::default()).unwrap();
        assert_backbone_loaded(&model);

        assert_eq!(model.num_classes(), 2);
        assert_eq!(model.classifier.weight.dims(), [1280, 2]);
        assert!(values(model.classifier.weight.val()).iter().all(|w| w.abs() < 1.0));
    }

    #[test]
    fn test_missing_head_defaults_to_two_classes() {
        let (_dir, checkpoint) = read_archive(&torchvision_tensors("", None), None);

        let model = checkpoint.into_classifier(&Default::default()).unwrap();
        assert_eq!(model.num_classes(), 2);
        assert_backbone_loaded(&model);
    }

    #[test]
    fn test_archive_without_tensors_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.pth");
        torch_archive::write(&path, &[], None).unwrap();

        let err = load_classifier::<TestBackend>(&path, &Default::default()).unwrap_err();
        assert!(matches!(err, DetectorError::UnsupportedCheckpoint(_)));
    }

    #[test]
    fn test_state_dict_rejects_wrong_backbone_shape() {
        let mut entries = layout::backbone_tensors();
        entries[0].1 = vec![16, 3, 3, 3];
        let source = StateDictSource {
            path: PathBuf::from("weights.pth"),
            top_level_key: None,
            layout: StateDictLayout::new(entries),
        };

        let err = source.load::<TestBackend>(&Default::default()).unwrap_err();
        assert!(matches!(err, DetectorError::Checkpoint(_)));
        assert!(err.to_string().contains("wrong shape"));
    }

    #[test]
    fn test_state_dict_requires_backbone() {
        let source = StateDictSource {
            path: PathBuf::from("weights.pth"),
            top_level_key: None,
            layout: StateDictLayout::new(vec![("classifier.1.weight", vec![2, 1280])]),
        };

        let err = source.load::<TestBackend>(&Default::default()).unwrap_err();
        assert!(matches!(err, DetectorError::Checkpoint(_)));
        assert!(err.to_string().contains("features.0.0.weight"));
    }
}
