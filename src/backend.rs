//! Backend selection - CUDA (when compiled in and present) or NdArray (CPU)
//!
//! Burn backends are types, so both candidates are compiled in and the binary
//! picks one at startup from [`select_device`]. Everything downstream is generic
//! over `B: Backend`.

use std::fmt;

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

// --------------------------------------------------------------------------------
// BACKEND SELECTION: CUDA (preferred, feature gated) or NdArray (always available)
// --------------------------------------------------------------------------------

/// CPU backend, always available
pub type CpuBackend = burn_ndarray::NdArray<f32>;

/// GPU backend, only with the `cuda` feature
#[cfg(feature = "cuda")]
pub type CudaBackend = burn_cuda::Cuda;

/// Compute device the model and every inference tensor live on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    /// General purpose processor (NdArray backend)
    Cpu,
    /// NVIDIA accelerator (CUDA backend)
    Cuda,
}

impl ComputeDevice {
    /// Human-readable backend name for startup logs
    pub fn backend_name(&self) -> &'static str {
        match self {
            ComputeDevice::Cpu => "NdArray (CPU)",
            ComputeDevice::Cuda => "CUDA (GPU)",
        }
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeDevice::Cpu => write!(f, "cpu"),
            ComputeDevice::Cuda => write!(f, "cuda"),
        }
    }
}

/// Get the default device for a backend
pub fn default_device<B: Backend>() -> B::Device {
    B::Device::default()
}

/// Pick the device once at startup: CUDA if compiled in and a GPU is present, else CPU
pub fn select_device(force_cpu: bool) -> ComputeDevice {
    if force_cpu {
        return ComputeDevice::Cpu;
    }

    if cuda_compiled() && has_nvidia_gpu() {
        ComputeDevice::Cuda
    } else {
        ComputeDevice::Cpu
    }
}

/// Whether the CUDA backend was compiled into this binary
pub fn cuda_compiled() -> bool {
    cfg!(feature = "cuda")
}

/// Check for an NVIDIA GPU and driver
fn has_nvidia_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/driver/nvidia/version").exists()
            || std::path::Path::new("/dev/nvidia0").exists()
            || std::env::var("CUDA_VISIBLE_DEVICES").is_ok_and(|v| !v.is_empty())
            || nvidia_smi_succeeds("nvidia-smi")
    }

    #[cfg(target_os = "windows")]
    {
        nvidia_smi_succeeds("nvidia-smi.exe")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        false
    }
}

#[allow(dead_code)]
fn nvidia_smi_succeeds(binary: &str) -> bool {
    std::process::Command::new(binary)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
