//! # Device Selection
//!
//! Picks the candle compute device for classifier inference. The model is tiny, so CPU
//! is the default; GPUs are used only when asked for and fall back to CPU when the
//! binary was built without support or no device is present.

use candle_core::Device;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Cached result of auto-detection
static BEST_DEVICE: OnceLock<Device> = OnceLock::new();

/// Device preference from `models.device`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Use the best available device
    Auto,
    /// Force CPU usage
    #[default]
    Cpu,
    /// CUDA GPU, falling back to CPU
    Cuda,
    /// Metal GPU, falling back to CPU
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

/// Resolve a preference to a concrete device.
pub fn select_device(preference: DevicePreference) -> Device {
    match preference {
        DevicePreference::Auto => BEST_DEVICE.get_or_init(detect_best_device).clone(),
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => cuda_device().unwrap_or(Device::Cpu),
        DevicePreference::Metal => metal_device().unwrap_or(Device::Cpu),
    }
}

/// Parse a preference string, warning and falling back to CPU when it is unknown.
pub fn create_device_from_string(device_str: &str) -> Device {
    match device_str.parse::<DevicePreference>() {
        Ok(preference) => select_device(preference),
        Err(e) => {
            warn!("{}, using CPU", e);
            Device::Cpu
        }
    }
}

/// Short name for logs and the model status endpoint.
pub fn device_label(device: &Device) -> String {
    match device {
        Device::Cpu => "CPU".to_string(),
        Device::Cuda(_) => "CUDA GPU".to_string(),
        Device::Metal(_) => "Metal GPU".to_string(),
    }
}

fn detect_best_device() -> Device {
    if let Some(device) = cuda_device() {
        info!("Selected CUDA GPU for inference");
        return device;
    }
    if let Some(device) = metal_device() {
        info!("Selected Metal GPU for inference");
        return device;
    }
    info!("Using CPU for inference");
    Device::Cpu
}

fn cuda_device() -> Option<Device> {
    Device::new_cuda(0)
        .map_err(|e| debug!("CUDA not available: {}", e))
        .ok()
}

fn metal_device() -> Option<Device> {
    Device::new_metal(0)
        .map_err(|e| debug!("Metal not available: {}", e))
        .ok()
}
