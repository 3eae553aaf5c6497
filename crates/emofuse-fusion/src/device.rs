//! Compute device resolution for training and inference.
//!
//! Accelerators are only tried when the crate is built with the matching
//! `cuda` or `metal` feature; everything else lands on CPU.

use candle_core::Device;

/// Pick the best device compiled into this build: CUDA, then Metal, then CPU.
pub fn select_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => {
                tracing::info!(device = "cuda", ordinal = 0, "Selected compute device");
                return device;
            }
            Err(e) => tracing::warn!(error = %e, "cuda build but no usable GPU"),
        }
    }

    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => {
                tracing::info!(device = "metal", ordinal = 0, "Selected compute device");
                return device;
            }
            Err(e) => tracing::warn!(error = %e, "metal build but no usable device"),
        }
    }

    tracing::debug!(device = "cpu", "Selected compute device");
    Device::Cpu
}

/// Short name recorded in training reports.
#[must_use]
pub fn device_name(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

/// Resolve a user-facing device string (`auto`, `cpu`, `cuda`, `metal`).
///
/// Unavailable accelerators fall back to CPU with a warning.
pub fn resolve_device(name: &str) -> Device {
    match name.trim().to_ascii_lowercase().as_str() {
        "cpu" => Device::Cpu,
        "cuda" => Device::new_cuda(0).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "CUDA requested but unavailable, using CPU");
            Device::Cpu
        }),
        "metal" => Device::new_metal(0).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Metal requested but unavailable, using CPU");
            Device::Cpu
        }),
        other => {
            if other != "auto" {
                tracing::warn!(device = other, "Unknown device name, selecting automatically");
            }
            select_device()
        }
    }
}
