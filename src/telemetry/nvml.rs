use async_trait::async_trait;
use nvml_wrapper::Nvml;

use crate::error::DispatchError;

use super::{GpuProbe, VramSnapshot};

/// NVML-backed probe — the direct analogue of `original_source/utils/gpu.py`'s
/// `get_vram_usage` (which calls `pynvml.nvmlDeviceGetMemoryInfo`), reimplemented
/// against `nvml-wrapper` instead of shelling out to the vendor library via FFI
/// bindings by hand.
pub struct NvmlProbe {
    nvml: Nvml,
}

impl NvmlProbe {
    pub fn init() -> Result<Self, DispatchError> {
        let nvml = Nvml::init().map_err(|e| DispatchError::TelemetryUnavailable {
            gpu_index: 0,
            message: e.to_string(),
        })?;
        Ok(Self { nvml })
    }
}

#[async_trait]
impl GpuProbe for NvmlProbe {
    async fn vram_usage(&self, gpu_index: u32) -> Result<VramSnapshot, DispatchError> {
        let device =
            self.nvml
                .device_by_index(gpu_index)
                .map_err(|e| DispatchError::TelemetryUnavailable {
                    gpu_index,
                    message: e.to_string(),
                })?;
        let mem = device
            .memory_info()
            .map_err(|e| DispatchError::TelemetryUnavailable {
                gpu_index,
                message: e.to_string(),
            })?;
        Ok(VramSnapshot {
            total: mem.total,
            used: mem.used,
            free: mem.free,
        })
    }
}
