//! GPU Telemetry Probe (spec.md §2 item 2): a pure read of `{total, used,
//! free}` bytes for a GPU index. May fail transiently — callers treat a
//! probe error as `DispatchError::TelemetryUnavailable` and surface it
//! through the same Transient-error retry policy as a CS hiccup.

pub mod nvml;

use async_trait::async_trait;

use crate::error::DispatchError;

/// A moment-in-time read; re-read on every planning pass (spec.md data
/// model: "values are a moment-in-time read").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VramSnapshot {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

#[async_trait]
pub trait GpuProbe: Send + Sync {
    async fn vram_usage(&self, gpu_index: u32) -> Result<VramSnapshot, DispatchError>;
}
