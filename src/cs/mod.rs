//! Coordination Store — the external key/value + pub/sub service every
//! worker talks through. `CoordinationStore` is the interface contract
//! from spec.md §2 item 1; `redis_store` is the production implementation,
//! `memory_store` a deterministic fake used by tests that don't want a
//! live Redis (same role `tests/streaming.rs` gives its raw `TcpListener`
//! stand-in for an upstream API).

pub mod lock;
pub mod memory_store;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::DispatchError;

pub const ACTIVE_PREFIX: &str = "active_model:";
pub const RESERVED_PREFIX: &str = "reserved_model:";
pub const GPU_LOCK_PREFIX: &str = "lock:gpu:";

pub fn active_key(model: &str) -> String {
    format!("{ACTIVE_PREFIX}{model}")
}

pub fn reserved_key(model: &str) -> String {
    format!("{RESERVED_PREFIX}{model}")
}

pub fn gpu_lock_key(gpu_index: u32) -> String {
    format!("{GPU_LOCK_PREFIX}{gpu_index}")
}

/// Strip a known prefix off a scanned key, yielding the model name.
pub fn strip_prefix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)
}

/// Atomic primitives the rest of the crate builds on: set mutation,
/// conditional SET-if-absent with TTL (for the GPU lock), compare-and-delete
/// (fencing-token-safe release), scan-by-prefix (set enumeration), and
/// publish (the streaming relay's only write to the channel transport).
///
/// No operation here blocks on anything but a single CS round-trip — the
/// Planner tolerates staleness across calls because writes that matter are
/// serialized under the GPU lock.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn sadd(&self, key: &str, member: &str) -> Result<(), DispatchError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), DispatchError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, DispatchError>;
    async fn scard(&self, key: &str) -> Result<u64, DispatchError>;

    /// Enumerate keys matching `prefix*`. Each key's own membership is read
    /// atomically; there is no cross-key snapshot guarantee.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, DispatchError>;

    /// `SET key value NX PX ttl` — true if this call created the key.
    async fn set_if_absent_ex(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, DispatchError>;

    /// Delete `key` only if its current value equals `expected`. Returns
    /// true if the delete happened. Must never delete a key whose value
    /// has since changed (a different fencing token holds it now).
    async fn compare_delete(&self, key: &str, expected: &str) -> Result<bool, DispatchError>;

    async fn publish(&self, channel: &str, message: &str) -> Result<(), DispatchError>;

    /// Liveness probe used by `/health`.
    async fn ping(&self) -> Result<(), DispatchError>;
}

/// Enumerate every model name with a non-empty set under `prefix`.
pub async fn models_with_nonempty_sets(
    store: &dyn CoordinationStore,
    prefix: &str,
) -> Result<Vec<String>, DispatchError> {
    let keys = store.scan_prefix(prefix).await?;
    let mut out = Vec::new();
    for key in keys {
        if store.scard(&key).await? > 0 {
            if let Some(model) = strip_prefix(&key, prefix) {
                out.push(model.to_string());
            }
        }
    }
    Ok(out)
}
