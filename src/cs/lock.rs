use std::time::Duration;

use uuid::Uuid;

use crate::error::DispatchError;

use super::{gpu_lock_key, CoordinationStore};

/// Poll interval while waiting to acquire a contended lock.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A held per-GPU mutex. Carries the fencing token so release can prove it
/// still owns the key (compare-and-delete) rather than blindly deleting —
/// a holder whose TTL expired must never be able to delete a different
/// holder's lock.
pub struct GpuLockGuard {
    gpu_index: u32,
    token: String,
}

impl GpuLockGuard {
    pub fn gpu_index(&self) -> u32 {
        self.gpu_index
    }

    /// Release the lock. Safe to call even if the TTL already expired and
    /// another holder has since acquired it — compare-and-delete will just
    /// no-op in that case.
    pub async fn release(self, store: &dyn CoordinationStore) -> Result<(), DispatchError> {
        let key = gpu_lock_key(self.gpu_index);
        store.compare_delete(&key, &self.token).await?;
        Ok(())
    }
}

/// Acquire `GpuLock(gpu_index)` with bounded-backoff polling up to `wait`.
/// On failure the caller should treat this as a transient condition and
/// defer the task (spec.md §4.4 step 1).
pub async fn acquire(
    store: &dyn CoordinationStore,
    gpu_index: u32,
    wait: Duration,
    ttl: Duration,
) -> Result<GpuLockGuard, DispatchError> {
    let key = gpu_lock_key(gpu_index);
    let token = Uuid::new_v4().to_string();
    let deadline = tokio::time::Instant::now() + wait;

    loop {
        if store.set_if_absent_ex(&key, &token, ttl).await? {
            return Ok(GpuLockGuard { gpu_index, token });
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(DispatchError::LockContention { gpu_index });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
