//! Resource Tracker (spec.md §4.1) — a thin layer over the Coordination
//! Store holding `active(m)` and `reserved(m)`. No operation here blocks on
//! anything but a single CS round-trip; the Planner tolerates the resulting
//! mild staleness because writes that matter are serialized under the GPU
//! lock.

use std::collections::HashSet;

use crate::cs::{active_key, models_with_nonempty_sets, reserved_key, CoordinationStore, ACTIVE_PREFIX, RESERVED_PREFIX};
use crate::error::DispatchError;

pub struct ResourceTracker<'a> {
    store: &'a dyn CoordinationStore,
}

impl<'a> ResourceTracker<'a> {
    pub fn new(store: &'a dyn CoordinationStore) -> Self {
        Self { store }
    }

    pub async fn mark_active(&self, model: &str, task_id: &str) -> Result<(), DispatchError> {
        self.store.sadd(&active_key(model), task_id).await
    }

    pub async fn mark_inactive(&self, model: &str, task_id: &str) -> Result<(), DispatchError> {
        self.store.srem(&active_key(model), task_id).await
    }

    pub async fn mark_reserved(&self, model: &str, task_id: &str) -> Result<(), DispatchError> {
        self.store.sadd(&reserved_key(model), task_id).await
    }

    pub async fn mark_unreserved(&self, model: &str, task_id: &str) -> Result<(), DispatchError> {
        self.store.srem(&reserved_key(model), task_id).await
    }

    pub async fn active_models(&self) -> Result<Vec<String>, DispatchError> {
        models_with_nonempty_sets(self.store, ACTIVE_PREFIX).await
    }

    pub async fn reserved_models(&self) -> Result<Vec<String>, DispatchError> {
        models_with_nonempty_sets(self.store, RESERVED_PREFIX).await
    }

    /// `protected(m) := (active(m) ∪ reserved(m)) ≠ ∅`
    pub async fn protected_models(&self) -> Result<HashSet<String>, DispatchError> {
        let mut set: HashSet<String> = self.active_models().await?.into_iter().collect();
        set.extend(self.reserved_models().await?);
        Ok(set)
    }

    /// Remove tracker entries for any model no longer resident. Idempotent.
    /// The Janitor calls this on its cadence; the Orchestrator never needs
    /// to — its own reservation/activation cleanup happens inline on every
    /// terminal transition.
    pub async fn cleanup_stale(&self, resident_models: &HashSet<String>) -> Result<usize, DispatchError> {
        let mut cleaned = 0usize;

        for key in self.store.scan_prefix(ACTIVE_PREFIX).await? {
            if let Some(model) = key.strip_prefix(ACTIVE_PREFIX) {
                if !resident_models.contains(model) {
                    cleaned += self.clear_set(&key).await?;
                }
            }
        }
        for key in self.store.scan_prefix(RESERVED_PREFIX).await? {
            if let Some(model) = key.strip_prefix(RESERVED_PREFIX) {
                if !resident_models.contains(model) {
                    cleaned += self.clear_set(&key).await?;
                }
            }
        }

        Ok(cleaned)
    }

    async fn clear_set(&self, key: &str) -> Result<usize, DispatchError> {
        let members = self.store.smembers(key).await?;
        for member in &members {
            self.store.srem(key, member).await?;
        }
        Ok(members.len())
    }
}
