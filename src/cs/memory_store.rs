use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::DispatchError;

use super::CoordinationStore;

struct LockEntry {
    value: String,
    expires_at: Instant,
}

/// Deterministic in-process stand-in for a real Redis deployment. Used by
/// `tests/lock.rs`, `tests/tracker.rs`, and `tests/orchestrator.rs` so those
/// suites can exercise real interleavings without a live coordination store —
/// the same role `squall`'s `tests/streaming.rs` gives a raw `TcpListener`
/// standing in for an upstream HTTP peer.
#[derive(Default)]
pub struct InMemoryStore {
    sets: Mutex<HashMap<String, HashSet<String>>>,
    locks: Mutex<HashMap<String, LockEntry>>,
    published: Mutex<Vec<(String, String)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: everything ever published, in publish order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    /// Test helper: messages published to one channel, in order.
    pub fn published_on(&self, channel: &str) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn sadd(&self, key: &str, member: &str) -> Result<(), DispatchError> {
        self.sets
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), DispatchError> {
        if let Some(set) = self.sets.lock().unwrap().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, DispatchError> {
        Ok(self
            .sets
            .lock()
            .unwrap()
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> Result<u64, DispatchError> {
        Ok(self
            .sets
            .lock()
            .unwrap()
            .get(key)
            .map(|s| s.len() as u64)
            .unwrap_or(0))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, DispatchError> {
        Ok(self
            .sets
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn set_if_absent_ex(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, DispatchError> {
        let mut locks = self.locks.lock().unwrap();
        let now = Instant::now();
        if let Some(existing) = locks.get(key) {
            if existing.expires_at > now {
                return Ok(false);
            }
        }
        locks.insert(
            key.to_string(),
            LockEntry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn compare_delete(&self, key: &str, expected: &str) -> Result<bool, DispatchError> {
        let mut locks = self.locks.lock().unwrap();
        match locks.get(key) {
            Some(entry) if entry.value == expected && entry.expires_at > Instant::now() => {
                locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), DispatchError> {
        self.published
            .lock()
            .unwrap()
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }

    async fn ping(&self) -> Result<(), DispatchError> {
        Ok(())
    }
}
