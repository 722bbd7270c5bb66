//! Model Runtime Client (spec.md §2 item 3) — opaque to the Planner and
//! Orchestrator beyond this trait. `ollama` is the one concrete adapter
//! shipped, modeled on `original_source/utils/manage_models.py` and
//! `api/api.py`'s use of the `ollama` Python client against an
//! Ollama-compatible HTTP API.

pub mod ollama;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::DispatchError;

/// A model as reported by `list()` — on-disk, not necessarily resident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulledModel {
    pub name: String,
    pub size_bytes: u64,
}

/// A model as reported by `ps()` — currently resident in VRAM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidentModel {
    pub name: String,
    pub size_bytes: u64,
    pub size_vram_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlive {
    /// `keep_alive=-1` — pin the model resident.
    Pin,
    /// `keep_alive=0` — evict the model immediately.
    Evict,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// One chunk of a chat stream. `content` may be empty (the relay only
/// forwards non-empty chunks); `done` marks the final chunk.
#[derive(Debug, Clone, Default)]
pub struct ChatChunk {
    pub content: String,
    pub done: bool,
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, DispatchError>> + Send>>;

#[async_trait]
pub trait ModelRuntimeClient: Send + Sync {
    async fn list(&self) -> Result<Vec<PulledModel>, DispatchError>;
    async fn ps(&self) -> Result<Vec<ResidentModel>, DispatchError>;
    async fn generate(&self, model: &str, keep_alive: KeepAlive) -> Result<(), DispatchError>;
    async fn chat(&self, model: &str, messages: Vec<ChatMessage>) -> Result<ChatStream, DispatchError>;

    /// Download a new model from the runtime's model hub. Not used by the
    /// Planner or Orchestrator — `original_source/api/api.py`'s
    /// `POST /api/v1/pull` calls straight through to it, fire-and-forget.
    async fn pull(&self, model: &str) -> Result<(), DispatchError>;
}
