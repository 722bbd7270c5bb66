use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use reqwest::Client;
use serde::Deserialize;

use crate::error::DispatchError;

use super::{ChatChunk, ChatMessage, ChatStream, KeepAlive, ModelRuntimeClient, PulledModel, ResidentModel};

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
    size: u64,
}

#[derive(Deserialize)]
struct PsResponse {
    models: Vec<PsEntry>,
}

#[derive(Deserialize)]
struct PsEntry {
    name: String,
    size: u64,
    #[serde(default, rename = "size_vram")]
    size_vram: u64,
}

#[derive(Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatLineMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct ChatLineMessage {
    #[serde(default)]
    content: String,
}

/// Adapter over an Ollama-compatible HTTP API — the concrete shape
/// `original_source/api/api.py` and `utils/manage_models.py` talk to
/// through the `ollama` Python client. Built the same way
/// `squall::dispatch::http::HttpDispatch` builds its client: short
/// connect timeout, modest idle pool, no retries baked in (retries are
/// the Orchestrator's job, not the transport's).
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("failed to build model runtime HTTP client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ModelRuntimeClient for OllamaClient {
    async fn list(&self) -> Result<Vec<PulledModel>, DispatchError> {
        let resp: TagsResponse = self
            .client
            .get(self.url("/api/tags"))
            .send()
            .await?
            .json()
            .await?;
        Ok(resp
            .models
            .into_iter()
            .map(|m| PulledModel {
                name: m.name,
                size_bytes: m.size,
            })
            .collect())
    }

    async fn ps(&self) -> Result<Vec<ResidentModel>, DispatchError> {
        let resp: PsResponse = self
            .client
            .get(self.url("/api/ps"))
            .send()
            .await?
            .json()
            .await?;
        Ok(resp
            .models
            .into_iter()
            .map(|m| ResidentModel {
                name: m.name,
                size_bytes: m.size,
                size_vram_bytes: m.size_vram,
            })
            .collect())
    }

    async fn generate(&self, model: &str, keep_alive: KeepAlive) -> Result<(), DispatchError> {
        let keep_alive_value = match keep_alive {
            KeepAlive::Pin => -1,
            KeepAlive::Evict => 0,
        };
        let body = serde_json::json!({
            "model": model,
            "prompt": "",
            "keep_alive": keep_alive_value,
            "stream": false,
        });
        self.client
            .post(self.url("/api/generate"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn pull(&self, model: &str) -> Result<(), DispatchError> {
        let body = serde_json::json!({ "model": model, "stream": false });
        self.client
            .post(self.url("/api/pull"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn chat(&self, model: &str, messages: Vec<ChatMessage>) -> Result<ChatStream, DispatchError> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages
                .iter()
                .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
                .collect::<Vec<_>>(),
            "stream": true,
        });
        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        Ok(Box::pin(stream::unfold(
            NdjsonState {
                response,
                buf: Vec::new(),
                ended: false,
            },
            next_ndjson_chunk,
        )))
    }
}

struct NdjsonState {
    response: reqwest::Response,
    buf: Vec<u8>,
    ended: bool,
}

/// Pull the next complete NDJSON line out of the response body, parse it
/// into a `ChatChunk`. Ollama's `/api/chat` streams one JSON object per
/// line rather than SSE frames, so this replaces
/// `squall::dispatch::http`'s `eventsource-stream`-based reader with a
/// plain newline splitter over `reqwest::Response::chunk()`.
async fn next_ndjson_chunk(
    mut state: NdjsonState,
) -> Option<(Result<ChatChunk, DispatchError>, NdjsonState)> {
    loop {
        if let Some(pos) = state.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = state.buf.drain(..=pos).collect();
            line.pop(); // drop the newline itself
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some((parse_ndjson_line(&line), state));
        }

        if state.ended {
            if state.buf.iter().all(u8::is_ascii_whitespace) {
                return None;
            }
            let line = std::mem::take(&mut state.buf);
            return Some((parse_ndjson_line(&line), state));
        }

        match state.response.chunk().await {
            Ok(Some(bytes)) => state.buf.extend_from_slice(&bytes),
            Ok(None) => state.ended = true,
            Err(e) => return Some((Err(DispatchError::from(e)), state)),
        }
    }
}

fn parse_ndjson_line(line: &[u8]) -> Result<ChatChunk, DispatchError> {
    let parsed: ChatLine = serde_json::from_slice(line)
        .map_err(|e| DispatchError::RuntimeParse(format!("chat stream line: {e}")))?;
    Ok(ChatChunk {
        content: parsed.message.map(|m| m.content).unwrap_or_default(),
        done: parsed.done,
    })
}
