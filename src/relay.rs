//! Streaming Relay (spec.md §4.5) — pumps a `ChatStream` onto a channel,
//! publishing non-empty content chunks and terminating with exactly one
//! `[DONE]` on every exit path. Modeled on
//! `squall::dispatch::http::read_sse_stream`'s stall/deadline/cancellation
//! `tokio::select!` shape, adapted from SSE framing to the Model Runtime
//! Client's NDJSON chunks (`runtime::ChatChunk`, not SSE events).
//!
//! Carries the source's soft/hard task-time-limit split (spec.md §5/§6,
//! `original_source/worker/celery_app.py`'s `task_soft_time_limit=300` vs
//! `task_time_limit=360`): the soft deadline is the one expected to fire
//! and abort the stream gracefully; the hard deadline is a backstop in
//! case the soft abort itself gets stuck.

use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::cs::CoordinationStore;
use crate::runtime::ChatStream;

pub const DONE_SENTINEL: &str = "[DONE]";

/// Time without any chunk before the relay gives up and aborts with a
/// timeout-shaped error, distinct from the hard per-task deadline.
const STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of a relay run, used by the Orchestrator to decide the task's
/// terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The stream ended normally; `[DONE]` was published.
    Completed { chunks: usize },
    /// The stream errored, was cancelled, or stalled; `[ERROR: …][DONE]`
    /// was published (best-effort).
    Aborted { reason: String },
}

/// Pump `stream` onto `channel_id` via `store.publish`, honoring
/// `soft_deadline`/`hard_deadline` and cooperative cancellation through
/// `cancel`. Always terminates with exactly one `[DONE]` publish,
/// regardless of exit path — publish failures themselves are swallowed
/// (best-effort, per spec.md §4.5).
///
/// `soft_deadline` is expected to fire first: it logs a warning and aborts
/// the stream the same way a hard deadline would. `hard_deadline` exists
/// only as a backstop, in case that graceful abort never runs.
pub async fn relay_chat_stream(
    store: &dyn CoordinationStore,
    channel_id: &str,
    mut stream: ChatStream,
    soft_deadline: tokio::time::Instant,
    hard_deadline: tokio::time::Instant,
    cancel: &CancellationToken,
) -> RelayOutcome {
    let mut chunks = 0usize;
    let mut last_chunk_at = tokio::time::Instant::now();

    let deadline_sleep = tokio::time::sleep_until(soft_deadline.min(hard_deadline));
    tokio::pin!(deadline_sleep);

    loop {
        let stall_deadline = last_chunk_at + STALL_TIMEOUT;
        let effective_deadline = soft_deadline.min(hard_deadline).min(stall_deadline);
        deadline_sleep.as_mut().reset(effective_deadline);

        tokio::select! {
            _ = cancel.cancelled() => {
                publish_error(store, channel_id, "cancelled").await;
                publish_done(store, channel_id).await;
                return RelayOutcome::Aborted { reason: "cancelled".to_string() };
            }
            _ = &mut deadline_sleep => {
                let now = tokio::time::Instant::now();
                let reason = if now >= hard_deadline {
                    "deadline exceeded"
                } else if now >= soft_deadline {
                    tracing::warn!(channel_id, "soft timeout exceeded, aborting stream");
                    "soft timeout exceeded"
                } else {
                    "stream stalled"
                };
                publish_error(store, channel_id, reason).await;
                publish_done(store, channel_id).await;
                return RelayOutcome::Aborted { reason: reason.to_string() };
            }
            item = stream.next() => match item {
                Some(Ok(chunk)) => {
                    last_chunk_at = tokio::time::Instant::now();
                    if !chunk.content.is_empty() {
                        tracing::debug!(channel_id, bytes = chunk.content.len(), "relay chunk");
                        let _ = store.publish(channel_id, &chunk.content).await;
                        chunks += 1;
                    }
                    if chunk.done {
                        publish_done(store, channel_id).await;
                        return RelayOutcome::Completed { chunks };
                    }
                }
                Some(Err(e)) => {
                    publish_error(store, channel_id, &e.user_message()).await;
                    publish_done(store, channel_id).await;
                    return RelayOutcome::Aborted { reason: e.user_message() };
                }
                None => {
                    // Stream ended without an explicit done=true chunk — treat as
                    // normal completion, matching MRC's chat() which yields a
                    // finite sequence with no separate end-of-stream signal.
                    publish_done(store, channel_id).await;
                    return RelayOutcome::Completed { chunks };
                }
            },
        }
    }
}

/// Publish `[ERROR: <message>]`, swallowing any publish failure.
async fn publish_error(store: &dyn CoordinationStore, channel_id: &str, message: &str) {
    let _ = store.publish(channel_id, &format!("[ERROR: {message}]")).await;
}

/// Publish the terminating `[DONE]` sentinel, swallowing any publish failure.
pub async fn publish_done(store: &dyn CoordinationStore, channel_id: &str) {
    if let Err(e) = store.publish(channel_id, DONE_SENTINEL).await {
        tracing::warn!(channel_id, error = %e, "failed to publish [DONE] sentinel");
    }
}
