//! Properties 3–4: the relay always terminates within the stall/deadline
//! bound with exactly one `[DONE]`, and forwards only non-empty chunks in
//! order, unmodified.

use std::time::Duration;

use futures_util::stream;
use tokio_util::sync::CancellationToken;

use vram_dispatch::cs::memory_store::InMemoryStore;
use vram_dispatch::error::DispatchError;
use vram_dispatch::relay::{relay_chat_stream, RelayOutcome, DONE_SENTINEL};
use vram_dispatch::runtime::{ChatChunk, ChatStream};

fn chat_stream(chunks: Vec<Result<ChatChunk, DispatchError>>) -> ChatStream {
    Box::pin(stream::iter(chunks))
}

fn chunk(content: &str, done: bool) -> Result<ChatChunk, DispatchError> {
    Ok(ChatChunk { content: content.to_string(), done })
}

#[tokio::test]
async fn completed_stream_concatenates_non_empty_chunks_and_ends_with_done() {
    let store = InMemoryStore::new();
    let stream = chat_stream(vec![
        chunk("Hello", false),
        chunk("", false), // empty chunk must not be forwarded
        chunk(" world", true),
    ]);
    let cancel = CancellationToken::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

    let outcome = relay_chat_stream(&store, "chan-1", stream, deadline, deadline, &cancel).await;

    assert_eq!(outcome, RelayOutcome::Completed { chunks: 2 });
    let published = store.published_on("chan-1");
    assert_eq!(published, vec!["Hello".to_string(), " world".to_string(), DONE_SENTINEL.to_string()]);
}

#[tokio::test]
async fn stream_without_terminal_done_still_completes_with_exactly_one_done() {
    let store = InMemoryStore::new();
    let stream = chat_stream(vec![chunk("partial", false)]);
    let cancel = CancellationToken::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

    let outcome = relay_chat_stream(&store, "chan-2", stream, deadline, deadline, &cancel).await;

    assert_eq!(outcome, RelayOutcome::Completed { chunks: 1 });
    let published = store.published_on("chan-2");
    assert_eq!(published.iter().filter(|m| *m == DONE_SENTINEL).count(), 1);
    assert_eq!(published.last().unwrap(), DONE_SENTINEL);
}

#[tokio::test]
async fn runtime_error_aborts_with_error_then_done() {
    let store = InMemoryStore::new();
    let stream = chat_stream(vec![Err(DispatchError::TelemetryUnavailable {
        gpu_index: 0,
        message: "nvml query failed".to_string(),
    })]);
    let cancel = CancellationToken::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

    let outcome = relay_chat_stream(&store, "chan-3", stream, deadline, deadline, &cancel).await;

    assert!(matches!(outcome, RelayOutcome::Aborted { .. }));
    let published = store.published_on("chan-3");
    assert_eq!(published.len(), 2);
    assert!(published[0].starts_with("[ERROR:"));
    assert_eq!(published[1], DONE_SENTINEL);
}

#[tokio::test]
async fn cancellation_aborts_promptly_with_exactly_one_done() {
    let store = InMemoryStore::new();
    // An indefinitely pending stream: cancellation must still win the race.
    let stream: ChatStream = Box::pin(stream::pending());
    let cancel = CancellationToken::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);

    let relay_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        relay_cancel.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        relay_chat_stream(&store, "chan-4", stream, deadline, deadline, &cancel),
    )
    .await
    .expect("relay must terminate promptly on cancellation");

    assert_eq!(outcome, RelayOutcome::Aborted { reason: "cancelled".to_string() });
    assert_eq!(store.published_on("chan-4").last().unwrap(), DONE_SENTINEL);
}

#[tokio::test]
async fn stall_beyond_timeout_aborts_even_though_hard_deadline_is_far_off() {
    let store = InMemoryStore::new();
    let stream: ChatStream = Box::pin(stream::pending());
    let cancel = CancellationToken::new();
    // Deadline itself is in the past relative to the stall window so the
    // test doesn't have to wait out the real 60s STALL_TIMEOUT.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(10);

    let outcome = relay_chat_stream(&store, "chan-5", stream, deadline, deadline, &cancel).await;

    assert!(matches!(outcome, RelayOutcome::Aborted { .. }));
    assert_eq!(store.published_on("chan-5").last().unwrap(), DONE_SENTINEL);
}

#[tokio::test]
async fn soft_timeout_aborts_before_the_hard_deadline() {
    let store = InMemoryStore::new();
    let stream: ChatStream = Box::pin(stream::pending());
    let cancel = CancellationToken::new();
    let now = tokio::time::Instant::now();
    let soft_deadline = now + Duration::from_millis(10);
    let hard_deadline = now + Duration::from_secs(60);

    let outcome = relay_chat_stream(&store, "chan-6", stream, soft_deadline, hard_deadline, &cancel).await;

    assert_eq!(outcome, RelayOutcome::Aborted { reason: "soft timeout exceeded".to_string() });
    assert_eq!(store.published_on("chan-6").last().unwrap(), DONE_SENTINEL);
}
