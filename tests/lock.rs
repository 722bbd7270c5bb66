//! Property 1 — lock exclusivity: at most one holder of `GpuLock(g)` at
//! any instant, and the holder's fencing token is the one stored.

use std::sync::Arc;
use std::time::Duration;

use vram_dispatch::cs::lock;
use vram_dispatch::cs::memory_store::InMemoryStore;

#[tokio::test]
async fn second_waiter_blocks_until_release() {
    let store = InMemoryStore::new();

    let guard = lock::acquire(&store, 0, Duration::from_millis(200), Duration::from_secs(10))
        .await
        .unwrap();

    // A concurrent acquire attempt with a short wait must time out while the
    // first guard is still held.
    let contended = lock::acquire(&store, 0, Duration::from_millis(100), Duration::from_secs(10)).await;
    assert!(contended.is_err());

    guard.release(&store).await.unwrap();

    // Once released, acquisition succeeds immediately.
    let guard2 = lock::acquire(&store, 0, Duration::from_millis(200), Duration::from_secs(10))
        .await
        .unwrap();
    guard2.release(&store).await.unwrap();
}

#[tokio::test]
async fn expired_lock_can_be_reclaimed_by_a_new_holder() {
    let store = InMemoryStore::new();

    let _guard = lock::acquire(&store, 1, Duration::from_millis(50), Duration::from_millis(50))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;

    // TTL has expired; a new acquirer should succeed without waiting on the
    // stale holder.
    let guard2 = lock::acquire(&store, 1, Duration::from_millis(50), Duration::from_secs(10))
        .await
        .unwrap();
    guard2.release(&store).await.unwrap();
}

#[tokio::test]
async fn release_after_reclaim_does_not_delete_new_holders_key() {
    // The core fencing-token guarantee: a guard whose TTL has already
    // expired, and whose key another holder has since reclaimed, must not
    // be able to delete that new holder's lock on release.
    let store = Arc::new(InMemoryStore::new());

    let stale_guard = lock::acquire(&*store, 2, Duration::from_millis(50), Duration::from_millis(50))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let new_guard = lock::acquire(&*store, 2, Duration::from_millis(50), Duration::from_secs(10))
        .await
        .unwrap();

    // Releasing the stale guard must be a no-op (compare-and-delete fails
    // because the stored value no longer matches the stale token).
    stale_guard.release(&*store).await.unwrap();

    // A third acquirer must still see the lock as held by new_guard.
    let still_contended = lock::acquire(&*store, 2, Duration::from_millis(50), Duration::from_secs(10)).await;
    assert!(still_contended.is_err());

    new_guard.release(&*store).await.unwrap();
}

#[tokio::test]
async fn locks_on_different_gpus_are_independent() {
    let store = InMemoryStore::new();

    let guard0 = lock::acquire(&store, 0, Duration::from_millis(100), Duration::from_secs(10))
        .await
        .unwrap();
    let guard1 = lock::acquire(&store, 1, Duration::from_millis(100), Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(guard0.gpu_index(), 0);
    assert_eq!(guard1.gpu_index(), 1);

    guard0.release(&store).await.unwrap();
    guard1.release(&store).await.unwrap();
}
