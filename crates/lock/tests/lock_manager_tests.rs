//! Integration tests for `WorkLockManager` over the in-memory store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use kiro_core::lock::{LockRecord, LockStatus, PROCESSOR_LOCK_KEY};
use kiro_core::types::Environment;
use kiro_lock::{InMemoryLockStore, WorkLockManager};

// ---------------------------------------------------------------------------
// Mutual exclusion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_acquires_yield_exactly_one_holder() {
    let store = Arc::new(InMemoryLockStore::new());
    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            WorkLockManager::new(store)
                .acquire(&format!("item-{i}"), "pending", Environment::Test)
                .await
        }));
    }

    let mut acquired = 0;
    for handle in handles {
        let result = handle.await.expect("task joined").expect("no store error");
        if result.acquired {
            acquired += 1;
            assert!(!result.lock_token.is_empty());
        } else {
            assert!(result.lock_token.is_empty());
            assert!(result.reason.is_some());
        }
    }
    assert_eq!(acquired, 1);
}

#[tokio::test]
async fn tokens_are_unique_across_successive_holders() {
    let store = Arc::new(InMemoryLockStore::new());
    let manager = WorkLockManager::new(store);

    let first = manager.acquire("1", "pending", Environment::Staging).await.unwrap();
    manager.release(&first.lock_token).await;
    let second = manager.acquire("1", "pending", Environment::Staging).await.unwrap();

    assert!(second.acquired);
    assert_ne!(first.lock_token, second.lock_token);
}

// ---------------------------------------------------------------------------
// Release
// ---------------------------------------------------------------------------

#[tokio::test]
async fn release_of_missing_lock_is_a_no_op() {
    let manager = WorkLockManager::new(Arc::new(InMemoryLockStore::new()));
    manager.release("00000000-0000-4000-8000-000000000000").await;
    let result = manager.acquire("1", "pending", Environment::Test).await.unwrap();
    assert!(result.acquired);
}

#[tokio::test]
async fn stale_holder_cannot_release_new_holder() {
    let store = Arc::new(InMemoryLockStore::new());
    let expired = LockRecord::new(
        PROCESSOR_LOCK_KEY,
        "old",
        "build-1",
        Environment::Test,
        Utc::now() - Duration::hours(3),
        Duration::hours(2),
    );
    store.insert(expired.clone()).await;

    let manager = WorkLockManager::new(store.clone());
    let fresh = manager.acquire("new", "pending", Environment::Test).await.unwrap();
    assert!(fresh.acquired);

    manager.release(&expired.lock_token).await;
    let current = store.get(PROCESSOR_LOCK_KEY).await.expect("still held");
    assert_eq!(current.lock_token, fresh.lock_token);
    assert_eq!(current.work_item_id, "new");
}

// ---------------------------------------------------------------------------
// Stale detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unexpired_lock_is_not_stale() {
    let store = Arc::new(InMemoryLockStore::new());
    let manager = WorkLockManager::new(store);
    manager.acquire("1", "pending", Environment::Test).await.unwrap();
    assert!(manager.detect_stale().await.unwrap().is_empty());
}

#[tokio::test]
async fn expired_failed_lock_is_not_stale() {
    let store = Arc::new(InMemoryLockStore::new());
    let mut record = LockRecord::new(
        PROCESSOR_LOCK_KEY,
        "5",
        "build-5",
        Environment::Production,
        Utc::now() - Duration::hours(4),
        Duration::hours(2),
    );
    record.status = LockStatus::Failed;
    store.insert(record).await;

    let stale = WorkLockManager::new(store).detect_stale().await.unwrap();
    assert!(stale.is_empty());
}

#[tokio::test]
async fn expired_in_progress_lock_is_reported_once() {
    let store = Arc::new(InMemoryLockStore::new());
    store
        .insert(LockRecord::new(
            PROCESSOR_LOCK_KEY,
            "12",
            "build-12",
            Environment::Test,
            Utc::now() - Duration::hours(3),
            Duration::hours(2),
        ))
        .await;

    let stale = WorkLockManager::new(store).detect_stale().await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, "12");
    assert_eq!(stale[0].status, "failed");
}
