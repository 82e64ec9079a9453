//! `WorkItemPoller` against fake sources and triggers over the in-memory
//! lock store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use kiro_core::lock::{LockRecord, PROCESSOR_LOCK_KEY};
use kiro_core::types::Environment;
use kiro_core::work_item::WorkItem;
use kiro_lock::{InMemoryLockStore, LockStore, StoreError, WorkLockManager};
use kiro_worker::source::{SourceError, WorkItemSource};
use kiro_worker::trigger::{ExecutionTrigger, TriggerError, TriggerRequest, TriggerResponse};
use kiro_worker::{PollerSettings, WorkItemPoller};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeSource {
    items: Vec<WorkItem>,
    fetch_fails: bool,
    /// Branches reported as having no open pull request.
    without_pull_request: Vec<String>,
    pr_lookup_fails: bool,
    mark_fails: bool,
    marked: Mutex<Vec<String>>,
}

#[async_trait]
impl WorkItemSource for FakeSource {
    async fn fetch_ready_items(&self, status: &str) -> Result<Vec<WorkItem>, SourceError> {
        assert_eq!(status, "Ready");
        if self.fetch_fails {
            return Err(SourceError::Unavailable("board offline".into()));
        }
        Ok(self.items.clone())
    }

    async fn verify_pull_request_open(&self, branch: &str) -> Result<bool, SourceError> {
        if self.pr_lookup_fails {
            return Err(SourceError::Unavailable("pulls API down".into()));
        }
        Ok(!self.without_pull_request.iter().any(|b| b == branch))
    }

    async fn mark_in_progress(&self, item: &WorkItem) -> Result<(), SourceError> {
        if self.mark_fails {
            return Err(SourceError::Unavailable("label API down".into()));
        }
        self.marked.lock().unwrap().push(item.id.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakeTrigger {
    fails: bool,
    requests: Mutex<Vec<TriggerRequest>>,
}

#[async_trait]
impl ExecutionTrigger for FakeTrigger {
    async fn start(
        &self,
        project_name: &str,
        request: &TriggerRequest,
    ) -> Result<TriggerResponse, TriggerError> {
        assert_eq!(project_name, "kiro-worker-test");
        self.requests.lock().unwrap().push(request.clone());
        if self.fails {
            return Err(TriggerError::Request("throttled".into()));
        }
        Ok(TriggerResponse {
            build_id: "kiro-worker-test:build-1".into(),
            arn: None,
        })
    }
}

struct BrokenStore;

#[async_trait]
impl LockStore for BrokenStore {
    async fn put_if_absent_or_expired(&self, _: &LockRecord, _: chrono::DateTime<Utc>) -> Result<(), StoreError> {
        Err(StoreError::backend("access denied"))
    }

    async fn delete_if_token_matches(&self, _: &str, _: &str) -> Result<(), StoreError> {
        Err(StoreError::backend("access denied"))
    }

    async fn query_expired_in_progress(
        &self,
        _: &str,
        _: chrono::DateTime<Utc>,
    ) -> Result<Vec<LockRecord>, StoreError> {
        Err(StoreError::backend("access denied"))
    }
}

fn item(id: &str, priority: Option<i64>, created_day: u32) -> WorkItem {
    WorkItem {
        id: id.into(),
        title: format!("Item {id}"),
        description: String::new(),
        branch_name: format!("feature-{id}"),
        status: "Ready".into(),
        created_at: Utc.with_ymd_and_hms(2024, 5, created_day, 9, 0, 0).unwrap(),
        priority,
    }
}

fn settings() -> PollerSettings {
    PollerSettings {
        environment: Environment::Test,
        project_name: "kiro-worker-test".into(),
        target_status: "Ready".into(),
    }
}

fn poller(
    source: Arc<FakeSource>,
    trigger: Arc<FakeTrigger>,
    store: Arc<dyn LockStore>,
) -> WorkItemPoller {
    WorkItemPoller::new(source, trigger, WorkLockManager::new(store), settings())
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_board_skips_the_lock() {
    let store = Arc::new(InMemoryLockStore::new());
    let trigger = Arc::new(FakeTrigger::default());
    let result = poller(Arc::new(FakeSource::default()), trigger.clone(), store.clone())
        .poll()
        .await;

    assert_eq!(result.work_items_found, 0);
    assert!(!result.lock_acquired);
    assert!(!result.build_triggered);
    assert!(result.errors.is_empty());
    assert!(store.get(PROCESSOR_LOCK_KEY).await.is_none());
    assert!(trigger.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn triggers_build_and_marks_item() {
    let store = Arc::new(InMemoryLockStore::new());
    let source = Arc::new(FakeSource {
        items: vec![item("7", Some(1), 1)],
        ..Default::default()
    });
    let trigger = Arc::new(FakeTrigger::default());

    let result = poller(source.clone(), trigger.clone(), store.clone()).poll().await;

    assert!(result.lock_acquired);
    assert!(result.build_triggered);
    assert_eq!(result.build_id.as_deref(), Some("kiro-worker-test:build-1"));
    assert_eq!(result.selected_item.as_ref().map(|i| i.id.as_str()), Some("7"));
    assert_eq!(*source.marked.lock().unwrap(), vec!["7".to_string()]);

    let requests = trigger.requests.lock().unwrap();
    assert_eq!(requests[0].branch_name, "feature-7");
    assert_eq!(requests[0].spec_path, ".kiro/specs/feature-7");
    assert_eq!(requests[0].work_item_id, "7");

    let record = store.get(PROCESSOR_LOCK_KEY).await.expect("lock held");
    assert_eq!(record.work_item_id, "7");
    assert_eq!(record.build_id, "pending");
    assert_eq!(requests[0].lock_token.as_deref(), Some(record.lock_token.as_str()));
}

#[tokio::test]
async fn trigger_failure_releases_the_lock() {
    let store = Arc::new(InMemoryLockStore::new());
    let source = Arc::new(FakeSource {
        items: vec![item("7", None, 1)],
        ..Default::default()
    });
    let trigger = Arc::new(FakeTrigger {
        fails: true,
        ..Default::default()
    });

    let result = poller(source.clone(), trigger, store.clone()).poll().await;

    assert!(result.lock_acquired);
    assert!(!result.build_triggered);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("CodeBuild error"));
    assert!(store.get(PROCESSOR_LOCK_KEY).await.is_none());
    assert!(source.marked.lock().unwrap().is_empty());

    let again = WorkLockManager::new(store)
        .acquire("8", "pending", Environment::Test)
        .await
        .unwrap();
    assert!(again.acquired);
}

#[tokio::test]
async fn older_of_equal_priorities_is_selected() {
    let store = Arc::new(InMemoryLockStore::new());
    let source = Arc::new(FakeSource {
        items: vec![item("a", Some(1), 1), item("b", Some(2), 10), item("c", Some(2), 3)],
        ..Default::default()
    });

    let result = poller(source, Arc::new(FakeTrigger::default()), store).poll().await;

    assert_eq!(result.work_items_found, 3);
    assert_eq!(result.selected_item.map(|i| i.id), Some("c".to_string()));
}

#[tokio::test]
async fn held_lock_is_not_an_error() {
    let store = Arc::new(InMemoryLockStore::new());
    let holder = WorkLockManager::new(store.clone())
        .acquire("other", "build-9", Environment::Test)
        .await
        .unwrap();
    assert!(holder.acquired);

    let source = Arc::new(FakeSource {
        items: vec![item("7", None, 1)],
        ..Default::default()
    });
    let trigger = Arc::new(FakeTrigger::default());
    let result = poller(source, trigger.clone(), store.clone()).poll().await;

    assert_eq!(result.work_items_found, 1);
    assert!(!result.lock_acquired);
    assert!(!result.build_triggered);
    assert!(result.errors.is_empty());
    assert!(trigger.requests.lock().unwrap().is_empty());
    assert_eq!(store.get(PROCESSOR_LOCK_KEY).await.unwrap().work_item_id, "other");
}

#[tokio::test]
async fn mark_failure_keeps_the_lock() {
    let store = Arc::new(InMemoryLockStore::new());
    let source = Arc::new(FakeSource {
        items: vec![item("7", None, 1)],
        mark_fails: true,
        ..Default::default()
    });

    let result = poller(source, Arc::new(FakeTrigger::default()), store.clone())
        .poll()
        .await;

    assert!(result.build_triggered);
    assert!(result.errors.is_empty());
    assert!(store.get(PROCESSOR_LOCK_KEY).await.is_some());
}

// ---------------------------------------------------------------------------
// Failures recorded as data
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_failure_is_recorded() {
    let source = Arc::new(FakeSource {
        fetch_fails: true,
        ..Default::default()
    });
    let result = poller(
        source,
        Arc::new(FakeTrigger::default()),
        Arc::new(InMemoryLockStore::new()),
    )
    .poll()
    .await;

    assert_eq!(result.work_items_found, 0);
    assert_eq!(result.errors, vec!["Work item source unavailable: board offline".to_string()]);
}

#[tokio::test]
async fn missing_pull_request_skips_the_lock() {
    let store = Arc::new(InMemoryLockStore::new());
    let trigger = Arc::new(FakeTrigger::default());
    let source = Arc::new(FakeSource {
        items: vec![item("7", None, 1)],
        without_pull_request: vec!["feature-7".into()],
        ..Default::default()
    });

    let result = poller(source, trigger.clone(), store.clone()).poll().await;

    assert_eq!(result.work_items_found, 1);
    assert!(!result.lock_acquired);
    assert!(result.selected_item.is_none());
    assert!(result.errors.is_empty());
    assert!(trigger.requests.lock().unwrap().is_empty());
    assert!(store.get(PROCESSOR_LOCK_KEY).await.is_none());
}

#[tokio::test]
async fn item_without_pull_request_does_not_block_the_queue() {
    let store = Arc::new(InMemoryLockStore::new());
    let trigger = Arc::new(FakeTrigger::default());
    let source = Arc::new(FakeSource {
        items: vec![item("nopr", Some(9), 1), item("ok", Some(1), 2)],
        without_pull_request: vec!["feature-nopr".into()],
        ..Default::default()
    });

    let result = poller(source.clone(), trigger.clone(), store.clone()).poll().await;

    assert_eq!(result.work_items_found, 2);
    assert!(result.lock_acquired);
    assert!(result.build_triggered);
    assert!(result.errors.is_empty());
    assert_eq!(result.selected_item.map(|i| i.id), Some("ok".to_string()));

    let requests = trigger.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].branch_name, "feature-ok");
    assert_eq!(*source.marked.lock().unwrap(), vec!["ok".to_string()]);

    let lock = store.get(PROCESSOR_LOCK_KEY).await.unwrap();
    assert_eq!(lock.work_item_id, "ok");
}

#[tokio::test]
async fn pull_request_lookup_failure_is_recorded() {
    let store = Arc::new(InMemoryLockStore::new());
    let source = Arc::new(FakeSource {
        items: vec![item("7", None, 1)],
        pr_lookup_fails: true,
        ..Default::default()
    });

    let result = poller(source, Arc::new(FakeTrigger::default()), store.clone())
        .poll()
        .await;

    assert!(!result.lock_acquired);
    assert_eq!(result.errors, vec!["Work item source unavailable: pulls API down".to_string()]);
    assert!(store.get(PROCESSOR_LOCK_KEY).await.is_none());
}

#[tokio::test]
async fn store_failure_is_recorded() {
    let source = Arc::new(FakeSource {
        items: vec![item("7", None, 1)],
        ..Default::default()
    });
    let trigger = Arc::new(FakeTrigger::default());
    let result = poller(source, trigger.clone(), Arc::new(BrokenStore)).poll().await;

    assert!(!result.lock_acquired);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("access denied"));
    assert!(trigger.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stale_locks_surface_as_failed_items() {
    let store = Arc::new(InMemoryLockStore::new());
    let now = Utc::now();
    let mut record = LockRecord::new(
        PROCESSOR_LOCK_KEY,
        "5",
        "build-5",
        Environment::Test,
        now - Duration::hours(3),
        Duration::hours(2),
    );
    record.expires_at = now - Duration::hours(1);
    store.insert(record).await;

    let stale = poller(
        Arc::new(FakeSource::default()),
        Arc::new(FakeTrigger::default()),
        store,
    )
    .detect_stale()
    .await
    .unwrap();

    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, "5");
    assert_eq!(stale[0].status, "failed");
}
