//! In-process [`LockStore`] with the same conditional semantics as the
//! DynamoDB table. Used for local runs (`LOCK_STORE=memory`) and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use kiro_core::lock::LockRecord;
use kiro_core::types::Timestamp;
use tokio::sync::Mutex;

use crate::store::{LockStore, StoreError};

#[derive(Default)]
pub struct InMemoryLockStore {
    records: Mutex<HashMap<String, LockRecord>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record unconditionally.
    pub async fn insert(&self, record: LockRecord) {
        self.records
            .lock()
            .await
            .insert(record.lock_key.clone(), record);
    }

    /// Current record under `lock_key`, expired or not.
    pub async fn get(&self, lock_key: &str) -> Option<LockRecord> {
        self.records.lock().await.get(lock_key).cloned()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn put_if_absent_or_expired(
        &self,
        record: &LockRecord,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records.get(&record.lock_key) {
            if !existing.is_expired(now) {
                return Err(StoreError::ConditionFailed);
            }
        }
        records.insert(record.lock_key.clone(), record.clone());
        Ok(())
    }

    async fn delete_if_token_matches(
        &self,
        lock_key: &str,
        lock_token: &str,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        match records.get(lock_key) {
            Some(existing) if existing.lock_token == lock_token => {
                records.remove(lock_key);
                Ok(())
            }
            _ => Err(StoreError::ConditionFailed),
        }
    }

    async fn query_expired_in_progress(
        &self,
        lock_key: &str,
        now: Timestamp,
    ) -> Result<Vec<LockRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .get(lock_key)
            .filter(|r| r.is_stale(now))
            .cloned()
            .into_iter()
            .collect())
    }
}
