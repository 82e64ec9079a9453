//! Work lock acquisition, release, and stale-lock detection.
//!
//! [`WorkLockManager`] holds no mutable state of its own; all mutual
//! exclusion comes from the store's conditional write, so a manager can be
//! constructed per call and shared freely across tasks.

use std::sync::Arc;

use chrono::{Duration, Utc};
use kiro_core::error::ErrorCategory;
use kiro_core::lock::{
    LockRecord, LockResult, DEFAULT_LOCK_TTL_SECS, LOCK_HELD_REASON, PROCESSOR_LOCK_KEY,
};
use kiro_core::types::Environment;
use kiro_core::work_item::WorkItem;

use crate::store::{LockStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Store-level failure while acquiring. "Already held" is never this.
    #[error("Failed to acquire work lock: {source}")]
    Acquisition {
        #[source]
        source: StoreError,
    },

    #[error("Failed to query stale locks: {source}")]
    StaleQuery {
        #[source]
        source: StoreError,
    },
}

impl LockError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::LockAcquisition
    }
}

pub struct WorkLockManager {
    store: Arc<dyn LockStore>,
    lock_key: String,
    ttl: Duration,
}

impl WorkLockManager {
    /// Manager over `store` using the global processor key and a 2-hour TTL.
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            store,
            lock_key: PROCESSOR_LOCK_KEY.to_string(),
            ttl: Duration::seconds(DEFAULT_LOCK_TTL_SECS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Try to take the processor lock for `work_item_id`.
    ///
    /// Losing the race returns `Ok` with `acquired == false`.
    pub async fn acquire(
        &self,
        work_item_id: &str,
        execution_id: &str,
        environment: Environment,
    ) -> Result<LockResult, LockError> {
        let now = Utc::now();
        let record = LockRecord::new(
            &self.lock_key,
            work_item_id,
            execution_id,
            environment,
            now,
            self.ttl,
        );

        match self.store.put_if_absent_or_expired(&record, now).await {
            Ok(()) => {
                tracing::info!(
                    work_item_id,
                    execution_id,
                    %environment,
                    expires_at = %record.expires_at,
                    "Work lock acquired",
                );
                Ok(LockResult::acquired(&record))
            }
            Err(StoreError::ConditionFailed) => {
                tracing::info!(work_item_id, "Work lock already held by another process");
                Ok(LockResult::denied(record.expires_at, LOCK_HELD_REASON))
            }
            Err(source) => {
                tracing::error!(work_item_id, error = %source, "Work lock acquisition failed");
                Err(LockError::Acquisition { source })
            }
        }
    }

    /// Release a lock previously returned by [`acquire`](Self::acquire).
    ///
    /// Never fails: the lock expires through its TTL regardless.
    pub async fn release(&self, lock_token: &str) {
        match self
            .store
            .delete_if_token_matches(&self.lock_key, lock_token)
            .await
        {
            Ok(()) => tracing::info!("Work lock released"),
            Err(StoreError::ConditionFailed) => {
                tracing::info!("Work lock not released: token mismatch or lock already gone");
            }
            Err(e) => {
                tracing::error!(error = %e, "Work lock release failed; lock will expire via TTL");
            }
        }
    }

    /// Locks whose holder crashed: expired while still `in_progress`.
    pub async fn detect_stale(&self) -> Result<Vec<WorkItem>, LockError> {
        let records = self
            .store
            .query_expired_in_progress(&self.lock_key, Utc::now())
            .await
            .map_err(|source| LockError::StaleQuery { source })?;

        for record in &records {
            tracing::warn!(
                work_item_id = %record.work_item_id,
                build_id = %record.build_id,
                expired_at = %record.expires_at,
                "Stale work lock detected",
            );
        }

        Ok(records.iter().map(LockRecord::to_stale_work_item).collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
