//! Lock store abstraction.
//!
//! A [`LockStore`] provides the three primitives the lock manager needs.
//! Atomicity of acquisition is entirely the store's responsibility: the
//! conditional put must be a single compare-and-set on the backing store.

use async_trait::async_trait;
use kiro_core::lock::LockRecord;
use kiro_core::types::Timestamp;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The write condition did not hold. This is an expected outcome.
    #[error("Conditional check failed")]
    ConditionFailed,

    /// Connectivity, permission, throttling, or any other backend failure.
    #[error("Lock store request failed: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A stored item could not be decoded into a [`LockRecord`].
    #[error("Malformed lock record: {0}")]
    Malformed(String),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    pub fn backend_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Key-value store with conditional-write semantics.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Write `record` only if no record exists under its key or the existing
    /// record's `expires_at` is before `now`.
    async fn put_if_absent_or_expired(
        &self,
        record: &LockRecord,
        now: Timestamp,
    ) -> Result<(), StoreError>;

    /// Delete the record under `lock_key` only if its token equals `lock_token`.
    async fn delete_if_token_matches(&self, lock_key: &str, lock_token: &str)
        -> Result<(), StoreError>;

    /// Records under `lock_key` that expired before `now` while still
    /// `in_progress`.
    async fn query_expired_in_progress(
        &self,
        lock_key: &str,
        now: Timestamp,
    ) -> Result<Vec<LockRecord>, StoreError>;
}
