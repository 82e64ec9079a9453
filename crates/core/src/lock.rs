//! Distributed lock record types shared by the lock store and its callers.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{Environment, Timestamp};
use crate::work_item::{WorkItem, STATUS_FAILED};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// The single partition key holding "the one process allowed to work now".
pub const PROCESSOR_LOCK_KEY: &str = "processor-lock";

/// Default lock time-to-live in seconds (2 hours).
pub const DEFAULT_LOCK_TTL_SECS: i64 = 2 * 60 * 60;

/// Placeholder build id used before the real execution id is known.
pub const PENDING_EXECUTION_ID: &str = "pending";

/// Denial reason returned when another holder owns an unexpired lock.
pub const LOCK_HELD_REASON: &str = "Lock already held by another process";

// ---------------------------------------------------------------------------
// LockStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    InProgress,
    Complete,
    Failed,
}

impl LockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for LockStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            _ => Err(CoreError::Parse(format!("Invalid lock status: '{s}'"))),
        }
    }
}

impl std::fmt::Display for LockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// LockRecord
// ---------------------------------------------------------------------------

/// The persisted lock row.
///
/// At most one unexpired record exists per `lock_key`; the store's
/// conditional write is what guarantees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub lock_key: String,
    pub lock_token: String,
    pub work_item_id: String,
    pub build_id: String,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
    pub status: LockStatus,
    pub environment: Environment,
}

impl LockRecord {
    /// Build a fresh in-progress record with a newly generated token.
    pub fn new(
        lock_key: impl Into<String>,
        work_item_id: impl Into<String>,
        build_id: impl Into<String>,
        environment: Environment,
        now: Timestamp,
        ttl: Duration,
    ) -> Self {
        Self {
            lock_key: lock_key.into(),
            lock_token: new_lock_token(),
            work_item_id: work_item_id.into(),
            build_id: build_id.into(),
            acquired_at: now,
            expires_at: now + ttl,
            status: LockStatus::InProgress,
            environment,
        }
    }

    /// Whether the record's expiry is strictly before `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at < now
    }

    /// Whether the holder appears to have crashed: expired but never
    /// moved out of `in_progress`.
    pub fn is_stale(&self, now: Timestamp) -> bool {
        self.is_expired(now) && self.status == LockStatus::InProgress
    }

    /// Convert a stale record into a synthetic failed work item.
    pub fn to_stale_work_item(&self) -> WorkItem {
        WorkItem {
            id: self.work_item_id.clone(),
            title: format!("Stale lock for work item {}", self.work_item_id),
            description: format!(
                "Lock held by build {} in {} expired at {} without being released",
                self.build_id,
                self.environment,
                self.expires_at.to_rfc3339(),
            ),
            branch_name: String::new(),
            status: STATUS_FAILED.to_string(),
            created_at: self.acquired_at,
            priority: None,
        }
    }
}

/// Generate a random 128-bit lock token formatted as a UUID v4 string.
pub fn new_lock_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// LockResult
// ---------------------------------------------------------------------------

/// Outcome of a single acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockResult {
    pub acquired: bool,
    /// Empty when `acquired` is false.
    pub lock_token: String,
    pub expires_at: Timestamp,
    pub reason: Option<String>,
}

impl LockResult {
    pub fn acquired(record: &LockRecord) -> Self {
        Self {
            acquired: true,
            lock_token: record.lock_token.clone(),
            expires_at: record.expires_at,
            reason: None,
        }
    }

    pub fn denied(expires_at: Timestamp, reason: impl Into<String>) -> Self {
        Self {
            acquired: false,
            lock_token: String::new(),
            expires_at,
            reason: Some(reason.into()),
        }
    }
}
