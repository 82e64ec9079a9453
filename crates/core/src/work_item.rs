//! Work items and candidate ranking.
//!
//! A [`WorkItem`] is produced by the work-item source and never mutated
//! afterwards. [`rank_work_items`] orders a candidate set so that the first
//! element is the one a poller should try to lock.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Status label assigned to synthetic items built from stale locks.
pub const STATUS_FAILED: &str = "failed";

/// Root directory for per-branch spec folders inside a target repository.
pub const SPECS_ROOT: &str = ".kiro/specs";

/// A unit of work fetched from the project board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub branch_name: String,
    pub status: String,
    pub created_at: Timestamp,
    /// Higher values are more urgent. Items without a priority rank last.
    pub priority: Option<i64>,
}

impl WorkItem {
    /// Spec folder for this item's branch, e.g. `.kiro/specs/feature-x`.
    pub fn spec_path(&self) -> String {
        spec_path_for_branch(&self.branch_name)
    }
}

/// Derive the spec folder path passed to the build for a branch.
pub fn spec_path_for_branch(branch_name: &str) -> String {
    format!("{SPECS_ROOT}/{branch_name}")
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Total order used to pick the next item to work on.
///
/// 1. When both items have a priority, higher priority first.
/// 2. An item with a priority beats one without.
/// 3. Otherwise (equal or both absent), older `created_at` first.
/// 4. Ties on everything fall back to `id` so the order is strict.
pub fn compare_work_items(a: &WorkItem, b: &WorkItem) -> Ordering {
    let by_priority = match (a.priority, b.priority) {
        (Some(pa), Some(pb)) => pb.cmp(&pa),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_priority
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort candidates in place so the preferred item comes first.
pub fn rank_work_items(items: &mut [WorkItem]) {
    items.sort_by(compare_work_items);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
