//! One poll of the work board: fetch, rank, lock, trigger.
//!
//! A poll always resolves to a [`PollResult`]. Losing the lock race and an
//! empty board are ordinary outcomes; source, store, and trigger failures are
//! recorded in [`PollResult::errors`] instead of being returned.

use std::sync::Arc;

use kiro_core::lock::PENDING_EXECUTION_ID;
use kiro_core::sanitize::sanitize_error_message;
use kiro_core::types::Environment;
use kiro_core::work_item::{rank_work_items, WorkItem};
use kiro_lock::WorkLockManager;
use serde::Serialize;

use crate::source::WorkItemSource;
use crate::trigger::{ExecutionTrigger, TriggerRequest};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResult {
    pub work_items_found: usize,
    pub lock_acquired: bool,
    pub build_triggered: bool,
    pub selected_item: Option<WorkItem>,
    pub build_id: Option<String>,
    pub errors: Vec<String>,
}

impl PollResult {
    fn record_error(&mut self, message: impl AsRef<str>) {
        self.errors.push(sanitize_error_message(message.as_ref()));
    }
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub environment: Environment,
    /// Build project started for the selected item.
    pub project_name: String,
    /// Board status that marks an item as ready.
    pub target_status: String,
}

pub struct WorkItemPoller {
    source: Arc<dyn WorkItemSource>,
    trigger: Arc<dyn ExecutionTrigger>,
    locks: WorkLockManager,
    settings: PollerSettings,
}

impl WorkItemPoller {
    pub fn new(
        source: Arc<dyn WorkItemSource>,
        trigger: Arc<dyn ExecutionTrigger>,
        locks: WorkLockManager,
        settings: PollerSettings,
    ) -> Self {
        Self {
            source,
            trigger,
            locks,
            settings,
        }
    }

    pub async fn poll(&self) -> PollResult {
        let mut result = PollResult::default();

        let mut items = match self.source.fetch_ready_items(&self.settings.target_status).await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch work items");
                result.record_error(e.to_string());
                return result;
            }
        };

        result.work_items_found = items.len();
        if items.is_empty() {
            tracing::info!(status = %self.settings.target_status, "No work items ready");
            return result;
        }

        rank_work_items(&mut items);
        let Some(item) = self.first_with_open_pull_request(items, &mut result).await else {
            tracing::info!(
                candidates = result.work_items_found,
                "No ready work item has an open pull request",
            );
            return result;
        };
        tracing::info!(
            work_item_id = %item.id,
            branch = %item.branch_name,
            priority = ?item.priority,
            candidates = result.work_items_found,
            "Selected work item",
        );

        let lock = match self
            .locks
            .acquire(&item.id, PENDING_EXECUTION_ID, self.settings.environment)
            .await
        {
            Ok(lock) => lock,
            Err(e) => {
                result.record_error(e.to_string());
                return result;
            }
        };

        if !lock.acquired {
            return result;
        }
        result.lock_acquired = true;

        let request = TriggerRequest {
            branch_name: item.branch_name.clone(),
            spec_path: item.spec_path(),
            environment: self.settings.environment,
            work_item_id: item.id.clone(),
            lock_token: Some(lock.lock_token.clone()),
        };

        let response = match self.trigger.start(&self.settings.project_name, &request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(work_item_id = %item.id, error = %e, "Failed to trigger build");
                self.locks.release(&lock.lock_token).await;
                result.record_error(e.to_string());
                return result;
            }
        };

        result.build_triggered = true;
        result.build_id = Some(response.build_id);

        // The build is running either way, so the lock stays held.
        if let Err(e) = self.source.mark_in_progress(&item).await {
            tracing::warn!(work_item_id = %item.id, error = %e, "Failed to mark work item in progress");
        }

        result.selected_item = Some(item);
        result
    }

    /// First item, in ranked order, whose branch has an open pull request.
    ///
    /// Items without one are skipped so they cannot block the rest of the
    /// queue; lookup failures are recorded and the item skipped.
    async fn first_with_open_pull_request(
        &self,
        ranked: Vec<WorkItem>,
        result: &mut PollResult,
    ) -> Option<WorkItem> {
        for item in ranked {
            match self.source.verify_pull_request_open(&item.branch_name).await {
                Ok(true) => return Some(item),
                Ok(false) => {
                    tracing::warn!(
                        work_item_id = %item.id,
                        branch = %item.branch_name,
                        "Skipping work item without an open pull request",
                    );
                }
                Err(e) => {
                    tracing::error!(work_item_id = %item.id, error = %e, "Failed to check pull request");
                    result.record_error(e.to_string());
                }
            }
        }
        None
    }

    /// Work items whose lock expired while still in progress.
    pub async fn detect_stale(&self) -> Result<Vec<WorkItem>, kiro_lock::LockError> {
        self.locks.detect_stale().await
    }
}
