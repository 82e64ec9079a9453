//! Work item source abstraction.

use async_trait::async_trait;
use kiro_core::work_item::WorkItem;

use crate::github::GitHubError;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error("Work item source unavailable: {0}")]
    Unavailable(String),
}

/// Where candidate work items come from.
#[async_trait]
pub trait WorkItemSource: Send + Sync {
    /// Items whose board status equals `status`, unordered.
    async fn fetch_ready_items(&self, status: &str) -> Result<Vec<WorkItem>, SourceError>;

    /// Whether `branch` has an open pull request.
    async fn verify_pull_request_open(&self, branch: &str) -> Result<bool, SourceError>;

    /// Flag the item as picked up so other tooling stops offering it.
    async fn mark_in_progress(&self, item: &WorkItem) -> Result<(), SourceError>;
}
