//! Pull request lookup and body updates.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum PullRequestError {
    #[error("Pull request API request failed: {0}")]
    Request(String),

    #[error("Pull request #{number} update rejected: {reason}")]
    Rejected { number: u64, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}

/// Where the pipeline report is published.
#[async_trait]
pub trait PullRequestTarget: Send + Sync {
    /// The open pull request whose head is `branch`, if any.
    async fn find_open_pull_request(
        &self,
        branch: &str,
    ) -> Result<Option<PullRequest>, PullRequestError>;

    /// Replace the body of pull request `number`.
    async fn update_pull_request_body(&self, number: u64, body: &str)
        -> Result<(), PullRequestError>;
}
