//! GitHub client: project board as work item source, pull requests as the
//! report target.
//!
//! Board items come from the Projects v2 GraphQL API. Each item's `Status`
//! single-select, numeric `Priority`, and `Branch` text fields are mapped
//! onto a [`WorkItem`]; the linked issue number becomes the item id. Label
//! and pull request operations use the REST API.

use std::time::Duration;

use async_trait::async_trait;
use kiro_core::types::Timestamp;
use kiro_core::work_item::WorkItem;
use kiro_pipeline::{PullRequest, PullRequestError, PullRequestTarget};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::GitHubConfig;
use crate::source::{SourceError, WorkItemSource};

/// Label applied to an issue once a build has been triggered for it.
pub const IN_PROGRESS_LABEL: &str = "in-progress";

const STATUS_FIELD: &str = "Status";
const PRIORITY_FIELD: &str = "Priority";
const BRANCH_FIELD: &str = "Branch";

const PAGE_SIZE: u32 = 100;
/// Upper bound on board pages fetched per poll.
const MAX_PAGES: usize = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const API_VERSION: &str = "2022-11-28";

const PROJECT_ITEMS_QUERY: &str = r#"
query($owner: String!, $number: Int!, $first: Int!, $after: String) {
  repositoryOwner(login: $owner) {
    ... on ProjectV2Owner {
      projectV2(number: $number) {
        items(first: $first, after: $after) {
          pageInfo { hasNextPage endCursor }
          nodes {
            createdAt
            content {
              ... on Issue { number title body }
              ... on PullRequest { number title body }
            }
            fieldValues(first: 20) {
              nodes {
                ... on ProjectV2ItemFieldSingleSelectValue { name field { ... on ProjectV2FieldCommon { name } } }
                ... on ProjectV2ItemFieldTextValue { text field { ... on ProjectV2FieldCommon { name } } }
                ... on ProjectV2ItemFieldNumberValue { number field { ... on ProjectV2FieldCommon { name } } }
              }
            }
          }
        }
      }
    }
  }
}
"#;

#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("GitHub request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("GitHub API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("GitHub GraphQL error: {0}")]
    GraphQl(String),
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphQlMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectItemsData {
    repository_owner: Option<ProjectOwner>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectOwner {
    project_v2: Option<Project>,
}

#[derive(Debug, Deserialize)]
struct Project {
    items: Connection<ProjectItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection<T> {
    #[serde(default)]
    page_info: Option<PageInfo>,
    #[serde(default = "Vec::new")]
    nodes: Vec<Option<T>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectItem {
    created_at: Timestamp,
    content: Option<ItemContent>,
    field_values: Connection<FieldValue>,
}

#[derive(Debug, Default, Deserialize)]
struct ItemContent {
    number: Option<u64>,
    title: Option<String>,
    body: Option<String>,
}

/// Union of the field value shapes requested; unrequested types arrive as `{}`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FieldValue {
    field: Option<FieldName>,
    name: Option<String>,
    text: Option<String>,
    number: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FieldName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PullSummary {
    number: u64,
    html_url: String,
}

// ---------------------------------------------------------------------------
// Item mapping
// ---------------------------------------------------------------------------

impl ProjectItem {
    fn field(&self, name: &str) -> Option<&FieldValue> {
        self.field_values
            .nodes
            .iter()
            .flatten()
            .find(|v| v.field.as_ref().is_some_and(|f| f.name.eq_ignore_ascii_case(name)))
    }

    fn field_text(&self, name: &str) -> Option<String> {
        let value = self.field(name)?;
        value
            .name
            .clone()
            .or_else(|| value.text.clone())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn priority(&self) -> Option<i64> {
        let value = self.field(PRIORITY_FIELD)?;
        if let Some(n) = value.number {
            return Some(n as i64);
        }
        value
            .text
            .as_deref()
            .or(value.name.as_deref())
            .and_then(|s| s.trim().parse().ok())
    }

    /// `None` when the item is not in `status` or lacks an issue number or
    /// branch.
    fn into_work_item(self, status: &str) -> Option<WorkItem> {
        let item_status = self.field_text(STATUS_FIELD)?;
        if !item_status.eq_ignore_ascii_case(status) {
            return None;
        }

        let content = self.content.as_ref()?;
        let number = content.number?;
        let Some(branch_name) = self.field_text(BRANCH_FIELD) else {
            tracing::warn!(issue = number, "Ready item has no Branch field, skipping");
            return None;
        };

        Some(WorkItem {
            id: number.to_string(),
            title: content.title.clone().unwrap_or_default(),
            description: content.body.clone().unwrap_or_default(),
            branch_name,
            status: item_status,
            created_at: self.created_at,
            priority: self.priority(),
        })
    }
}

fn map_items(items: Vec<Option<ProjectItem>>, status: &str) -> Vec<WorkItem> {
    items
        .into_iter()
        .flatten()
        .filter_map(|item| item.into_work_item(status))
        .collect()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GitHubClient {
    client: reqwest::Client,
    config: GitHubConfig,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Result<Self, GitHubError> {
        let client = reqwest::Client::builder()
            .user_agent("kiro-worker")
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.config.api_url))
            .bearer_auth(&self.config.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    fn repo_path(&self) -> String {
        format!("/repos/{}/{}", self.config.owner, self.config.repo)
    }

    async fn fetch_items_page(
        &self,
        after: Option<&str>,
    ) -> Result<Connection<ProjectItem>, GitHubError> {
        let body = serde_json::json!({
            "query": PROJECT_ITEMS_QUERY,
            "variables": {
                "owner": self.config.owner,
                "number": self.config.project_number,
                "first": PAGE_SIZE,
                "after": after,
            },
        });

        let response = self
            .request(reqwest::Method::POST, "/graphql")
            .json(&body)
            .send()
            .await?;
        let parsed: GraphQlResponse<ProjectItemsData> = Self::parse_response(response).await?;

        if !parsed.errors.is_empty() {
            let messages: Vec<String> = parsed.errors.into_iter().map(|e| e.message).collect();
            return Err(GitHubError::GraphQl(messages.join("; ")));
        }

        parsed
            .data
            .and_then(|d| d.repository_owner)
            .and_then(|o| o.project_v2)
            .map(|p| p.items)
            .ok_or_else(|| {
                GitHubError::GraphQl(format!(
                    "project {} not found for owner {}",
                    self.config.project_number, self.config.owner
                ))
            })
    }

    pub async fn find_pull_request(&self, branch: &str) -> Result<Option<PullRequest>, GitHubError> {
        let head = format!("{}:{branch}", self.config.owner);
        let response = self
            .request(reqwest::Method::GET, &format!("{}/pulls", self.repo_path()))
            .query(&[("state", "open"), ("head", head.as_str()), ("per_page", "1")])
            .send()
            .await?;
        let pulls: Vec<PullSummary> = Self::parse_response(response).await?;

        Ok(pulls.into_iter().next().map(|p| PullRequest {
            number: p.number,
            url: p.html_url,
        }))
    }

    // ---- private helpers ----

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GitHubError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GitHubError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GitHubError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl WorkItemSource for GitHubClient {
    async fn fetch_ready_items(&self, status: &str) -> Result<Vec<WorkItem>, SourceError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self.fetch_items_page(cursor.as_deref()).await?;
            items.extend(map_items(page.nodes, status));

            match page.page_info {
                Some(PageInfo {
                    has_next_page: true,
                    end_cursor: Some(next),
                }) => cursor = Some(next),
                _ => break,
            }
        }

        tracing::debug!(status, count = items.len(), "Fetched project items");
        Ok(items)
    }

    async fn verify_pull_request_open(&self, branch: &str) -> Result<bool, SourceError> {
        Ok(self.find_pull_request(branch).await?.is_some())
    }

    async fn mark_in_progress(&self, item: &WorkItem) -> Result<(), SourceError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("{}/issues/{}/labels", self.repo_path(), item.id),
            )
            .json(&serde_json::json!({ "labels": [IN_PROGRESS_LABEL] }))
            .send()
            .await
            .map_err(GitHubError::from)?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}

fn pull_request_error(err: GitHubError) -> PullRequestError {
    PullRequestError::Request(err.to_string())
}

#[async_trait]
impl PullRequestTarget for GitHubClient {
    async fn find_open_pull_request(
        &self,
        branch: &str,
    ) -> Result<Option<PullRequest>, PullRequestError> {
        self.find_pull_request(branch).await.map_err(pull_request_error)
    }

    async fn update_pull_request_body(&self, number: u64, body: &str) -> Result<(), PullRequestError> {
        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("{}/pulls/{number}", self.repo_path()),
            )
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(|e| pull_request_error(e.into()))?;

        match Self::ensure_success(response).await {
            Ok(_) => Ok(()),
            Err(GitHubError::Api { status, body }) if status == 403 || status == 422 => {
                Err(PullRequestError::Rejected {
                    number,
                    reason: format!("HTTP {status}: {body}"),
                })
            }
            Err(e) => Err(pull_request_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(json: serde_json::Value) -> Vec<Option<ProjectItem>> {
        serde_json::from_value(json).expect("valid fixture")
    }

    fn node(number: u64, status: &str, branch: Option<&str>, priority: Option<f64>) -> serde_json::Value {
        let mut fields = vec![
            serde_json::json!({ "name": status, "field": { "name": "Status" } }),
            serde_json::json!({}),
        ];
        if let Some(branch) = branch {
            fields.push(serde_json::json!({ "text": branch, "field": { "name": "Branch" } }));
        }
        if let Some(p) = priority {
            fields.push(serde_json::json!({ "number": p, "field": { "name": "Priority" } }));
        }
        serde_json::json!({
            "createdAt": "2024-05-01T10:00:00Z",
            "content": { "number": number, "title": format!("Issue {number}"), "body": "details" },
            "fieldValues": { "nodes": fields },
        })
    }

    #[test]
    fn maps_ready_items_with_branch_and_priority() {
        let nodes = items(serde_json::json!([
            node(1, "Ready", Some("feature-a"), Some(3.0)),
            node(2, "In Progress", Some("feature-b"), None),
            node(3, "Ready", None, None),
            node(4, "ready", Some("feature-d"), None),
            null,
        ]));

        let mapped = map_items(nodes, "Ready");
        let ids: Vec<&str> = mapped.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "4"]);
        assert_eq!(mapped[0].branch_name, "feature-a");
        assert_eq!(mapped[0].priority, Some(3));
        assert_eq!(mapped[0].title, "Issue 1");
        assert_eq!(mapped[1].priority, None);
    }

    #[test]
    fn draft_items_without_issue_number_are_skipped() {
        let nodes = items(serde_json::json!([{
            "createdAt": "2024-05-01T10:00:00Z",
            "content": { "title": "Draft" },
            "fieldValues": { "nodes": [
                { "name": "Ready", "field": { "name": "Status" } },
                { "text": "feature-x", "field": { "name": "Branch" } }
            ] }
        }]));
        assert!(map_items(nodes, "Ready").is_empty());
    }

    #[test]
    fn textual_priority_is_parsed() {
        let nodes = items(serde_json::json!([{
            "createdAt": "2024-05-01T10:00:00Z",
            "content": { "number": 9 },
            "fieldValues": { "nodes": [
                { "name": "Ready", "field": { "name": "Status" } },
                { "text": "feature-x", "field": { "name": "Branch" } },
                { "text": " 5 ", "field": { "name": "priority" } }
            ] }
        }]));
        assert_eq!(map_items(nodes, "Ready")[0].priority, Some(5));
    }

    #[test]
    fn graphql_errors_deserialize() {
        let parsed: GraphQlResponse<ProjectItemsData> = serde_json::from_value(serde_json::json!({
            "data": null,
            "errors": [{ "message": "Could not resolve to a ProjectV2" }]
        }))
        .expect("valid");
        assert!(parsed.data.is_none());
        assert_eq!(parsed.errors[0].message, "Could not resolve to a ProjectV2");
    }
}
