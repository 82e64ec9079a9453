//! Starting a pipeline run on the build service.

use async_trait::async_trait;
use aws_sdk_codebuild::error::DisplayErrorContext;
use aws_sdk_codebuild::types::{EnvironmentVariable, EnvironmentVariableType};
use kiro_core::types::Environment;

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("CodeBuild error: {0}")]
    Request(String),

    #[error("CodeBuild returned no build for project {0}")]
    MissingBuild(String),
}

/// Parameters handed to the pipeline run as environment overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerRequest {
    pub branch_name: String,
    pub spec_path: String,
    pub environment: Environment,
    pub work_item_id: String,
    /// Token of the lock held for this run, so the run can release it.
    pub lock_token: Option<String>,
}

impl TriggerRequest {
    pub fn env_overrides(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            ("BRANCH_NAME", self.branch_name.clone()),
            ("SPEC_PATH", self.spec_path.clone()),
            ("ENVIRONMENT", self.environment.as_str().to_string()),
            ("WORK_ITEM_ID", self.work_item_id.clone()),
        ];
        if let Some(token) = &self.lock_token {
            vars.push(("LOCK_TOKEN", token.clone()));
        }
        vars
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerResponse {
    pub build_id: String,
    pub arn: Option<String>,
}

#[async_trait]
pub trait ExecutionTrigger: Send + Sync {
    async fn start(
        &self,
        project_name: &str,
        request: &TriggerRequest,
    ) -> Result<TriggerResponse, TriggerError>;
}

/// [`ExecutionTrigger`] backed by AWS CodeBuild `StartBuild`.
pub struct CodeBuildTrigger {
    client: aws_sdk_codebuild::Client,
}

impl CodeBuildTrigger {
    pub fn new(client: aws_sdk_codebuild::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExecutionTrigger for CodeBuildTrigger {
    async fn start(
        &self,
        project_name: &str,
        request: &TriggerRequest,
    ) -> Result<TriggerResponse, TriggerError> {
        let overrides = request
            .env_overrides()
            .into_iter()
            .map(|(name, value)| {
                EnvironmentVariable::builder()
                    .name(name)
                    .value(value)
                    .r#type(EnvironmentVariableType::Plaintext)
                    .build()
                    .map_err(|e| TriggerError::Request(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .start_build()
            .project_name(project_name)
            .source_version(&request.branch_name)
            .set_environment_variables_override(Some(overrides))
            .send()
            .await
            .map_err(|e| TriggerError::Request(DisplayErrorContext(&e).to_string()))?;

        let build = output
            .build_value()
            .ok_or_else(|| TriggerError::MissingBuild(project_name.to_string()))?;
        let build_id = build
            .id()
            .ok_or_else(|| TriggerError::MissingBuild(project_name.to_string()))?
            .to_string();

        tracing::info!(
            project = %project_name,
            build_id = %build_id,
            branch = %request.branch_name,
            "Started CodeBuild run"
        );

        Ok(TriggerResponse {
            build_id,
            arn: build.arn().map(str::to_string),
        })
    }
}
