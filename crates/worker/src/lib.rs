//! Service wiring for the Kiro worker: configuration, the GitHub board and
//! pull request client, the CodeBuild trigger, S3 result upload, and the
//! work item poller.

pub mod artifacts;
pub mod config;
pub mod github;
pub mod poller;
pub mod shutdown;
pub mod source;
pub mod telemetry;
pub mod trigger;

pub use artifacts::{ArtifactError, S3ArtifactStore};
pub use config::{ConfigError, PipelineRunConfig, WorkerConfig};
pub use github::{GitHubClient, GitHubError};
pub use poller::{PollResult, PollerSettings, WorkItemPoller};
pub use source::{SourceError, WorkItemSource};
pub use trigger::{CodeBuildTrigger, ExecutionTrigger, TriggerError, TriggerRequest, TriggerResponse};

/// Load shared AWS configuration, honouring `AWS_REGION` when set.
pub async fn load_aws_config() -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .load()
        .await
}
