//! Upload of the pipeline result record to S3.

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use kiro_core::pipeline::PipelineExecutionResult;
use kiro_core::types::Environment;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Failed to serialize pipeline result: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Artifact upload failed: {0}")]
    Upload(String),
}

/// Object key for a run's result record: `{env}/{execution_id}/result.json`.
pub fn artifact_key(environment: Environment, execution_id: &str) -> String {
    format!("{}/{execution_id}/result.json", environment.as_str())
}

pub struct S3ArtifactStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ArtifactStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Returns the `s3://` URI of the uploaded object.
    pub async fn upload_result(&self, result: &PipelineExecutionResult) -> Result<String, ArtifactError> {
        let key = artifact_key(result.environment, &result.execution_id);
        let body = serde_json::to_vec_pretty(result)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| ArtifactError::Upload(DisplayErrorContext(&e).to_string()))?;

        let uri = format!("s3://{}/{key}", self.bucket);
        tracing::info!(uri = %uri, "Uploaded pipeline result");
        Ok(uri)
    }
}
