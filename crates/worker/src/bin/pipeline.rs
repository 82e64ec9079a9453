use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use kiro_core::pipeline::PipelineExecutionResult;
use kiro_lock::WorkLockManager;
use kiro_pipeline::{GitRunner, PipelineOrchestrator, ProcessExecutor, ResourceTracker, ShellTestRunner};
use kiro_worker::config::{log_format_from_env, PipelineRunConfig};
use kiro_worker::shutdown::spawn_shutdown_listener;
use kiro_worker::{load_aws_config, telemetry, GitHubClient, S3ArtifactStore};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    telemetry::init(log_format_from_env());

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            let message = format!("{e:#}");
            tracing::error!(error = %message, "Pipeline could not start");
            ExitCode::FAILURE
        }
    }
}

/// `Ok(success)` once the pipeline ran; `Err` only for setup failures.
async fn run() -> anyhow::Result<bool> {
    let config = PipelineRunConfig::from_env().context("Invalid pipeline configuration")?;
    let pipeline = config.pipeline.clone();
    tracing::info!(
        execution_id = %pipeline.execution_id,
        environment = %pipeline.environment,
        branch = %pipeline.branch_name,
        spec_path = %pipeline.spec_path,
        repo_dir = %pipeline.repo_dir.display(),
        "Loaded pipeline configuration"
    );

    let sdk_config = load_aws_config().await;
    let shutdown = spawn_shutdown_listener();
    let resources = Arc::new(ResourceTracker::new());

    let executor = ProcessExecutor::new(&config.kiro_cli_path, &pipeline.repo_dir)
        .with_resource_tracker(Arc::clone(&resources))
        .with_shutdown(shutdown.clone())
        .with_output_mirroring(true);
    let github = GitHubClient::new(config.github.clone()).context("Failed to build GitHub client")?;

    let orchestrator = PipelineOrchestrator::new(
        pipeline.clone(),
        Arc::new(GitRunner::new(&pipeline.repo_dir)),
        Arc::new(executor),
        Arc::new(ShellTestRunner),
        Arc::new(github),
    )
    .with_resource_tracker(resources);

    let result = match orchestrator.execute().await {
        Ok(result) => result,
        Err(failure) => {
            tracing::error!(category = %failure.category(), "Pipeline halted");
            *failure.result
        }
    };

    print_summary(&result);

    if let Some(bucket) = &config.artifacts_bucket {
        let store = S3ArtifactStore::new(aws_sdk_s3::Client::new(&sdk_config), bucket);
        if let Err(e) = store.upload_result(&result).await {
            tracing::warn!(error = %e, "Failed to upload pipeline result");
        }
    }

    if let Some(token) = &config.lock_token {
        let store = config.lock.store.build(&config.lock.table_name, &sdk_config);
        WorkLockManager::new(store)
            .with_ttl(config.lock.ttl)
            .release(token)
            .await;
    }

    if shutdown.is_cancelled() {
        tracing::warn!("Pipeline interrupted by shutdown signal");
    }

    Ok(result.success)
}

fn print_summary(result: &PipelineExecutionResult) {
    println!(
        "Pipeline {} for {} ({}ms)",
        if result.success { "succeeded" } else { "failed" },
        result.branch_name,
        result.duration_ms
    );
    for line in result.phase_summary() {
        println!("  {line}");
    }
    for error in &result.errors {
        println!("  error: {error}");
    }
    if let Some(url) = &result.artifacts.pr_url {
        println!("  pull request: {url}");
    }
}
