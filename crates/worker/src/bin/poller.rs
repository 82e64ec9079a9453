use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use kiro_lock::WorkLockManager;
use kiro_worker::config::{log_format_from_env, WorkerConfig};
use kiro_worker::{
    load_aws_config, telemetry, CodeBuildTrigger, GitHubClient, PollerSettings, WorkItemPoller,
};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    telemetry::init(log_format_from_env());

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            let message = format!("{e:#}");
            tracing::error!(error = %message, "Poller failed");
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` when the poll recorded errors.
async fn run() -> anyhow::Result<bool> {
    let config = WorkerConfig::from_env().context("Invalid poller configuration")?;
    tracing::info!(
        environment = %config.environment,
        table = %config.lock.table_name,
        lock_store = config.lock.store.as_str(),
        project = %config.codebuild_project_name,
        target_status = %config.target_status,
        "Loaded poller configuration"
    );

    let sdk_config = load_aws_config().await;
    let store = config.lock.store.build(&config.lock.table_name, &sdk_config);
    let locks = WorkLockManager::new(store).with_ttl(config.lock.ttl);

    let github = GitHubClient::new(config.github.clone()).context("Failed to build GitHub client")?;
    let trigger = CodeBuildTrigger::new(aws_sdk_codebuild::Client::new(&sdk_config));

    let poller = WorkItemPoller::new(
        Arc::new(github),
        Arc::new(trigger),
        locks,
        PollerSettings {
            environment: config.environment,
            project_name: config.codebuild_project_name.clone(),
            target_status: config.target_status.clone(),
        },
    );

    let result = poller.poll().await;
    tracing::info!(
        work_items_found = result.work_items_found,
        lock_acquired = result.lock_acquired,
        build_triggered = result.build_triggered,
        work_item_id = result.selected_item.as_ref().map(|i| i.id.as_str()),
        build_id = result.build_id.as_deref(),
        errors = result.errors.len(),
        "Poll complete"
    );
    for error in &result.errors {
        tracing::error!(error = %error, "Poll error");
    }

    match poller.detect_stale().await {
        Ok(stale) => {
            for item in &stale {
                tracing::warn!(
                    work_item_id = %item.id,
                    status = %item.status,
                    "Stale work lock: holder stopped without releasing"
                );
            }
        }
        Err(e) => tracing::error!(error = %e, "Stale lock check failed"),
    }

    println!("{}", serde_json::to_string(&result)?);
    Ok(result.errors.is_empty())
}
