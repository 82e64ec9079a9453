//! Environment configuration for the poller and pipeline binaries.
//!
//! Both loaders take a lookup function so tests can supply variables without
//! touching the process environment; `from_env` wires in `std::env::var`.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use kiro_core::coverage::DEFAULT_COVERAGE_THRESHOLD;
use kiro_core::types::Environment;
use kiro_core::work_item::spec_path_for_branch;
use kiro_lock::{DynamoDbLockStore, InMemoryLockStore, LockStore};
use kiro_pipeline::orchestrator::{
    DEFAULT_COVERAGE_SUMMARY_PATH, DEFAULT_PIPELINE_TIMEOUT, DEFAULT_TEST_COMMAND,
};
use kiro_pipeline::PipelineConfig;

use crate::telemetry::LogFormat;

pub const DEFAULT_TARGET_STATUS: &str = "Ready";
pub const DEFAULT_LOCK_TTL_HOURS: i64 = 2;
pub const DEFAULT_KIRO_CLI_PATH: &str = "kiro-cli";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var}='{value}' is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Shared pieces
// ---------------------------------------------------------------------------

/// Which [`LockStore`] backs the work lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStoreKind {
    DynamoDb,
    /// Process-local; only meaningful for local runs.
    Memory,
}

impl LockStoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DynamoDb => "dynamodb",
            Self::Memory => "memory",
        }
    }

    pub fn build(&self, table_name: &str, sdk_config: &aws_config::SdkConfig) -> Arc<dyn LockStore> {
        match self {
            Self::DynamoDb => Arc::new(DynamoDbLockStore::new(
                aws_sdk_dynamodb::Client::new(sdk_config),
                table_name,
            )),
            Self::Memory => Arc::new(InMemoryLockStore::new()),
        }
    }
}

impl FromStr for LockStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dynamodb" => Ok(Self::DynamoDb),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown lock store '{other}' (expected dynamodb or memory)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub project_number: u32,
    pub api_url: String,
}

impl GitHubConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            token: required(lookup, "GITHUB_TOKEN")?,
            owner: required(lookup, "GITHUB_OWNER")?,
            repo: required(lookup, "GITHUB_REPO")?,
            project_number: parsed(lookup, "GITHUB_PROJECT_NUMBER", 0)?,
            api_url: lookup("GITHUB_API_URL")
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.into())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

/// Settings shared by both binaries.
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub table_name: String,
    pub store: LockStoreKind,
    pub ttl: chrono::Duration,
}

impl LockConfig {
    fn from_lookup(
        lookup: &impl Fn(&str) -> Option<String>,
        environment: Environment,
    ) -> Result<Self, ConfigError> {
        let ttl_hours: i64 = parsed(lookup, "LOCK_TTL_HOURS", DEFAULT_LOCK_TTL_HOURS)?;
        if ttl_hours <= 0 {
            return Err(ConfigError::Invalid {
                var: "LOCK_TTL_HOURS",
                value: ttl_hours.to_string(),
                reason: "must be positive".into(),
            });
        }

        Ok(Self {
            table_name: lookup("LOCK_TABLE_NAME")
                .unwrap_or_else(|| format!("kiro-worker-locks-{environment}")),
            store: parsed(lookup, "LOCK_STORE", LockStoreKind::DynamoDb)?,
            ttl: chrono::Duration::hours(ttl_hours),
        })
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

/// Configuration for the `kiro-poller` binary.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub environment: Environment,
    pub lock: LockConfig,
    pub target_status: String,
    pub codebuild_project_name: String,
    pub github: GitHubConfig,
}

impl WorkerConfig {
    /// Load from the process environment.
    ///
    /// | Env Var                  | Default                      |
    /// |--------------------------|------------------------------|
    /// | `ENVIRONMENT`            | `test`                       |
    /// | `LOCK_TABLE_NAME`        | `kiro-worker-locks-{env}`    |
    /// | `LOCK_STORE`             | `dynamodb`                   |
    /// | `LOCK_TTL_HOURS`         | `2`                          |
    /// | `TARGET_STATUS`          | `Ready`                      |
    /// | `CODEBUILD_PROJECT_NAME` | required                     |
    /// | `GITHUB_TOKEN`           | required                     |
    /// | `GITHUB_OWNER`           | required                     |
    /// | `GITHUB_REPO`            | required                     |
    /// | `GITHUB_PROJECT_NUMBER`  | `0`                          |
    /// | `GITHUB_API_URL`         | `https://api.github.com`     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = parsed(&lookup, "ENVIRONMENT", Environment::Test)?;

        Ok(Self {
            environment,
            lock: LockConfig::from_lookup(&lookup, environment)?,
            target_status: lookup("TARGET_STATUS").unwrap_or_else(|| DEFAULT_TARGET_STATUS.into()),
            codebuild_project_name: required(&lookup, "CODEBUILD_PROJECT_NAME")?,
            github: GitHubConfig::from_lookup(&lookup)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Configuration for the `kiro-pipeline` binary.
#[derive(Debug, Clone)]
pub struct PipelineRunConfig {
    pub pipeline: PipelineConfig,
    pub lock: LockConfig,
    /// Token of the lock taken by the poller, released when the run ends.
    pub lock_token: Option<String>,
    pub kiro_cli_path: String,
    pub artifacts_bucket: Option<String>,
    pub github: GitHubConfig,
}

impl PipelineRunConfig {
    /// Load from the process environment.
    ///
    /// | Env Var                 | Default                              |
    /// |-------------------------|--------------------------------------|
    /// | `ENVIRONMENT`           | `test`                               |
    /// | `BRANCH_NAME`           | required                             |
    /// | `SPEC_PATH`             | `.kiro/specs/{BRANCH_NAME}`          |
    /// | `TASK_ID`               | first unchecked task in `tasks.md`   |
    /// | `REPO_DIR`              | `.`                                  |
    /// | `PIPELINE_TIMEOUT_MS`   | `3600000`                            |
    /// | `KIRO_CLI_PATH`         | `kiro-cli`                           |
    /// | `TEST_COMMAND`          | `npm test -- --coverage`             |
    /// | `COVERAGE_SUMMARY_PATH` | `coverage/coverage-summary.json`     |
    /// | `COVERAGE_THRESHOLD`    | `80`                                 |
    /// | `STEERING_SOURCE_DIR`   | unset (sync skipped)                 |
    /// | `ARTIFACTS_BUCKET`      | unset (upload skipped)               |
    /// | `CODEBUILD_BUILD_ID`    | `local-{uuid}`                       |
    /// | `CODEBUILD_BUILD_URL`   | unset                                |
    /// | `LOCK_TOKEN`            | unset (lock left to expire)          |
    ///
    /// Plus the lock and GitHub variables of [`WorkerConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = parsed(&lookup, "ENVIRONMENT", Environment::Test)?;
        let branch_name = required(&lookup, "BRANCH_NAME")?;
        let execution_id = lookup("CODEBUILD_BUILD_ID")
            .unwrap_or_else(|| format!("local-{}", uuid::Uuid::new_v4()));
        let repo_dir = PathBuf::from(lookup("REPO_DIR").unwrap_or_else(|| ".".into()));

        let timeout_ms: u64 = parsed(
            &lookup,
            "PIPELINE_TIMEOUT_MS",
            DEFAULT_PIPELINE_TIMEOUT.as_millis() as u64,
        )?;
        let coverage_threshold: f64 =
            parsed(&lookup, "COVERAGE_THRESHOLD", DEFAULT_COVERAGE_THRESHOLD)?;
        if !(0.0..=100.0).contains(&coverage_threshold) {
            return Err(ConfigError::Invalid {
                var: "COVERAGE_THRESHOLD",
                value: coverage_threshold.to_string(),
                reason: "must be between 0 and 100".into(),
            });
        }

        let mut pipeline = PipelineConfig::new(execution_id, environment, &branch_name, repo_dir);
        pipeline.spec_path = lookup("SPEC_PATH").unwrap_or_else(|| spec_path_for_branch(&branch_name));
        pipeline.task_id = lookup("TASK_ID").filter(|t| !t.trim().is_empty());
        pipeline.timeout = Duration::from_millis(timeout_ms);
        pipeline.test_command = lookup("TEST_COMMAND").unwrap_or_else(|| DEFAULT_TEST_COMMAND.into());
        pipeline.coverage_summary_path = PathBuf::from(
            lookup("COVERAGE_SUMMARY_PATH").unwrap_or_else(|| DEFAULT_COVERAGE_SUMMARY_PATH.into()),
        );
        pipeline.coverage_threshold = coverage_threshold;
        pipeline.steering_source_dir = lookup("STEERING_SOURCE_DIR").map(PathBuf::from);
        pipeline.build_url = lookup("CODEBUILD_BUILD_URL");

        Ok(Self {
            pipeline,
            lock: LockConfig::from_lookup(&lookup, environment)?,
            lock_token: lookup("LOCK_TOKEN").filter(|t| !t.is_empty()),
            kiro_cli_path: lookup("KIRO_CLI_PATH").unwrap_or_else(|| DEFAULT_KIRO_CLI_PATH.into()),
            artifacts_bucket: lookup("ARTIFACTS_BUCKET").filter(|b| !b.is_empty()),
            github: GitHubConfig::from_lookup(&lookup)?,
        })
    }
}

/// `LOG_FORMAT`, read before tracing is initialised. Unknown values fall
/// back to text.
pub fn log_format_from_env() -> LogFormat {
    std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<String, ConfigError> {
    lookup(var)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(var))
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
