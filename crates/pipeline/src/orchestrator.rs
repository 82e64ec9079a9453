//! Five-phase pipeline orchestration.
//!
//! Phases run strictly in order: checkout, steering, kiro-cli, tests,
//! pull-request. Every attempted phase appends a [`PhaseResult`] to the run's
//! [`PipelineExecutionResult`], successful or not. The first hard failure
//! halts the run; a kiro-cli timeout is recorded as an unsuccessful phase but
//! the remaining phases still run so the partial work gets tested and
//! reported.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use kiro_core::coverage::{analyze_coverage, DEFAULT_COVERAGE_THRESHOLD};
use kiro_core::error::ErrorCategory;
use kiro_core::pipeline::{Phase, PhaseResult, PipelineArtifacts, PipelineExecutionResult};
use kiro_core::report::{compose_pr_report, ReportContext};
use kiro_core::sanitize::sanitize_error_message;
use kiro_core::tasks::{next_pending_task, REQUIRED_SPEC_DOCUMENTS, TASKS_FILE};
use kiro_core::test_report::parse_test_output;
use kiro_core::types::Environment;
use kiro_core::work_item::spec_path_for_branch;

use crate::executor::{ExecutorError, TaskExecutor, TaskOptions};
use crate::git::{GitError, GitOperations};
use crate::pull_request::{PullRequest, PullRequestError, PullRequestTarget};
use crate::resources::ResourceTracker;
use crate::steering::{SteeringError, SteeringOutcome, SteeringSync};
use crate::test_runner::TestCommandRunner;

/// Overall pipeline budget (60 minutes).
pub const DEFAULT_PIPELINE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Remaining budget below which a warning is logged between phases.
pub const PIPELINE_TIMEOUT_WARNING: Duration = Duration::from_secs(5 * 60);

pub const DEFAULT_TEST_COMMAND: &str = "npm test -- --coverage";

pub const DEFAULT_COVERAGE_SUMMARY_PATH: &str = "coverage/coverage-summary.json";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Inputs for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Build id, used as the execution id in results and reports.
    pub execution_id: String,
    pub environment: Environment,
    pub branch_name: String,
    pub spec_path: String,
    /// Explicit task; otherwise the first unchecked task in `tasks.md`.
    pub task_id: Option<String>,
    pub repo_dir: PathBuf,
    pub timeout: Duration,
    /// Per-task budget passed to the executor; executor default when `None`.
    pub task_timeout: Option<Duration>,
    pub cli_args: Vec<String>,
    pub test_command: String,
    /// Relative to `repo_dir`.
    pub coverage_summary_path: PathBuf,
    pub coverage_threshold: f64,
    /// Steering sync is skipped when unset.
    pub steering_source_dir: Option<PathBuf>,
    pub build_url: Option<String>,
}

impl PipelineConfig {
    /// Defaults for everything but identity and location.
    pub fn new(
        execution_id: impl Into<String>,
        environment: Environment,
        branch_name: impl Into<String>,
        repo_dir: impl Into<PathBuf>,
    ) -> Self {
        let branch_name = branch_name.into();
        Self {
            execution_id: execution_id.into(),
            environment,
            spec_path: spec_path_for_branch(&branch_name),
            branch_name,
            task_id: None,
            repo_dir: repo_dir.into(),
            timeout: DEFAULT_PIPELINE_TIMEOUT,
            task_timeout: None,
            cli_args: Vec::new(),
            test_command: DEFAULT_TEST_COMMAND.to_string(),
            coverage_summary_path: PathBuf::from(DEFAULT_COVERAGE_SUMMARY_PATH),
            coverage_threshold: DEFAULT_COVERAGE_THRESHOLD,
            steering_source_dir: None,
            build_url: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Git operation failed: {0}")]
    Git(#[from] GitError),

    #[error("Steering sync failed: {0}")]
    Steering(#[from] SteeringError),

    #[error("kiro-cli failed: {0}")]
    KiroCli(#[from] ExecutorError),

    #[error("Test command could not be run: {0}")]
    TestCommand(#[source] std::io::Error),

    #[error("Tests failed: {0}")]
    TestFailure(String),

    #[error("Coverage report unavailable: {0}")]
    CoverageReport(String),

    #[error("{0}")]
    CoverageThreshold(String),

    #[error("Pull request update failed: {0}")]
    PullRequest(#[from] PullRequestError),
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Git(_) => ErrorCategory::GitOperation,
            Self::Steering(SteeringError::Git(_)) => ErrorCategory::GitOperation,
            Self::Steering(_) => ErrorCategory::Unknown,
            Self::KiroCli(_) => ErrorCategory::KiroCli,
            Self::TestCommand(_) | Self::TestFailure(_) => ErrorCategory::TestFailure,
            Self::CoverageReport(_) | Self::CoverageThreshold(_) => {
                ErrorCategory::CoverageThreshold
            }
            Self::PullRequest(_) => ErrorCategory::PrUpdate,
        }
    }
}

/// A failed run: the cause plus everything recorded up to the failure.
#[derive(Debug, thiserror::Error)]
#[error("Pipeline failed: {error}")]
pub struct PipelineFailure {
    #[source]
    pub error: PipelineError,
    pub result: Box<PipelineExecutionResult>,
}

impl PipelineFailure {
    pub fn category(&self) -> ErrorCategory {
        self.error.category()
    }
}

// ---------------------------------------------------------------------------
// Phase plumbing
// ---------------------------------------------------------------------------

/// Value produced by a phase. A `warning` marks the phase unsuccessful
/// without halting the pipeline.
struct PhaseOutcome<T> {
    value: T,
    warning: Option<String>,
}

impl<T> PhaseOutcome<T> {
    fn ok(value: T) -> Self {
        Self {
            value,
            warning: None,
        }
    }

    fn degraded(value: T, warning: impl Into<String>) -> Self {
        Self {
            value,
            warning: Some(warning.into()),
        }
    }
}

/// Run one phase and append its [`PhaseResult`] whatever the outcome.
async fn run_phase<T, F>(
    phases: &mut Vec<PhaseResult>,
    phase: Phase,
    fut: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<PhaseOutcome<T>, PipelineError>>,
{
    tracing::info!(phase = %phase, "Phase started");
    let start = Instant::now();
    let outcome = fut.await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(PhaseOutcome { value, warning }) => {
            let warning = warning.map(|w| sanitize_error_message(&w));
            match &warning {
                Some(w) => tracing::warn!(phase = %phase, duration_ms, warning = %w, "Phase incomplete"),
                None => tracing::info!(phase = %phase, duration_ms, "Phase completed"),
            }
            phases.push(PhaseResult {
                phase,
                success: warning.is_none(),
                duration_ms,
                error: warning,
            });
            Ok(value)
        }
        Err(e) => {
            let message = sanitize_error_message(&e.to_string());
            tracing::error!(
                phase = %phase,
                duration_ms,
                category = %e.category(),
                error = %message,
                "Phase failed",
            );
            phases.push(PhaseResult {
                phase,
                success: false,
                duration_ms,
                error: Some(message),
            });
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct PipelineOrchestrator {
    config: PipelineConfig,
    git: Arc<dyn GitOperations>,
    executor: Arc<dyn TaskExecutor>,
    test_runner: Arc<dyn TestCommandRunner>,
    pull_requests: Arc<dyn PullRequestTarget>,
    resources: Arc<ResourceTracker>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        git: Arc<dyn GitOperations>,
        executor: Arc<dyn TaskExecutor>,
        test_runner: Arc<dyn TestCommandRunner>,
        pull_requests: Arc<dyn PullRequestTarget>,
    ) -> Self {
        Self {
            config,
            git,
            executor,
            test_runner,
            pull_requests,
            resources: Arc::new(ResourceTracker::new()),
        }
    }

    /// Share a tracker with other components (e.g. the process executor).
    pub fn with_resource_tracker(mut self, resources: Arc<ResourceTracker>) -> Self {
        self.resources = resources;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run all phases.
    ///
    /// `Ok` carries the full record; its `success` is true only when every
    /// phase succeeded. `Err` carries the halting error and the partial
    /// record.
    pub async fn execute(&self) -> Result<PipelineExecutionResult, PipelineFailure> {
        let started = Instant::now();
        let mut result = PipelineExecutionResult::new(
            &self.config.execution_id,
            self.config.environment,
            &self.config.branch_name,
        );

        tracing::info!(
            execution_id = %self.config.execution_id,
            branch = %self.config.branch_name,
            spec_path = %self.config.spec_path,
            environment = %self.config.environment,
            "Pipeline started",
        );

        let outcome = self.run_phases(&mut result, started).await;
        result.duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                result.success = result.all_phases_succeeded();
                let phase_errors = result.phase_errors();
                result.errors.extend(phase_errors);
                tracing::info!(
                    execution_id = %result.execution_id,
                    success = result.success,
                    duration_ms = result.duration_ms,
                    phases = ?result.phase_summary(),
                    "Pipeline finished",
                );
                self.resources.cleanup().await;
                Ok(result)
            }
            Err(error) => {
                let category = error.category();
                let message = sanitize_error_message(&error.to_string());
                result.success = false;
                result.errors.push(message.clone());
                tracing::error!(
                    execution_id = %result.execution_id,
                    category = %category,
                    error = %message,
                    duration_ms = result.duration_ms,
                    phases = ?result.phase_summary(),
                    "Pipeline failed",
                );
                self.resources.cleanup().await;
                Err(PipelineFailure {
                    error,
                    result: Box::new(result),
                })
            }
        }
    }

    async fn run_phases(
        &self,
        result: &mut PipelineExecutionResult,
        started: Instant,
    ) -> Result<(), PipelineError> {
        let mut warned = false;
        let phases = &mut result.phases;
        let artifacts = &mut result.artifacts;

        self.check_timeout(started, &mut warned);
        let pull_request = run_phase(phases, Phase::Checkout, self.checkout()).await?;

        self.check_timeout(started, &mut warned);
        let steering_committed = run_phase(phases, Phase::Steering, self.sync_steering()).await?;

        self.check_timeout(started, &mut warned);
        let task_id = run_phase(phases, Phase::KiroCli, self.run_kiro_cli(artifacts)).await?;

        self.check_timeout(started, &mut warned);
        run_phase(phases, Phase::Tests, self.run_tests(artifacts)).await?;

        self.check_timeout(started, &mut warned);
        run_phase(
            phases,
            Phase::PullRequest,
            self.publish(&pull_request, &task_id, steering_committed, artifacts),
        )
        .await?;

        Ok(())
    }

    /// Advisory only: logs once when the remaining budget runs low.
    fn check_timeout(&self, started: Instant, warned: &mut bool) {
        let remaining = self.config.timeout.saturating_sub(started.elapsed());
        if !*warned && remaining < PIPELINE_TIMEOUT_WARNING {
            *warned = true;
            tracing::warn!(
                execution_id = %self.config.execution_id,
                remaining_ms = remaining.as_millis() as u64,
                "Pipeline approaching timeout",
            );
        }
    }

    // -- phases -------------------------------------------------------------

    async fn checkout(&self) -> Result<PhaseOutcome<PullRequest>, PipelineError> {
        let branch = &self.config.branch_name;

        if !self.git.branch_exists(branch).await? {
            return Err(PipelineError::Validation(format!(
                "Branch '{branch}' does not exist locally or on origin"
            )));
        }
        self.git.checkout(branch).await?;

        let spec_dir = self.config.repo_dir.join(&self.config.spec_path);
        let mut missing = Vec::new();
        for doc in REQUIRED_SPEC_DOCUMENTS {
            if !tokio::fs::try_exists(spec_dir.join(doc)).await.unwrap_or(false) {
                missing.push(doc);
            }
        }
        if !missing.is_empty() {
            return Err(PipelineError::Validation(format!(
                "Spec '{}' is missing {}",
                self.config.spec_path,
                missing.join(", ")
            )));
        }

        let pull_request = self
            .pull_requests
            .find_open_pull_request(branch)
            .await?
            .ok_or_else(|| {
                PipelineError::Validation(format!("No open pull request for branch '{branch}'"))
            })?;

        tracing::info!(branch = %branch, pr = pull_request.number, "Branch checked out");
        Ok(PhaseOutcome::ok(pull_request))
    }

    async fn sync_steering(&self) -> Result<PhaseOutcome<bool>, PipelineError> {
        let Some(source_dir) = &self.config.steering_source_dir else {
            tracing::info!("No steering source configured, skipping sync");
            return Ok(PhaseOutcome::ok(false));
        };

        let outcome = SteeringSync::new(source_dir, &self.config.repo_dir)
            .with_resource_tracker(self.resources.clone())
            .sync(self.git.as_ref())
            .await?;

        let committed = matches!(outcome, SteeringOutcome::Synced { committed: true, .. });
        Ok(PhaseOutcome::ok(committed))
    }

    async fn resolve_task_id(&self) -> Result<String, PipelineError> {
        if let Some(task_id) = &self.config.task_id {
            return Ok(task_id.clone());
        }

        let tasks_path = self
            .config
            .repo_dir
            .join(&self.config.spec_path)
            .join(TASKS_FILE);
        let markdown = tokio::fs::read_to_string(&tasks_path).await.map_err(|e| {
            PipelineError::Validation(format!("Cannot read {}: {e}", tasks_path.display()))
        })?;

        next_pending_task(&markdown).ok_or_else(|| {
            PipelineError::Validation(format!(
                "No pending task in {}/{TASKS_FILE}",
                self.config.spec_path
            ))
        })
    }

    async fn run_kiro_cli(
        &self,
        artifacts: &mut PipelineArtifacts,
    ) -> Result<PhaseOutcome<String>, PipelineError> {
        let task_id = self.resolve_task_id().await?;
        let options = TaskOptions {
            spec_path: self.config.spec_path.clone(),
            timeout: self.config.task_timeout,
            custom_args: self.config.cli_args.clone(),
        };

        let execution = self.executor.execute_task(&task_id, &options).await?;
        artifacts.modified_files = execution.modified_files;
        artifacts.cli_output = Some(execution.output);

        if execution.timed_out {
            let detail = execution
                .errors
                .and_then(|e| e.into_iter().next())
                .unwrap_or_else(|| format!("Task {task_id} timed out"));
            return Ok(PhaseOutcome::degraded(task_id, detail));
        }

        Ok(PhaseOutcome::ok(task_id))
    }

    async fn run_tests(
        &self,
        artifacts: &mut PipelineArtifacts,
    ) -> Result<PhaseOutcome<()>, PipelineError> {
        let run = self
            .test_runner
            .run(&self.config.test_command, &self.config.repo_dir)
            .await
            .map_err(PipelineError::TestCommand)?;

        let parsed = parse_test_output(&run.output);
        tracing::info!(
            passed = parsed.passed,
            failed = parsed.failed,
            total = parsed.total,
            exit_code = run.exit_code,
            format = ?parsed.format,
            "Test run parsed",
        );
        artifacts.test_result = Some(parsed.clone());

        if parsed.failed > 0 {
            return Err(PipelineError::TestFailure(format!(
                "{} of {} tests failed",
                parsed.failed, parsed.total
            )));
        }
        // A non-zero exit with passing counts is usually a coverage gate;
        // the coverage check below judges that.
        if run.exit_code != 0 && parsed.total == 0 {
            return Err(PipelineError::TestFailure(format!(
                "Test command exited with code {} and reported no results",
                run.exit_code
            )));
        }

        let summary_path = self.config.repo_dir.join(&self.config.coverage_summary_path);
        let summary = tokio::fs::read_to_string(&summary_path).await.map_err(|e| {
            PipelineError::CoverageReport(format!("{}: {e}", summary_path.display()))
        })?;
        let coverage = analyze_coverage(&summary, self.config.coverage_threshold)
            .map_err(|e| PipelineError::CoverageReport(e.to_string()))?;
        artifacts.coverage_result = Some(coverage.clone());

        if !coverage.meets_threshold {
            return Err(PipelineError::CoverageThreshold(coverage.shortfall_message()));
        }

        tracing::info!(percentage = coverage.percentage, "Coverage threshold met");
        Ok(PhaseOutcome::ok(()))
    }

    async fn publish(
        &self,
        pull_request: &PullRequest,
        task_id: &str,
        steering_committed: bool,
        artifacts: &mut PipelineArtifacts,
    ) -> Result<PhaseOutcome<()>, PipelineError> {
        let mut needs_push = steering_committed;
        if !artifacts.modified_files.is_empty() {
            self.git.add_all().await?;
            let message = format!("feat: implement task {task_id} ({})", self.config.spec_path);
            needs_push |= self.git.commit(&message).await?;
        }
        if needs_push {
            self.git.push(&self.config.branch_name).await?;
        }

        let body = compose_pr_report(&ReportContext {
            task_id,
            build_id: &self.config.execution_id,
            build_url: self.config.build_url.as_deref(),
            environment: self.config.environment,
            timestamp: Utc::now(),
            test_result: artifacts.test_result.as_ref(),
            coverage: artifacts.coverage_result.as_ref(),
            modified_files: &artifacts.modified_files,
        });

        self.pull_requests
            .update_pull_request_body(pull_request.number, &body)
            .await?;
        artifacts.pr_url = Some(pull_request.url.clone());

        Ok(PhaseOutcome::ok(()))
    }
}
