//! Code-generation CLI execution with timeout escalation.
//!
//! [`ProcessExecutor`] spawns `<cli> execute-task --spec <path> --task <id>`
//! in its own process group, streams stdout/stderr into shared buffers while
//! mirroring them to the parent, and escalates on timeout. The result's
//! `output` interleaves both streams in arrival order.
//!
//!
//! | State        | Entered when                                      | Action            |
//! |--------------|---------------------------------------------------|-------------------|
//! | Running      | spawn                                             |                   |
//! | Terminating  | warning deadline, full deadline, or shutdown      | SIGTERM the group |
//! | Killed       | kill grace elapsed while still Terminating        | SIGKILL the group |
//!
//! The warning deadline (`timeout - warning_window`) only exists when the
//! timeout is longer than the window. Escalation happens at most once.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kiro_core::pipeline::ExecutionResult;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::git::{GitOperations, GitRunner};
use crate::resources::ResourceTracker;

/// Default per-task budget (60 minutes).
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// How long before the deadline the approaching-timeout escalation fires.
pub const TIMEOUT_WARNING_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Delay between SIGTERM and SIGKILL.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Maximum bytes captured per buffer (10 MiB). Mirroring is not capped.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// How long to wait for reader tasks to drain after the child exits.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("kiro-cli exited with code {exit_code}: {stderr}")]
    Process {
        exit_code: i32,
        stderr: String,
        stdout: String,
    },

    #[error("I/O error while waiting for kiro-cli: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Spec folder passed as `--spec`.
    pub spec_path: String,
    /// Falls back to [`DEFAULT_TASK_TIMEOUT`].
    pub timeout: Option<Duration>,
    /// Appended after the fixed arguments.
    pub custom_args: Vec<String>,
}

/// Deadlines used while a task runs.
#[derive(Debug, Clone, Copy)]
pub struct EscalationPolicy {
    pub warning_window: Duration,
    pub kill_grace: Duration,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            warning_window: TIMEOUT_WARNING_WINDOW,
            kill_grace: KILL_GRACE_PERIOD,
        }
    }
}

/// Runs one spec task. Implemented by [`ProcessExecutor`].
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute_task(
        &self,
        task_id: &str,
        options: &TaskOptions,
    ) -> Result<ExecutionResult, ExecutorError>;
}

// ---------------------------------------------------------------------------
// ProcessExecutor
// ---------------------------------------------------------------------------

pub struct ProcessExecutor {
    cli_path: String,
    repo_dir: PathBuf,
    policy: EscalationPolicy,
    resources: Option<Arc<ResourceTracker>>,
    shutdown: CancellationToken,
    mirror_output: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escalation {
    Running,
    Terminating,
    Killed,
}

#[derive(Debug, Clone, Copy)]
enum Mirror {
    Stdout,
    Stderr,
}

impl ProcessExecutor {
    pub fn new(cli_path: impl Into<String>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            cli_path: cli_path.into(),
            repo_dir: repo_dir.into(),
            policy: EscalationPolicy::default(),
            resources: None,
            shutdown: CancellationToken::new(),
            mirror_output: true,
        }
    }

    pub fn with_policy(mut self, policy: EscalationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register spawned pids with `resources` for end-of-run cleanup.
    pub fn with_resource_tracker(mut self, resources: Arc<ResourceTracker>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Cancelling `token` escalates a running task as if it had timed out.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn with_output_mirroring(mut self, mirror: bool) -> Self {
        self.mirror_output = mirror;
        self
    }

    async fn collect_changed_files(&self) -> Vec<String> {
        match GitRunner::new(&self.repo_dir).changed_files().await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list changed files");
                Vec::new()
            }
        }
    }
}

/// Full argument vector for one task run.
pub fn build_task_args(task_id: &str, options: &TaskOptions) -> Vec<String> {
    let mut args = vec![
        "execute-task".to_string(),
        "--spec".to_string(),
        options.spec_path.clone(),
        "--task".to_string(),
        task_id.to_string(),
    ];
    args.extend(options.custom_args.iter().cloned());
    args
}

#[async_trait]
impl TaskExecutor for ProcessExecutor {
    async fn execute_task(
        &self,
        task_id: &str,
        options: &TaskOptions,
    ) -> Result<ExecutionResult, ExecutorError> {
        let timeout = options.timeout.unwrap_or(DEFAULT_TASK_TIMEOUT);
        let args = build_task_args(task_id, options);

        tracing::info!(
            task_id,
            spec_path = %options.spec_path,
            timeout_ms = timeout.as_millis() as u64,
            "Starting kiro-cli task",
        );

        let mut cmd = Command::new(&self.cli_path);
        cmd.args(&args)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ExecutorError::Spawn {
            program: self.cli_path.clone(),
            source,
        })?;
        let pid = child.id();
        if let (Some(pid), Some(resources)) = (pid, &self.resources) {
            resources.register_pid(pid);
        }

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let combined_buf = Arc::new(Mutex::new(Vec::new()));
        let mut stdout_task = spawn_reader(
            child.stdout.take(),
            [stdout_buf.clone(), combined_buf.clone()],
            self.mirror_output.then_some(Mirror::Stdout),
        );
        let mut stderr_task = spawn_reader(
            child.stderr.take(),
            [stderr_buf.clone(), combined_buf.clone()],
            self.mirror_output.then_some(Mirror::Stderr),
        );

        let start = Instant::now();
        let deadline = start + timeout;
        let warning_at =
            (timeout > self.policy.warning_window).then(|| deadline - self.policy.warning_window);
        let mut kill_at: Option<Instant> = None;
        let mut state = Escalation::Running;

        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = sleep_until_opt(warning_at), if state == Escalation::Running => {
                    tracing::warn!(
                        task_id,
                        remaining_ms = self.policy.warning_window.as_millis() as u64,
                        "kiro-cli approaching timeout, sending SIGTERM",
                    );
                    signal_group(pid, libc::SIGTERM);
                    kill_at = Some(Instant::now() + self.policy.kill_grace);
                    state = Escalation::Terminating;
                }
                _ = tokio::time::sleep_until(deadline), if state == Escalation::Running => {
                    tracing::warn!(
                        task_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "kiro-cli timed out, sending SIGTERM",
                    );
                    signal_group(pid, libc::SIGTERM);
                    kill_at = Some(Instant::now() + self.policy.kill_grace);
                    state = Escalation::Terminating;
                }
                _ = self.shutdown.cancelled(), if state == Escalation::Running => {
                    tracing::warn!(task_id, "Shutdown requested, sending SIGTERM to kiro-cli");
                    signal_group(pid, libc::SIGTERM);
                    kill_at = Some(Instant::now() + self.policy.kill_grace);
                    state = Escalation::Terminating;
                }
                _ = sleep_until_opt(kill_at), if state == Escalation::Terminating => {
                    tracing::error!(task_id, "kiro-cli ignored SIGTERM, sending SIGKILL");
                    signal_group(pid, libc::SIGKILL);
                    state = Escalation::Killed;
                }
            }
        };

        if let (Some(pid), Some(resources)) = (pid, &self.resources) {
            resources.unregister_pid(pid);
        }
        let status = status?;

        drain_reader(&mut stdout_task).await;
        drain_reader(&mut stderr_task).await;
        let stdout = take_buffer(&stdout_buf);
        let stderr = take_buffer(&stderr_buf);
        let output = take_buffer(&combined_buf);
        let duration_ms = start.elapsed().as_millis() as u64;

        if state != Escalation::Running {
            let modified_files = self.collect_changed_files().await;
            tracing::warn!(
                task_id,
                duration_ms,
                modified_files = modified_files.len(),
                escalation = ?state,
                "kiro-cli terminated before completion, keeping partial result",
            );
            return Ok(ExecutionResult {
                success: false,
                output,
                modified_files,
                errors: Some(vec![format!(
                    "Task {task_id} was terminated after {duration_ms}ms (timeout {}ms)",
                    timeout.as_millis()
                )]),
                timed_out: true,
                partial_result: true,
            });
        }

        if !status.success() {
            let exit_code = status.code().unwrap_or(-1);
            tracing::error!(task_id, exit_code, duration_ms, "kiro-cli failed");
            return Err(ExecutorError::Process {
                exit_code,
                stderr: stderr.trim().to_string(),
                stdout,
            });
        }

        let modified_files = self.collect_changed_files().await;
        tracing::info!(
            task_id,
            duration_ms,
            modified_files = modified_files.len(),
            "kiro-cli task completed",
        );

        Ok(ExecutionResult {
            success: true,
            output,
            modified_files,
            errors: None,
            timed_out: false,
            partial_result: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Signal the child's whole process group.
fn signal_group(pid: Option<u32>, signal: libc::c_int) {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // Safety: kill(2) has no memory-safety preconditions.
    let ret = unsafe { libc::kill(-pgid, signal) };
    if ret != 0 {
        tracing::debug!(
            pgid,
            signal,
            error = %std::io::Error::last_os_error(),
            "Signal delivery failed",
        );
    }
}

/// Copy `stream` into each of `buffers` (own stream, then combined).
fn spawn_reader<R>(
    stream: Option<R>,
    buffers: [Arc<Mutex<Vec<u8>>>; 2],
    mirror: Option<Mirror>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut stream) = stream else {
            return;
        };
        let mut sink: Option<Box<dyn AsyncWrite + Unpin + Send>> = match mirror {
            Some(Mirror::Stdout) => Some(Box::new(tokio::io::stdout())),
            Some(Mirror::Stderr) => Some(Box::new(tokio::io::stderr())),
            None => None,
        };
        let mut chunk = [0u8; 8192];
        loop {
            let n = match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            for buffer in &buffers {
                if let Ok(mut buf) = buffer.lock() {
                    let room = MAX_OUTPUT_BYTES.saturating_sub(buf.len());
                    buf.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
            if let Some(out) = sink.as_mut() {
                // Best-effort mirror; a closed parent stdout must not stop capture.
                let _ = out.write_all(&chunk[..n]).await;
            }
        }
    })
}

async fn drain_reader(handle: &mut JoinHandle<()>) {
    if tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut *handle).await.is_err() {
        handle.abort();
    }
}

fn take_buffer(buffer: &Mutex<Vec<u8>>) -> String {
    buffer
        .lock()
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn args_follow_fixed_layout() {
        let options = TaskOptions {
            spec_path: ".kiro/specs/feature-x".into(),
            timeout: None,
            custom_args: vec!["--verbose".into()],
        };
        assert_eq!(
            build_task_args("2.1", &options),
            vec!["execute-task", "--spec", ".kiro/specs/feature-x", "--task", "2.1", "--verbose"]
        );
    }

    #[test]
    fn default_policy_matches_constants() {
        let policy = EscalationPolicy::default();
        assert_eq!(policy.warning_window, Duration::from_secs(300));
        assert_eq!(policy.kill_grace, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let executor = ProcessExecutor::new("/nonexistent/kiro-cli", dir.path());
        let err = executor
            .execute_task("1", &TaskOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, ExecutorError::Spawn { .. });
    }

    #[tokio::test]
    async fn sleep_until_none_never_fires() {
        let fired = tokio::time::timeout(Duration::from_millis(20), sleep_until_opt(None)).await;
        assert!(fired.is_err());
    }
}
