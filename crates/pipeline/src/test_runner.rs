//! Test command execution.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

/// Raw outcome of a test command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRunOutput {
    pub exit_code: i32,
    /// stdout followed by stderr.
    pub output: String,
}

#[async_trait]
pub trait TestCommandRunner: Send + Sync {
    async fn run(&self, command: &str, working_dir: &Path) -> std::io::Result<TestRunOutput>;
}

/// Runs the command through `sh -c` so pipes and `&&` work as written.
pub struct ShellTestRunner;

#[async_trait]
impl TestCommandRunner for ShellTestRunner {
    async fn run(&self, command: &str, working_dir: &Path) -> std::io::Result<TestRunOutput> {
        tracing::info!(command, dir = %working_dir.display(), "Running test command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(working_dir)
            // Test reporters colourise when they think they own a TTY.
            .env("CI", "true")
            .env("FORCE_COLOR", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        Ok(TestRunOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: combined,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_both_streams_and_exit_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = ShellTestRunner
            .run("echo 'Tests  3 passed (3)'; echo oops >&2; exit 3", dir.path())
            .await
            .expect("run");
        assert_eq!(out.exit_code, 3);
        assert!(out.output.contains("Tests  3 passed (3)"));
        assert!(out.output.contains("oops"));
    }

    #[tokio::test]
    async fn runs_in_working_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("marker.txt"), "here").expect("write");
        let out = ShellTestRunner.run("cat marker.txt", dir.path()).await.expect("run");
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.output.trim(), "here");
    }
}
