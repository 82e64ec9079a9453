//! Version-control operations used by the pipeline phases.
//!
//! [`GitOperations`] is the seam the orchestrator depends on; [`GitRunner`]
//! implements it by shelling out to the `git` executable.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("Failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },
}

#[async_trait]
pub trait GitOperations: Send + Sync {
    /// True when `branch` exists locally or on `origin`.
    async fn branch_exists(&self, branch: &str) -> Result<bool, GitError>;

    async fn checkout(&self, branch: &str) -> Result<(), GitError>;

    /// Stage everything in the working tree.
    async fn add_all(&self) -> Result<(), GitError>;

    async fn add_paths(&self, paths: &[&str]) -> Result<(), GitError>;

    /// Commit staged changes. Returns `false` when there was nothing to commit.
    async fn commit(&self, message: &str) -> Result<bool, GitError>;

    async fn push(&self, branch: &str) -> Result<(), GitError>;

    /// Paths changed relative to `HEAD`, staged or not, de-duplicated.
    async fn changed_files(&self) -> Result<Vec<String>, GitError>;
}

pub struct GitRunner {
    working_dir: PathBuf,
}

impl GitRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub async fn run(&self, args: &[&str]) -> Result<Output, GitError> {
        tracing::debug!(args = ?args, dir = %self.working_dir.display(), "Running git command");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(args = ?args, stderr = %stderr.trim(), "Git command failed");
        }

        Ok(output)
    }

    pub async fn run_checked(&self, args: &[&str]) -> Result<Output, GitError> {
        let output = self.run(args).await?;

        if !output.status.success() {
            return Err(command_error(args, &output));
        }

        Ok(output)
    }
}

fn command_error(args: &[&str], output: &Output) -> GitError {
    GitError::Command {
        command: args.first().copied().unwrap_or_default().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

#[async_trait]
impl GitOperations for GitRunner {
    async fn branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        let local = format!("refs/heads/{branch}");
        if self.run(&["rev-parse", "--verify", "--quiet", &local]).await?.status.success() {
            return Ok(true);
        }

        let remote = self.run(&["ls-remote", "--exit-code", "--heads", "origin", branch]).await?;
        Ok(remote.status.success())
    }

    async fn checkout(&self, branch: &str) -> Result<(), GitError> {
        self.run_checked(&["checkout", branch]).await?;
        Ok(())
    }

    async fn add_all(&self) -> Result<(), GitError> {
        self.run_checked(&["add", "-A"]).await?;
        Ok(())
    }

    async fn add_paths(&self, paths: &[&str]) -> Result<(), GitError> {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.run_checked(&args).await?;
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<bool, GitError> {
        let args = ["commit", "-m", message];
        let output = self.run(&args).await?;

        if !output.status.success() {
            // git reports this on stdout, not stderr.
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stdout.contains("nothing to commit") || stderr.contains("nothing to commit") {
                return Ok(false);
            }
            return Err(command_error(&args, &output));
        }

        Ok(true)
    }

    async fn push(&self, branch: &str) -> Result<(), GitError> {
        self.run_checked(&["push", "-u", "origin", branch]).await?;
        Ok(())
    }

    async fn changed_files(&self) -> Result<Vec<String>, GitError> {
        let unstaged = self.run_checked(&["diff", "--name-only", "HEAD"]).await?;
        let staged = self.run_checked(&["diff", "--name-only", "--cached"]).await?;

        Ok(merge_changed_files(&[
            &String::from_utf8_lossy(&unstaged.stdout),
            &String::from_utf8_lossy(&staged.stdout),
        ]))
    }
}

/// Combine `git diff --name-only` listings: trim, drop blanks, de-duplicate
/// keeping first-seen order.
pub fn merge_changed_files(listings: &[&str]) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for line in listings.iter().flat_map(|l| l.lines()) {
        let path = line.trim();
        if !path.is_empty() && !files.iter().any(|f| f == path) {
            files.push(path.to_string());
        }
    }
    files
}
