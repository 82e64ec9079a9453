//! Steering file synchronisation.
//!
//! Copies the shared steering documents from a source directory into
//! `.kiro/steering/` of the target repository and commits them. Planning is
//! delegated to [`kiro_core::steering::plan_sync`]; this module only does the
//! file and git I/O.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use kiro_core::error::CoreError;
use kiro_core::hashing::sha256_hex;
use kiro_core::steering::{plan_sync, SteeringManifest, MANIFEST_FILE, STEERING_DIR};

use crate::git::{GitError, GitOperations};
use crate::resources::ResourceTracker;

#[derive(Debug, thiserror::Error)]
pub enum SteeringError {
    #[error("Steering I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid steering manifest: {0}")]
    Manifest(#[from] CoreError),

    #[error(transparent)]
    Git(#[from] GitError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SteeringOutcome {
    UpToDate,
    Synced { files: Vec<String>, committed: bool },
}

pub struct SteeringSync {
    source_dir: PathBuf,
    repo_dir: PathBuf,
    resources: Option<Arc<ResourceTracker>>,
}

impl SteeringSync {
    pub fn new(source_dir: impl Into<PathBuf>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            repo_dir: repo_dir.into(),
            resources: None,
        }
    }

    /// Register in-flight temporary files with the run's tracker so an
    /// interrupted sync leaves nothing behind.
    pub fn with_resource_tracker(mut self, resources: Arc<ResourceTracker>) -> Self {
        self.resources = Some(resources);
        self
    }

    fn steering_dir(&self) -> PathBuf {
        self.repo_dir.join(STEERING_DIR)
    }

    /// Bring the repository's steering files up to date with the source.
    ///
    /// Performs no git operations when the tree already matches.
    pub async fn sync(&self, git: &dyn GitOperations) -> Result<SteeringOutcome, SteeringError> {
        let source_manifest_path = self.source_dir.join(MANIFEST_FILE);
        let source_bytes = read(&source_manifest_path).await?;
        let source = parse_manifest(&source_bytes)?;
        for entry in &source.files {
            ensure_relative(&entry.path)?;
        }

        let local = self.read_local_manifest().await;
        let local_checksums = self.local_checksums(&source).await?;
        let plan = plan_sync(&source, local.as_ref(), &local_checksums)?;

        if plan.is_noop() {
            tracing::info!(version = %source.version, "Steering files up to date");
            return Ok(SteeringOutcome::UpToDate);
        }

        tracing::info!(
            version = %source.version,
            reason = ?plan.reason,
            files = plan.files_to_copy.len(),
            "Synchronising steering files",
        );

        let steering_dir = self.steering_dir();
        for file in &plan.files_to_copy {
            let from = self.source_dir.join(file);
            let to = steering_dir.join(file);
            if let Some(parent) = to.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| io_error(parent, e))?;
            }
            tokio::fs::copy(&from, &to).await.map_err(|e| io_error(&from, e))?;
        }

        let manifest_path = steering_dir.join(MANIFEST_FILE);
        tokio::fs::create_dir_all(&steering_dir)
            .await
            .map_err(|e| io_error(&steering_dir, e))?;
        self.write_manifest(&manifest_path, &source_bytes).await?;

        git.add_paths(&[STEERING_DIR]).await?;
        let committed = git
            .commit(&format!("chore: sync steering files to v{}", source.version))
            .await?;

        Ok(SteeringOutcome::Synced {
            files: plan.files_to_copy,
            committed,
        })
    }

    /// Write through a sibling temp file so a reader never sees a partial
    /// manifest.
    async fn write_manifest(&self, path: &Path, bytes: &[u8]) -> Result<(), SteeringError> {
        let tmp = path.with_extension("json.tmp");
        if let Some(resources) = &self.resources {
            resources.register_temp_path(&tmp);
        }
        tokio::fs::write(&tmp, bytes).await.map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| io_error(path, e))
    }

    /// Missing or unreadable local manifests are treated as absent.
    async fn read_local_manifest(&self) -> Option<SteeringManifest> {
        let path = self.steering_dir().join(MANIFEST_FILE);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match parse_manifest(&bytes) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable local steering manifest");
                None
            }
        }
    }

    async fn local_checksums(
        &self,
        source: &SteeringManifest,
    ) -> Result<HashMap<String, String>, SteeringError> {
        let steering_dir = self.steering_dir();
        let mut checksums = HashMap::new();
        for entry in &source.files {
            let path = steering_dir.join(&entry.path);
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    checksums.insert(entry.path.clone(), sha256_hex(&bytes));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path, e)),
            }
        }
        Ok(checksums)
    }
}

fn parse_manifest(bytes: &[u8]) -> Result<SteeringManifest, CoreError> {
    serde_json::from_slice(bytes).map_err(|e| CoreError::Parse(format!("manifest.json: {e}")))
}

fn ensure_relative(path: &str) -> Result<(), CoreError> {
    let ok = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok && !path.is_empty() {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Steering path '{path}' must be relative to the steering directory"
        )))
    }
}

async fn read(path: &Path) -> Result<Vec<u8>, SteeringError> {
    tokio::fs::read(path).await.map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, source: std::io::Error) -> SteeringError {
    SteeringError::Io {
        path: path.display().to_string(),
        source,
    }
}
