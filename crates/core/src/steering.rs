//! Steering manifest model and sync planning.
//!
//! The pipeline keeps a versioned set of reference documents under
//! `.kiro/steering/` in every target repository. A manifest lists each file
//! with its SHA-256 checksum; [`plan_sync`] compares the source manifest with
//! what is on disk and decides which files need copying. The I/O side lives
//! in the pipeline crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Steering directory inside a target repository.
pub const STEERING_DIR: &str = ".kiro/steering";

/// Manifest file name, both in the source directory and in the repository.
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the steering directory.
    pub path: String,
    /// Lowercase hex SHA-256 of the file contents.
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SteeringManifest {
    /// Semantic version of the steering set.
    pub version: String,
    pub files: Vec<ManifestEntry>,
}

impl SteeringManifest {
    pub fn parse_version(&self) -> Result<semver::Version, CoreError> {
        semver::Version::parse(&self.version).map_err(|e| {
            CoreError::Parse(format!("Invalid steering version '{}': {e}", self.version))
        })
    }
}

/// Why a sync is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReason {
    MissingLocalManifest,
    Outdated { local: String, source: String },
    FileMismatch,
}

/// Files to copy from the source directory, empty when already in sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub files_to_copy: Vec<String>,
    pub reason: Option<SyncReason>,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.files_to_copy.is_empty()
    }
}

/// Decide which steering files must be copied.
///
/// `local_checksums` maps each source manifest path to the checksum of the
/// file currently on disk in the repository; absent keys mean the file is
/// missing locally.
pub fn plan_sync(
    source: &SteeringManifest,
    local: Option<&SteeringManifest>,
    local_checksums: &HashMap<String, String>,
) -> Result<SyncPlan, CoreError> {
    let all_files = || source.files.iter().map(|f| f.path.clone()).collect();

    let Some(local) = local else {
        return Ok(SyncPlan {
            files_to_copy: all_files(),
            reason: Some(SyncReason::MissingLocalManifest),
        });
    };

    let source_version = source.parse_version()?;
    // An unreadable local version is treated as outdated.
    let outdated = match local.parse_version() {
        Ok(local_version) => local_version < source_version,
        Err(_) => true,
    };

    if outdated {
        return Ok(SyncPlan {
            files_to_copy: all_files(),
            reason: Some(SyncReason::Outdated {
                local: local.version.clone(),
                source: source.version.clone(),
            }),
        });
    }

    let mismatched: Vec<String> = source
        .files
        .iter()
        .filter(|entry| local_checksums.get(&entry.path) != Some(&entry.checksum))
        .map(|entry| entry.path.clone())
        .collect();

    let reason = (!mismatched.is_empty()).then_some(SyncReason::FileMismatch);
    Ok(SyncPlan {
        files_to_copy: mismatched,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn manifest(version: &str, files: &[(&str, &str)]) -> SteeringManifest {
        SteeringManifest {
            version: version.to_string(),
            files: files
                .iter()
                .map(|(p, c)| ManifestEntry {
                    path: p.to_string(),
                    checksum: c.to_string(),
                })
                .collect(),
        }
    }

    fn checksums(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect()
    }

    #[test]
    fn missing_local_manifest_copies_everything() {
        let source = manifest("1.0.0", &[("tech.md", "aa"), ("product.md", "bb")]);
        let plan = plan_sync(&source, None, &HashMap::new()).expect("plan");
        assert_eq!(plan.files_to_copy, vec!["tech.md", "product.md"]);
        assert_eq!(plan.reason, Some(SyncReason::MissingLocalManifest));
    }

    #[test]
    fn older_local_version_copies_everything() {
        let source = manifest("1.2.0", &[("tech.md", "aa")]);
        let local = manifest("1.1.9", &[("tech.md", "aa")]);
        let plan = plan_sync(&source, Some(&local), &checksums(&[("tech.md", "aa")])).expect("plan");
        assert_eq!(plan.files_to_copy, vec!["tech.md"]);
        assert_matches!(plan.reason, Some(SyncReason::Outdated { .. }));
    }

    #[test]
    fn checksum_mismatch_copies_only_that_file() {
        let source = manifest("1.0.0", &[("tech.md", "aa"), ("product.md", "bb")]);
        let local = source.clone();
        let on_disk = checksums(&[("tech.md", "aa"), ("product.md", "edited")]);
        let plan = plan_sync(&source, Some(&local), &on_disk).expect("plan");
        assert_eq!(plan.files_to_copy, vec!["product.md"]);
        assert_eq!(plan.reason, Some(SyncReason::FileMismatch));
    }

    #[test]
    fn missing_local_file_is_copied() {
        let source = manifest("1.0.0", &[("tech.md", "aa"), ("structure.md", "cc")]);
        let plan = plan_sync(&source, Some(&source), &checksums(&[("tech.md", "aa")])).expect("plan");
        assert_eq!(plan.files_to_copy, vec!["structure.md"]);
    }

    #[test]
    fn in_sync_tree_is_noop() {
        let source = manifest("2.0.0", &[("tech.md", "aa")]);
        let plan = plan_sync(&source, Some(&source), &checksums(&[("tech.md", "aa")])).expect("plan");
        assert!(plan.is_noop());
        assert_eq!(plan.reason, None);
    }

    #[test]
    fn invalid_source_version_is_error() {
        let source = manifest("latest", &[]);
        let local = manifest("1.0.0", &[]);
        assert_matches!(
            plan_sync(&source, Some(&local), &HashMap::new()),
            Err(CoreError::Parse(_))
        );
    }
}
