use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Failure taxonomy used for structured logging and alerting.
///
/// "Lock already held" and "no work found" are expected outcomes and never
/// map to a category; they are returned as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Missing branch, spec documents, or pull request.
    Validation,
    /// Checkout, commit, or push failures.
    GitOperation,
    /// Code-generation task failure or non-timeout process error.
    KiroCli,
    /// One or more tests failed.
    TestFailure,
    /// Tests passed but coverage is below threshold.
    CoverageThreshold,
    /// Pull request not found or update rejected.
    PrUpdate,
    /// Store-level failure acquiring or querying locks.
    LockAcquisition,
    Unknown,
}

impl ErrorCategory {
    /// Return the wire-format string for this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::GitOperation => "git-operation",
            Self::KiroCli => "kiro-cli",
            Self::TestFailure => "test-failure",
            Self::CoverageThreshold => "coverage-threshold",
            Self::PrUpdate => "pr-update",
            Self::LockAcquisition => "lock-acquisition",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_wire_names() {
        assert_eq!(ErrorCategory::GitOperation.as_str(), "git-operation");
        assert_eq!(ErrorCategory::CoverageThreshold.to_string(), "coverage-threshold");
        let json = serde_json::to_string(&ErrorCategory::PrUpdate).expect("serialize");
        assert_eq!(json, "\"pr-update\"");
    }

    #[test]
    fn display_validation() {
        let err = CoreError::Validation("branch missing".to_string());
        assert_eq!(err.to_string(), "Validation failed: branch missing");
    }
}
