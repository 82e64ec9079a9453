//! Pipeline execution records.
//!
//! [`PipelineExecutionResult`] is built up phase by phase by the
//! orchestrator and is the authoritative record used for reporting and
//! artifact upload.

use serde::{Deserialize, Serialize};

use crate::coverage::CoverageResult;
use crate::test_report::TestResult;
use crate::types::Environment;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// The five fixed pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "checkout")]
    Checkout,
    #[serde(rename = "steering")]
    Steering,
    #[serde(rename = "kiro-cli")]
    KiroCli,
    #[serde(rename = "tests")]
    Tests,
    #[serde(rename = "pull-request")]
    PullRequest,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Checkout,
        Phase::Steering,
        Phase::KiroCli,
        Phase::Tests,
        Phase::PullRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkout => "checkout",
            Self::Steering => "steering",
            Self::KiroCli => "kiro-cli",
            Self::Tests => "tests",
            Self::PullRequest => "pull-request",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseResult {
    pub phase: Phase,
    pub success: bool,
    pub duration_ms: u64,
    /// Sanitised error message when the phase did not succeed.
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// Outcome of one code-generation CLI invocation.
///
/// On timeout this still carries whatever output and file changes were
/// captured before the process was terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub modified_files: Vec<String>,
    pub errors: Option<Vec<String>>,
    pub timed_out: bool,
    pub partial_result: bool,
}

// ---------------------------------------------------------------------------
// PipelineExecutionResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PipelineArtifacts {
    pub modified_files: Vec<String>,
    pub cli_output: Option<String>,
    pub test_result: Option<TestResult>,
    pub coverage_result: Option<CoverageResult>,
    pub pr_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineExecutionResult {
    pub success: bool,
    pub execution_id: String,
    pub environment: Environment,
    pub branch_name: String,
    /// Append-only, in execution order.
    pub phases: Vec<PhaseResult>,
    pub duration_ms: u64,
    pub errors: Vec<String>,
    pub artifacts: PipelineArtifacts,
}

impl PipelineExecutionResult {
    pub fn new(
        execution_id: impl Into<String>,
        environment: Environment,
        branch_name: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            execution_id: execution_id.into(),
            environment,
            branch_name: branch_name.into(),
            phases: Vec::new(),
            duration_ms: 0,
            errors: Vec::new(),
            artifacts: PipelineArtifacts::default(),
        }
    }

    /// Errors of every unsuccessful phase, in execution order.
    pub fn phase_errors(&self) -> Vec<String> {
        self.phases
            .iter()
            .filter(|p| !p.success)
            .filter_map(|p| p.error.clone())
            .collect()
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn all_phases_succeeded(&self) -> bool {
        !self.phases.is_empty() && self.phases.iter().all(|p| p.success)
    }

    /// One line per attempted phase, e.g. `checkout: passed (120ms)`.
    pub fn phase_summary(&self) -> Vec<String> {
        self.phases
            .iter()
            .map(|p| {
                let status = if p.success { "passed" } else { "failed" };
                match &p.error {
                    Some(err) => format!("{}: {status} ({}ms) - {err}", p.phase, p.duration_ms),
                    None => format!("{}: {status} ({}ms)", p.phase, p.duration_ms),
                }
            })
            .collect()
    }
}
