//! Test-runner output parsing.
//!
//! [`parse_test_output`] is a pure function over the captured text of a
//! test command. It recognises the summary lines in [`SUMMARY_PATTERNS`]
//! and collects individual failures from lines in the
//! [`FAILURE_LINE_PATTERN`] shape.
//!
//! Fallback when no summary line matches: the counts are estimated from the
//! collected failures (`failed = total = failures.len()`, `passed = 0`), and
//! are all zero when no failure lines are found either.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Pattern table
// ---------------------------------------------------------------------------

/// Recognised summary-line formats, tried in order.
///
/// | Name            | Example                                         |
/// |-----------------|-------------------------------------------------|
/// | `vitest`        | `Tests  12 passed \| 3 failed (15 total)`        |
/// | `vitest`        | `Tests  3 failed \| 12 passed (15)`              |
/// | `jest`          | `Tests:       3 failed, 12 passed, 15 total`     |
pub const SUMMARY_PATTERNS: &[(&str, &str)] = &[
    ("vitest", r"(?m)^\s*Tests\s{2,}(?P<body>[^()\n]*?)\s*\((?P<total>\d+)(?:\s+total)?\)\s*$"),
    ("jest", r"(?m)^\s*Tests:\s+(?P<body>[^\n]*?\d+\s+total)\s*$"),
];

/// Individual failure markers emitted by common runners.
pub const FAILURE_LINE_PATTERN: &str = r"^\s*(?:FAIL|×|✗|✕)\s+(?P<name>.+?)\s*$";

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid regex"));

static SUMMARY_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    SUMMARY_PATTERNS
        .iter()
        .map(|(name, pattern)| (*name, Regex::new(pattern).expect("valid regex")))
        .collect()
});

static FAILURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(FAILURE_LINE_PATTERN).expect("valid regex"));

static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<count>\d+)\s+(?P<kind>passed|failed|skipped|todo|total)").expect("valid regex")
});

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub name: String,
    pub message: String,
}

/// Parsed summary of one test command run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
    pub failures: Vec<TestFailure>,
    /// Name of the matched summary pattern, `None` when the fallback was used.
    pub format: Option<String>,
}

impl TestResult {
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Strip ANSI colour/control sequences from runner output.
pub fn strip_ansi(output: &str) -> String {
    ANSI_RE.replace_all(output, "").into_owned()
}

/// Parse test-runner output into counts and failures.
pub fn parse_test_output(output: &str) -> TestResult {
    let clean = strip_ansi(output);
    let failures = collect_failures(&clean);

    for (name, re) in SUMMARY_RES.iter() {
        // Use the last match: watch-mode runners may print several summaries.
        if let Some(caps) = re.captures_iter(&clean).last() {
            let body = caps.name("body").map(|m| m.as_str()).unwrap_or_default();
            let (passed, failed, explicit_total) = count_segments(body);
            let total = caps
                .name("total")
                .and_then(|m| m.as_str().parse().ok())
                .or(explicit_total)
                .unwrap_or(passed + failed);

            return TestResult {
                passed,
                failed,
                total,
                failures,
                format: Some((*name).to_string()),
            };
        }
    }

    let failed = failures.len() as u32;
    TestResult {
        passed: 0,
        failed,
        total: failed,
        failures,
        format: None,
    }
}

/// Extract `N passed`, `N failed`, and `N total` counts from a summary body.
fn count_segments(body: &str) -> (u32, u32, Option<u32>) {
    let mut passed = 0;
    let mut failed = 0;
    let mut total = None;

    for caps in COUNT_RE.captures_iter(body) {
        let count: u32 = caps["count"].parse().unwrap_or(0);
        match &caps["kind"] {
            "passed" => passed = count,
            "failed" => failed = count,
            "total" => total = Some(count),
            _ => {}
        }
    }

    (passed, failed, total)
}

/// Collect failure lines, pairing each with the following detail line when
/// it looks like an assertion message.
fn collect_failures(output: &str) -> Vec<TestFailure> {
    let lines: Vec<&str> = output.lines().collect();
    let mut failures: Vec<TestFailure> = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some(caps) = FAILURE_RE.captures(line) else {
            continue;
        };
        let name = caps["name"].to_string();
        if failures.iter().any(|f| f.name == name) {
            continue;
        }

        let message = lines[idx + 1..]
            .iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .filter(|l| l.starts_with('→') || l.contains("Error"))
            .map(|l| l.trim_start_matches('→').trim().to_string())
            .unwrap_or_default();

        failures.push(TestFailure { name, message });
    }

    failures
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vitest_passed_then_failed_with_total() {
        let out = " Test Files  2 passed (2)\n      Tests  12 passed | 3 failed (15 total)\n";
        let r = parse_test_output(out);
        assert_eq!((r.passed, r.failed, r.total), (12, 3, 15));
        assert_eq!(r.format.as_deref(), Some("vitest"));
    }

    #[test]
    fn vitest_failed_first_without_total_word() {
        let r = parse_test_output("      Tests  3 failed | 12 passed (15)\n");
        assert_eq!((r.passed, r.failed, r.total), (12, 3, 15));
    }

    #[test]
    fn vitest_all_passing() {
        let r = parse_test_output("      Tests  40 passed (40)\n");
        assert_eq!((r.passed, r.failed, r.total), (40, 0, 40));
        assert!(r.all_passed());
    }

    #[test]
    fn jest_summary() {
        let out = "Test Suites: 1 failed, 4 passed, 5 total\nTests:       2 failed, 30 passed, 32 total\n";
        let r = parse_test_output(out);
        assert_eq!((r.passed, r.failed, r.total), (30, 2, 32));
        assert_eq!(r.format.as_deref(), Some("jest"));
    }

    #[test]
    fn jest_all_passing() {
        let r = parse_test_output("Tests:       7 passed, 7 total\n");
        assert_eq!((r.passed, r.failed, r.total), (7, 0, 7));
    }

    #[test]
    fn ansi_codes_are_ignored() {
        let out = "\x1b[1m      Tests  \x1b[22m\x1b[32m5 passed\x1b[39m (5)\n";
        let r = parse_test_output(out);
        assert_eq!((r.passed, r.failed, r.total), (5, 0, 5));
    }

    #[test]
    fn failures_are_collected_with_messages() {
        let out = "\
 × adds numbers
   → expected 3 to be 4
 FAIL  src/math.test.ts > subtracts
AssertionError: expected 1 to be 0
      Tests  2 failed | 1 passed (3)
";
        let r = parse_test_output(out);
        assert_eq!(r.failures.len(), 2);
        assert_eq!(r.failures[0].name, "adds numbers");
        assert_eq!(r.failures[0].message, "expected 3 to be 4");
        assert_eq!(r.failures[1].name, "src/math.test.ts > subtracts");
        assert!(r.failures[1].message.starts_with("AssertionError"));
    }

    #[test]
    fn fallback_estimates_from_failures() {
        let out = "✗ login works\n✗ logout works\n✗ login works\n";
        let r = parse_test_output(out);
        assert_eq!(r.format, None);
        assert_eq!((r.passed, r.failed, r.total), (0, 2, 2));
    }

    #[test]
    fn fallback_is_zero_without_any_match() {
        let r = parse_test_output("compiling...\ndone\n");
        assert_eq!(r, TestResult::default());
        assert!(r.all_passed());
    }
}
