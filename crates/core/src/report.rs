//! Markdown report pushed as the pull request body.

use std::fmt::Write;

use crate::coverage::CoverageResult;
use crate::test_report::TestResult;
use crate::types::{Environment, Timestamp};

/// Maximum number of failure entries rendered in the report.
const MAX_FAILURES_IN_REPORT: usize = 20;

/// Everything the report needs, borrowed from the pipeline result.
#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub task_id: &'a str,
    pub build_id: &'a str,
    pub build_url: Option<&'a str>,
    pub environment: Environment,
    pub timestamp: Timestamp,
    pub test_result: Option<&'a TestResult>,
    pub coverage: Option<&'a CoverageResult>,
    pub modified_files: &'a [String],
}

impl ReportContext<'_> {
    fn passed(&self) -> bool {
        let tests_ok = self.test_result.map_or(true, TestResult::all_passed);
        let coverage_ok = self.coverage.map_or(true, |c| c.meets_threshold);
        tests_ok && coverage_ok
    }
}

/// Render the pull request body.
pub fn compose_pr_report(ctx: &ReportContext<'_>) -> String {
    let mut md = String::new();
    let badge = if ctx.passed() {
        "![status](https://img.shields.io/badge/build-passing-brightgreen)"
    } else {
        "![status](https://img.shields.io/badge/build-failing-red)"
    };

    // Writing to a String cannot fail.
    let _ = writeln!(md, "## Kiro Worker Report {badge}");
    let _ = writeln!(md);
    let _ = writeln!(md, "| Field | Value |");
    let _ = writeln!(md, "|-------|-------|");
    let _ = writeln!(md, "| Task | `{}` |", ctx.task_id);
    match ctx.build_url {
        Some(url) => {
            let _ = writeln!(md, "| Build | [{}]({url}) |", ctx.build_id);
        }
        None => {
            let _ = writeln!(md, "| Build | `{}` |", ctx.build_id);
        }
    }
    let _ = writeln!(md, "| Environment | {} |", ctx.environment);
    let _ = writeln!(md, "| Timestamp | {} |", ctx.timestamp.to_rfc3339());

    let _ = writeln!(md);
    let _ = writeln!(md, "### Tests");
    let _ = writeln!(md);
    match ctx.test_result {
        Some(t) => {
            let status = if t.all_passed() { "✅ Passed" } else { "❌ Failed" };
            let _ = writeln!(md, "**{status}**: {} passed, {} failed, {} total", t.passed, t.failed, t.total);
        }
        None => {
            let _ = writeln!(md, "_No test results recorded._");
        }
    }

    let _ = writeln!(md);
    let _ = writeln!(md, "### Coverage");
    let _ = writeln!(md);
    match ctx.coverage {
        Some(c) => {
            let _ = writeln!(md, "| Metric | % | Threshold |");
            let _ = writeln!(md, "|--------|---|-----------|");
            for (name, value) in c.metrics() {
                let mark = if value >= c.threshold { "✅" } else { "❌" };
                let _ = writeln!(md, "| {name} | {value:.2} | {mark} {:.0} |", c.threshold);
            }
            let _ = writeln!(md, "| **overall** | **{:.2}** | |", c.percentage);
        }
        None => {
            let _ = writeln!(md, "_No coverage report recorded._");
        }
    }

    if let Some(t) = ctx.test_result.filter(|t| !t.failures.is_empty()) {
        let _ = writeln!(md);
        let _ = writeln!(md, "### Failures");
        let _ = writeln!(md);
        for failure in t.failures.iter().take(MAX_FAILURES_IN_REPORT) {
            if failure.message.is_empty() {
                let _ = writeln!(md, "- `{}`", failure.name);
            } else {
                let _ = writeln!(md, "- `{}`: {}", failure.name, failure.message);
            }
        }
        if t.failures.len() > MAX_FAILURES_IN_REPORT {
            let _ = writeln!(md, "- … and {} more", t.failures.len() - MAX_FAILURES_IN_REPORT);
        }
    }

    if !ctx.modified_files.is_empty() {
        let _ = writeln!(md);
        let _ = writeln!(md, "<details><summary>Modified files ({})</summary>", ctx.modified_files.len());
        let _ = writeln!(md);
        for file in ctx.modified_files {
            let _ = writeln!(md, "- `{file}`");
        }
        let _ = writeln!(md);
        let _ = writeln!(md, "</details>");
    }

    md
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::test_report::TestFailure;

    fn context<'a>(
        tests: Option<&'a TestResult>,
        coverage: Option<&'a CoverageResult>,
        files: &'a [String],
    ) -> ReportContext<'a> {
        ReportContext {
            task_id: "1.2",
            build_id: "kiro-worker:abc",
            build_url: Some("https://console.aws.amazon.com/codebuild/abc"),
            environment: Environment::Staging,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            test_result: tests,
            coverage,
            modified_files: files,
        }
    }

    #[test]
    fn passing_report_has_counts_and_metrics() {
        let tests = TestResult {
            passed: 10,
            failed: 0,
            total: 10,
            failures: vec![],
            format: Some("vitest".into()),
        };
        let coverage = CoverageResult::from_metrics(90.0, 85.0, 82.0, 91.0, 80.0);
        let files = vec!["src/lock.ts".to_string()];
        let md = compose_pr_report(&context(Some(&tests), Some(&coverage), &files));

        assert!(md.contains("build-passing"));
        assert!(md.contains("| Task | `1.2` |"));
        assert!(md.contains("[kiro-worker:abc](https://console.aws.amazon.com/codebuild/abc)"));
        assert!(md.contains("| Environment | staging |"));
        assert!(md.contains("10 passed, 0 failed, 10 total"));
        for metric in ["lines", "functions", "branches", "statements"] {
            assert!(md.contains(&format!("| {metric} |")), "missing {metric}");
        }
        assert!(md.contains("`src/lock.ts`"));
    }

    #[test]
    fn failing_report_lists_failures() {
        let tests = TestResult {
            passed: 1,
            failed: 1,
            total: 2,
            failures: vec![TestFailure {
                name: "adds".into(),
                message: "expected 3 to be 4".into(),
            }],
            format: None,
        };
        let md = compose_pr_report(&context(Some(&tests), None, &[]));
        assert!(md.contains("build-failing"));
        assert!(md.contains("❌ Failed"));
        assert!(md.contains("- `adds`: expected 3 to be 4"));
        assert!(md.contains("_No coverage report recorded._"));
    }

    #[test]
    fn low_coverage_marks_report_failing() {
        let coverage = CoverageResult::from_metrics(95.0, 95.0, 95.0, 60.0, 80.0);
        let md = compose_pr_report(&context(None, Some(&coverage), &[]));
        assert!(md.contains("build-failing"));
        assert!(md.contains("| statements | 60.00 | ❌ 80 |"));
    }
}
