//! Coverage summary analysis.
//!
//! Reads the `total.{lines,functions,branches,statements}.pct` shape emitted
//! by istanbul-style `coverage-summary.json` files and checks it against a
//! single uniform threshold.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default minimum coverage percentage.
pub const DEFAULT_COVERAGE_THRESHOLD: f64 = 80.0;

#[derive(Debug, Deserialize)]
struct CoverageSummary {
    total: CoverageTotals,
}

#[derive(Debug, Deserialize)]
struct CoverageTotals {
    lines: MetricSummary,
    functions: MetricSummary,
    branches: MetricSummary,
    statements: MetricSummary,
}

#[derive(Debug, Deserialize)]
struct MetricSummary {
    #[serde(deserialize_with = "pct_or_unknown")]
    pct: f64,
}

/// Istanbul writes `"Unknown"` when a metric has nothing to measure (no
/// branches in the code, say). Nothing uncovered means fully covered, so the
/// gate is not failed by an empty metric.
fn pct_or_unknown<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("pct out of range")),
        serde_json::Value::String(s) if s == "Unknown" => Ok(100.0),
        other => Err(serde::de::Error::custom(format!("unexpected pct value {other}"))),
    }
}

/// Coverage figures for a run, judged against `threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageResult {
    pub lines: f64,
    pub functions: f64,
    pub branches: f64,
    pub statements: f64,
    /// Arithmetic mean of the four sub-metrics.
    pub percentage: f64,
    pub threshold: f64,
    /// True only when the mean and every sub-metric reach the threshold.
    pub meets_threshold: bool,
}

impl CoverageResult {
    pub fn from_metrics(
        lines: f64,
        functions: f64,
        branches: f64,
        statements: f64,
        threshold: f64,
    ) -> Self {
        let percentage = (lines + functions + branches + statements) / 4.0;
        let every_metric_ok = [lines, functions, branches, statements]
            .iter()
            .all(|m| *m >= threshold);

        Self {
            lines,
            functions,
            branches,
            statements,
            percentage,
            threshold,
            meets_threshold: percentage >= threshold && every_metric_ok,
        }
    }

    /// Named sub-metrics below the threshold, in report order.
    pub fn failing_metrics(&self) -> Vec<(&'static str, f64)> {
        self.metrics()
            .into_iter()
            .filter(|(_, value)| *value < self.threshold)
            .collect()
    }

    /// The four sub-metrics in report order.
    pub fn metrics(&self) -> [(&'static str, f64); 4] {
        [
            ("lines", self.lines),
            ("functions", self.functions),
            ("branches", self.branches),
            ("statements", self.statements),
        ]
    }

    /// Human-readable reason for a threshold miss.
    pub fn shortfall_message(&self) -> String {
        let failing: Vec<String> = self
            .failing_metrics()
            .iter()
            .map(|(name, value)| format!("{name} {value:.2}%"))
            .collect();

        if failing.is_empty() {
            format!(
                "Coverage {:.2}% is below threshold {:.2}%",
                self.percentage, self.threshold
            )
        } else {
            format!(
                "Coverage {:.2}% does not meet threshold {:.2}% (below threshold: {})",
                self.percentage,
                self.threshold,
                failing.join(", ")
            )
        }
    }
}

/// Parse a coverage summary JSON document and evaluate it.
pub fn analyze_coverage(summary_json: &str, threshold: f64) -> Result<CoverageResult, CoreError> {
    let summary: CoverageSummary = serde_json::from_str(summary_json)
        .map_err(|e| CoreError::Parse(format!("Invalid coverage summary: {e}")))?;
    let t = summary.total;

    Ok(CoverageResult::from_metrics(
        t.lines.pct,
        t.functions.pct,
        t.branches.pct,
        t.statements.pct,
        threshold,
    ))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn summary(lines: f64, functions: f64, branches: f64, statements: f64) -> String {
        serde_json::json!({
            "total": {
                "lines": {"total": 100, "covered": 0, "skipped": 0, "pct": lines},
                "functions": {"pct": functions},
                "branches": {"pct": branches},
                "statements": {"pct": statements}
            },
            "src/index.ts": {"lines": {"pct": 1}}
        })
        .to_string()
    }

    #[test]
    fn mean_of_four_metrics() {
        let r = analyze_coverage(&summary(90.0, 80.0, 70.0, 100.0), 50.0).expect("parse");
        assert!((r.percentage - 85.0).abs() < f64::EPSILON);
        assert!(r.meets_threshold);
    }

    #[test]
    fn single_low_metric_fails_despite_high_mean() {
        let r = analyze_coverage(&summary(95.0, 95.0, 95.0, 60.0), 80.0).expect("parse");
        assert!((r.percentage - 86.25).abs() < 1e-9);
        assert!(!r.meets_threshold);
        assert_eq!(r.failing_metrics(), vec![("statements", 60.0)]);
        assert!(r.shortfall_message().contains("statements 60.00%"));
    }

    #[test]
    fn exactly_at_threshold_passes() {
        let r = CoverageResult::from_metrics(80.0, 80.0, 80.0, 80.0, 80.0);
        assert!(r.meets_threshold);
    }

    #[test]
    fn unknown_pct_counts_as_fully_covered() {
        let json = r#"{"total":{"lines":{"pct":92.5},"functions":{"pct":88},
            "branches":{"pct":"Unknown"},"statements":{"pct":90}}}"#;
        let r = analyze_coverage(json, 80.0).expect("parse");
        assert_eq!(r.branches, 100.0);
        assert!(r.failing_metrics().is_empty());
        assert!(r.meets_threshold);
    }

    #[test]
    fn unknown_pct_does_not_hide_a_real_shortfall() {
        let json = r#"{"total":{"lines":{"pct":"Unknown"},"functions":{"pct":40},
            "branches":{"pct":"Unknown"},"statements":{"pct":"Unknown"}}}"#;
        let r = analyze_coverage(json, 80.0).expect("parse");
        assert_eq!(r.failing_metrics(), vec![("functions", 40.0)]);
        assert!(!r.meets_threshold);
    }

    #[test]
    fn other_non_numeric_pct_is_parse_error() {
        let json = r#"{"total":{"lines":{"pct":"n/a"},"functions":{"pct":100},
            "branches":{"pct":100},"statements":{"pct":100}}}"#;
        assert_matches!(analyze_coverage(json, 80.0), Err(CoreError::Parse(_)));
    }

    #[test]
    fn malformed_summary_is_parse_error() {
        assert_matches!(analyze_coverage("{\"total\":{}}", 80.0), Err(CoreError::Parse(_)));
        assert_matches!(analyze_coverage("not json", 80.0), Err(CoreError::Parse(_)));
    }
}
