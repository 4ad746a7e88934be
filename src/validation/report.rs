//! Validation report rendering.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::junit::JunitSummary;
use crate::quality::coverage::{CoverageResult, ThresholdPolicy};
use crate::quality::step::StepKind;
use crate::quality::summary::{RunReport, StepStatus};

const SIGNATURE_ROLES: [&str; 3] = ["QA Reviewer", "Validation Manager", "Quality Director"];

/// Coverage figures for the report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    /// Line coverage in percent.
    pub percent: f64,
    pub lines_covered: Option<u64>,
    pub lines_total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CoverageJson {
    totals: CoverageTotals,
}

#[derive(Debug, Deserialize)]
struct CoverageTotals {
    percent_covered: f64,
    covered_lines: Option<u64>,
    num_statements: Option<u64>,
}

impl CoverageSummary {
    /// Parse a coverage.py JSON report (`coverage json`).
    ///
    /// # Errors
    ///
    /// Returns an error if the document has no `totals.percent_covered`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let parsed: CoverageJson =
            serde_json::from_str(json).context("Failed to parse coverage JSON")?;
        Ok(Self {
            percent: parsed.totals.percent_covered,
            lines_covered: parsed.totals.covered_lines,
            lines_total: parsed.totals.num_statements,
        })
    }

    /// Build from a parsed coverage XML summary.
    #[must_use]
    pub fn from_xml_result(result: &CoverageResult) -> Self {
        Self {
            percent: result.line_rate * 100.0,
            lines_covered: None,
            lines_total: None,
        }
    }

    /// Load coverage from a `.json` or XML file.
    ///
    /// Missing or unparseable files yield `None` with a warning; the report
    /// then states that coverage is not available.
    #[must_use]
    pub fn load(path: &Path) -> Option<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Coverage file not found");
            return None;
        }

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let loaded = if is_json {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))
                .and_then(|json| Self::from_json_str(&json))
        } else {
            CoverageResult::from_file(path)
                .map(|r| Self::from_xml_result(&r))
                .map_err(anyhow::Error::from)
        };

        match loaded {
            Ok(summary) => {
                info!(percent = summary.percent, "Loaded coverage");
                Some(summary)
            }
            Err(e) => {
                warn!(error = %e, "Could not parse coverage data");
                None
            }
        }
    }
}

/// Format a duration in seconds for humans.
///
/// `<1s` as milliseconds, `<60s` with two decimals, otherwise minutes and
/// seconds.
#[must_use]
pub fn format_duration(seconds: f64) -> String {
    if seconds < 1.0 {
        format!("{:.0}ms", seconds * 1000.0)
    } else if seconds < 60.0 {
        format!("{:.2}s", seconds)
    } else {
        let mins = (seconds / 60.0).floor();
        format!("{}m {:.1}s", mins as u64, seconds - mins * 60.0)
    }
}

/// A validation report built from test results, coverage and (optionally)
/// the last gate run.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub generated_at: DateTime<Utc>,
    pub commit: Option<String>,
    pub tests: JunitSummary,
    pub coverage: Option<CoverageSummary>,
    pub threshold: ThresholdPolicy,
    pub gate_run: Option<RunReport>,
}

impl ValidationReport {
    /// Create a report for the given test results.
    #[must_use]
    pub fn new(tests: JunitSummary) -> Self {
        Self {
            generated_at: Utc::now(),
            commit: None,
            tests,
            coverage: None,
            threshold: ThresholdPolicy::default(),
            gate_run: None,
        }
    }

    /// Set the commit SHA.
    #[must_use]
    pub fn with_commit(mut self, commit: Option<String>) -> Self {
        self.commit = commit.filter(|c| !c.trim().is_empty());
        self
    }

    /// Set coverage figures.
    #[must_use]
    pub fn with_coverage(mut self, coverage: Option<CoverageSummary>) -> Self {
        self.coverage = coverage;
        self
    }

    /// Set the coverage threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: ThresholdPolicy) -> Self {
        self.threshold = threshold;
        self
    }

    /// Attach the gate run whose step statuses fill the gate table.
    #[must_use]
    pub fn with_gate_run(mut self, run: Option<RunReport>) -> Self {
        self.gate_run = run;
        self
    }

    /// Pin the generation time.
    #[must_use]
    pub fn with_generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = at;
        self
    }

    /// No failed or errored tests.
    #[must_use]
    pub fn tests_passed(&self) -> bool {
        self.tests.failed() == 0
    }

    /// Coverage absent or at least the threshold.
    #[must_use]
    pub fn coverage_met(&self) -> bool {
        self.coverage
            .map_or(true, |c| self.threshold.is_percent_met(c.percent))
    }

    /// Overall validation verdict.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.tests_passed() && self.coverage_met()
    }

    fn status_label(&self) -> &'static str {
        if self.passed() {
            "✅ PASSED"
        } else {
            "❌ FAILED"
        }
    }

    /// Render the report as markdown.
    #[must_use]
    pub fn render(&self) -> String {
        let timestamp = self.generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
        let mut lines: Vec<String> = Vec::new();

        // Executive summary
        lines.push("# GxP Validation Report\n".into());
        lines.push("## Executive Summary\n".into());
        lines.push(format!("**Generated:** {}", timestamp));
        lines.push(format!(
            "**Commit SHA:** {}",
            self.commit.as_deref().unwrap_or("N/A")
        ));
        lines.push(format!("**Validation Status:** {}", self.status_label()));
        lines.push(format!(
            "**Overall Result:** {}\n",
            if self.passed() {
                "All validation criteria met"
            } else {
                "Validation criteria not met"
            }
        ));
        lines.push("---\n".into());

        // Tests
        lines.push("## Test Execution Results\n".into());
        lines.push("### Test Results Summary\n".into());
        lines.push(self.test_table());
        lines.push(String::new());

        let failed = self.tests.failed_tests();
        if !failed.is_empty() {
            lines.push("## ⚠️ Failed Tests\n".into());
            lines.push("The following tests failed during execution:\n".into());
            for (i, test) in failed.iter().enumerate() {
                lines.push(format!("### {}. {}.{}\n", i + 1, test.classname, test.name));
                lines.push("```".into());
                lines.push(test.message.clone().unwrap_or_else(|| "No message".into()));
                lines.push("```\n".into());
            }
        }

        // Coverage
        lines.push("### Coverage Analysis\n".into());
        lines.push(self.coverage_table());
        lines.push("\n---\n".into());

        // Gates
        lines.push("## Quality Gates Status\n".into());
        lines.push(self.gate_table());
        lines.push("\n---\n".into());

        // Evidence
        lines.push("## Evidence Artifacts\n".into());
        lines.push("Validation evidence collected for this run:\n".into());
        for item in [
            "📄 JUnit test execution results (XML)",
            "📊 HTML test report with detailed results",
            "📈 Code coverage report (HTML + XML)",
            "🔒 Security scan results (bandit + safety)",
            "📝 Hash-chained audit log with execution metadata",
            "📋 This validation summary report",
        ] {
            lines.push(format!("- {}", item));
        }
        if let Some(run) = &self.gate_run {
            lines.push(format!("\n**Gate Run ID:** {}", run.run_id));
            for record in run.steps.iter().filter(|r| r.artifact.is_some()) {
                if let Some(artifact) = &record.artifact {
                    lines.push(format!("- `{}` ({})", artifact.display(), record.step));
                }
            }
        }
        lines.push("\n---\n".into());

        // Signatures
        lines.push("## Approval Signatures\n".into());
        lines.push("This validation report requires approval from authorized personnel:\n".into());
        for role in SIGNATURE_ROLES {
            lines.push(format!("### {}\n", role));
            lines.push("- **Name:** ___________________________".into());
            lines.push("- **Date:** ___________________________".into());
            lines.push("- **Signature:** ______________________\n".into());
        }
        lines.push("---\n".into());

        // Conclusion
        lines.push("## Conclusion\n".into());
        if self.passed() {
            lines.push("✅ **All validation criteria have been met.**\n".into());
            lines.push(
                "The system has passed all quality gates and is approved for production \
                 deployment pending QA approval signatures.\n"
                    .into(),
            );
        } else {
            lines.push("⚠️ **Validation criteria not met.**\n".into());
            lines.push(
                "Issues must be resolved before production deployment. Review failed tests \
                 and coverage metrics above.\n"
                    .into(),
            );
        }
        lines.push(format!("**Report Generated:** {}", timestamp));

        lines.join("\n")
    }

    fn test_table(&self) -> String {
        let t = &self.tests;
        let failed = t.failed();
        let mut lines = vec![
            "| Metric | Value |".to_string(),
            "|--------|-------|".to_string(),
            format!("| **Total Tests** | {} |", t.total),
            format!("| **Passed** | ✅ {} |", t.passed()),
            format!(
                "| **Failed** | {} |",
                if failed > 0 {
                    format!("❌ {}", failed)
                } else {
                    "✅ 0".to_string()
                }
            ),
            format!("| **Skipped** | {} |", t.skipped),
            format!("| **Execution Time** | {} |", format_duration(t.time)),
        ];
        match t.pass_rate() {
            Some(rate) => lines.push(format!("| **Pass Rate** | {:.1}% |", rate)),
            None => lines.push("| **Pass Rate** | N/A |".to_string()),
        }
        lines.join("\n")
    }

    fn coverage_table(&self) -> String {
        let Some(coverage) = self.coverage else {
            return "Coverage data not available. See artifacts for details.".to_string();
        };

        let met = self.threshold.is_percent_met(coverage.percent);
        let mut lines = vec![
            "| Metric | Value | Status |".to_string(),
            "|--------|-------|--------|".to_string(),
            format!(
                "| **Code Coverage** | {:.1}% | {} |",
                coverage.percent,
                if met { "✅ Met" } else { "⚠️ Below Threshold" }
            ),
        ];
        if let (Some(covered), Some(total)) = (coverage.lines_covered, coverage.lines_total) {
            lines.push(format!("| **Lines Covered** | {} / {} | - |", covered, total));
        }
        lines.push(format!(
            "| **Requirement** | ≥{:.1}% | {} |",
            self.threshold.min_percent(),
            if met { "✅ Pass" } else { "❌ Fail" }
        ));
        lines.join("\n")
    }

    fn gate_table(&self) -> String {
        let mut lines = vec![
            "| Gate | Requirement | Status |".to_string(),
            "|------|-------------|--------|".to_string(),
            format!(
                "| **Unit Tests** | All tests pass | {} |",
                if self.tests_passed() {
                    "✅ Passed"
                } else {
                    "❌ Failed"
                }
            ),
            format!(
                "| **Code Coverage** | ≥{:.1}% | {} |",
                self.threshold.min_percent(),
                if self.coverage.is_none() {
                    "N/A"
                } else if self.coverage_met() {
                    "✅ Passed"
                } else {
                    "⚠️ Not Met"
                }
            ),
        ];

        for kind in [StepKind::Format, StepKind::Lint, StepKind::SecurityScan, StepKind::DepScan] {
            let status = match &self.gate_run {
                None => "N/A (no gate summary)",
                Some(run) => match run.step(kind).map(|r| r.status) {
                    Some(StepStatus::Passed) => "✅ Passed",
                    Some(StepStatus::Warned) => "⚠️ Warning",
                    Some(StepStatus::Failed) => "❌ Failed",
                    None => "⏭️ Not run",
                },
            };
            lines.push(format!(
                "| **{}** | {} | {} |",
                kind.title(),
                requirement(kind),
                status
            ));
        }

        lines.join("\n")
    }

    /// Render and write the report, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, self.render())
            .with_context(|| format!("Failed to write validation report {}", path.display()))?;

        info!(
            path = %path.display(),
            status = self.status_label(),
            passed = self.tests.passed(),
            total = self.tests.total,
            "Validation report generated"
        );
        Ok(())
    }
}

fn requirement(kind: StepKind) -> &'static str {
    match kind {
        StepKind::Format => "No formatting changes",
        StepKind::Lint => "No lint findings",
        StepKind::SecurityScan => "No findings at or above threshold",
        StepKind::DepScan => "Advisory only",
        StepKind::Test => "All tests pass",
    }
}
