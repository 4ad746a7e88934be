//! Per-run results and their rendering.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::coverage::CoverageResult;
use super::state::{FailureReason, GateState};
use super::step::StepKind;

/// File name of the JSON summary written under the reports root.
pub const SUMMARY_FILE_NAME: &str = "gate_summary.json";

/// Outcome of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Tool exited 0.
    Passed,
    /// Lenient tool failed; the run continued.
    Warned,
    /// Required tool failed; the run stopped here.
    Failed,
}

impl StepStatus {
    fn marker(&self) -> &'static str {
        match self {
            Self::Passed => "✅",
            Self::Warned => "⚠️",
            Self::Failed => "❌",
        }
    }
}

/// Record of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step key.
    pub step: String,
    /// Step kind.
    pub kind: StepKind,
    /// Whether failure would abort the run.
    pub required: bool,
    /// Outcome.
    pub status: StepStatus,
    /// Tool exit code (absent when the tool never ran or was killed).
    pub exit_code: Option<i32>,
    /// Run time in milliseconds.
    pub duration_ms: u64,
    /// Report artifact, relative to the project directory.
    pub artifact: Option<PathBuf>,
    /// Failure or warning description.
    pub detail: Option<String>,
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique id of this run.
    pub run_id: String,
    /// When the first step started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state.
    pub finished_at: DateTime<Utc>,
    /// Executed steps, in order.
    pub steps: Vec<StepRecord>,
    /// Coverage, when the coverage check parsed the summary.
    pub coverage: Option<CoverageResult>,
    /// Configured minimum coverage after rounding.
    pub min_coverage: f64,
    /// Terminal state.
    pub outcome: GateState,
}

impl RunReport {
    /// Whether the quality gate passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome == GateState::Success
    }

    /// Failure reason, if the gate failed.
    #[must_use]
    pub fn failure(&self) -> Option<&FailureReason> {
        self.outcome.failure()
    }

    /// Process exit code: 0 on success.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.failure().map_or(0, FailureReason::exit_code)
    }

    /// Step keys in execution order.
    #[must_use]
    pub fn step_order(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.step.as_str()).collect()
    }

    /// Record for a step, if it ran.
    #[must_use]
    pub fn step(&self, kind: StepKind) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.kind == kind)
    }

    /// Records with the lenient-warning status.
    #[must_use]
    pub fn warnings(&self) -> Vec<&StepRecord> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Warned)
            .collect()
    }

    /// Sum of step durations in milliseconds.
    #[must_use]
    pub fn total_duration_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.duration_ms).sum()
    }

    /// Format a summary for display.
    #[must_use]
    pub fn format(&self) -> String {
        let mut output = String::new();

        output.push_str("## Quality Gate Summary\n\n");

        for record in &self.steps {
            let policy = if record.required { "" } else { " (lenient)" };
            output.push_str(&format!(
                "{} {}{}: {:?} ({}ms)\n",
                record.status.marker(),
                record.kind.title(),
                policy,
                record.status,
                record.duration_ms
            ));
            if let Some(detail) = &record.detail {
                for line in detail.lines() {
                    output.push_str(&format!("    {}\n", line));
                }
            }
        }

        match &self.coverage {
            Some(cov) => output.push_str(&format!(
                "\n**Coverage**: {} (required {:.1}%)\n",
                cov, self.min_coverage
            )),
            None => output.push_str(&format!(
                "\n**Coverage**: not evaluated (required {:.1}%)\n",
                self.min_coverage
            )),
        }

        output.push_str(&format!("**Total time**: {}ms\n", self.total_duration_ms()));

        match self.failure() {
            None => output.push_str("\n✅ **Quality gate passed**\n"),
            Some(reason) => {
                output.push_str(&format!(
                    "\n❌ **Quality gate failed at '{}'**: {}\n",
                    reason.step(),
                    reason
                ));
            }
        }

        output
    }

    /// Write the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report to {}", path.display()))
    }

    /// Read a report previously written by [`write_json`](Self::write_json).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run report {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse run report {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(kind: StepKind, status: StepStatus) -> StepRecord {
        StepRecord {
            step: kind.key().to_string(),
            kind,
            required: kind.is_required(),
            status,
            exit_code: Some(if status == StepStatus::Passed { 0 } else { 1 }),
            duration_ms: 100,
            artifact: None,
            detail: None,
        }
    }

    fn report(steps: Vec<StepRecord>, outcome: GateState) -> RunReport {
        let now = Utc::now();
        RunReport {
            run_id: "run-1".to_string(),
            started_at: now,
            finished_at: now,
            steps,
            coverage: CoverageResult::from_line_rate(0.853).ok(),
            min_coverage: 80.0,
            outcome,
        }
    }

    #[test]
    fn test_passed_report() {
        let r = report(
            StepKind::ALL
                .iter()
                .map(|k| record(*k, StepStatus::Passed))
                .collect(),
            GateState::Success,
        );
        assert!(r.passed());
        assert_eq!(r.exit_code(), 0);
        assert_eq!(r.total_duration_ms(), 500);
        assert_eq!(r.step_order(), vec!["format", "lint", "security", "deps", "test"]);

        let text = r.format();
        assert!(text.contains("Quality Gate Summary"));
        assert!(text.contains("85.3%"));
        assert!(text.contains("Quality gate passed"));
    }

    #[test]
    fn test_failed_report_format() {
        let mut lint = record(StepKind::Lint, StepStatus::Failed);
        lint.detail = Some("linter reported 2 problem(s)".to_string());
        let r = report(
            vec![record(StepKind::Format, StepStatus::Passed), lint],
            GateState::Failure(FailureReason::ToolFailed {
                step: "lint".into(),
                exit_code: Some(1),
                message: "linter reported 2 problem(s)".into(),
            }),
        );
        assert!(!r.passed());
        assert_eq!(r.exit_code(), 1);

        let text = r.format();
        assert!(text.contains("❌ Lint: Failed"));
        assert!(text.contains("    linter reported 2 problem(s)"));
        assert!(text.contains("failed at 'lint'"));
    }

    #[test]
    fn test_warnings_listed() {
        let r = report(
            vec![
                record(StepKind::SecurityScan, StepStatus::Passed),
                record(StepKind::DepScan, StepStatus::Warned),
            ],
            GateState::Success,
        );
        assert_eq!(r.warnings().len(), 1);
        assert!(r.format().contains("⚠️ Dependency scan (lenient): Warned"));
        assert_eq!(r.step(StepKind::DepScan).unwrap().status, StepStatus::Warned);
        assert!(r.step(StepKind::Test).is_none());
    }

    #[test]
    fn test_json_round_trip_on_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SUMMARY_FILE_NAME);
        let r = report(vec![record(StepKind::Format, StepStatus::Passed)], GateState::Success);

        r.write_json(&path).unwrap();
        let loaded = RunReport::read_json(&path).unwrap();
        assert_eq!(loaded, r);
    }
}
