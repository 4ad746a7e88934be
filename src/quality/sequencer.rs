//! The quality-gate sequencer.
//!
//! Runs the fixed step list one tool at a time, stopping at the first
//! required failure, then evaluates coverage from the XML the test step
//! wrote. Every run leaves `gate_summary.json` and (unless disabled) audit
//! entries under the reports root.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::coverage::{CoverageResult, ThresholdPolicy};
use super::runner::{InvocationError, ProcessRunner, ToolRunner};
use super::state::{FailureReason, GateState, StepResult};
use super::step::{describe_failure, standard_steps, CheckStep, StepKind};
use super::summary::{RunReport, StepRecord, StepStatus, SUMMARY_FILE_NAME};
use crate::audit::{file_digest, AuditLogger};
use crate::config::GateConfig;
use crate::error::{GateError, Result};

/// Runs the quality gate against one project directory.
pub struct QualityGateSequencer {
    project_dir: PathBuf,
    config: GateConfig,
    steps: Vec<CheckStep>,
    runner: Arc<dyn ToolRunner>,
}

impl std::fmt::Debug for QualityGateSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityGateSequencer")
            .field("project_dir", &self.project_dir)
            .field("config", &self.config)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

impl QualityGateSequencer {
    /// Create a sequencer that spawns real processes.
    pub fn new(project_dir: impl AsRef<Path>, config: GateConfig) -> Self {
        Self::with_runner(project_dir, config, Arc::new(ProcessRunner::new()))
    }

    /// Create a sequencer with a custom tool runner.
    pub fn with_runner(
        project_dir: impl AsRef<Path>,
        config: GateConfig,
        runner: Arc<dyn ToolRunner>,
    ) -> Self {
        let steps = standard_steps(&config);
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
            config,
            steps,
            runner,
        }
    }

    /// The planned steps, in execution order.
    #[must_use]
    pub fn steps(&self) -> &[CheckStep] {
        &self.steps
    }

    /// The configuration in effect.
    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Directory the tools run in.
    #[must_use]
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Absolute reports root.
    #[must_use]
    pub fn reports_dir(&self) -> PathBuf {
        self.config.reports_dir(&self.project_dir)
    }

    /// Coverage threshold built from the configured minimum.
    #[must_use]
    pub fn threshold(&self) -> ThresholdPolicy {
        ThresholdPolicy::new(self.config.min_coverage_percent)
    }

    /// Read the coverage XML and check it against the threshold.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::ArtifactUnreadable`] if the summary is missing or
    /// malformed, [`GateError::ThresholdViolation`] if coverage is too low.
    pub fn evaluate_coverage(&self) -> Result<CoverageResult> {
        let coverage = CoverageResult::from_file(&self.coverage_path())?;
        self.threshold().evaluate(&coverage)?;
        Ok(coverage)
    }

    fn coverage_path(&self) -> PathBuf {
        self.project_dir.join(self.config.coverage_xml())
    }

    /// Run the full sequence.
    ///
    /// Gate failures are reported through [`RunReport::outcome`]; `Err` is
    /// reserved for problems preparing the reports directory.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Io`] if the report directories cannot be created
    /// or a previous run's reports cannot be removed.
    pub async fn run(&self) -> Result<RunReport> {
        let reports_dir = self.reports_dir();
        for dir in [
            reports_dir.clone(),
            reports_dir.join("security"),
            reports_dir.join("audit"),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        self.clear_artifacts()?;

        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let threshold = self.threshold();
        let audit = self.open_audit(&reports_dir);

        info!(
            run_id = %run_id,
            project = %self.project_dir.display(),
            min_coverage = threshold.min_percent(),
            "Starting quality gate"
        );

        if let Some(logger) = &audit {
            record_audit(
                "run_started",
                logger.log_run_started(
                    &run_id,
                    &self.project_dir,
                    &self.steps,
                    threshold.min_percent(),
                ),
            );
        }

        let mut state = GateState::initial();
        let mut records = Vec::with_capacity(self.steps.len());
        let mut coverage = None;

        while !state.is_terminal() {
            let result = match state.step_kind() {
                Some(kind) => {
                    let (record, result) = self.run_step(self.step(kind)).await;
                    if let Some(logger) = &audit {
                        let digest = record
                            .artifact
                            .as_ref()
                            .and_then(|p| file_digest(&self.project_dir.join(p)));
                        record_audit(
                            "step_completed",
                            logger.log_step(&run_id, &record, digest.as_deref()),
                        );
                    }
                    records.push(record);
                    result
                }
                None => {
                    let (observed, result) = self.check_coverage(&threshold);
                    if let Some(logger) = &audit {
                        record_audit(
                            "coverage_evaluated",
                            logger.log_coverage(
                                &run_id,
                                observed.as_ref(),
                                threshold.min_percent(),
                                result == StepResult::Passed,
                            ),
                        );
                    }
                    coverage = observed;
                    result
                }
            };
            state = state.advance(result);
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            steps: records,
            coverage,
            min_coverage: threshold.min_percent(),
            outcome: state,
        };

        let summary_path = reports_dir.join(SUMMARY_FILE_NAME);
        if let Err(e) = report.write_json(&summary_path) {
            warn!(error = %e, "Failed to write gate summary");
        }

        if let Some(logger) = &audit {
            record_audit("run_finished", logger.log_run_finished(&report));
        }

        match report.failure() {
            None => info!(run_id = %report.run_id, "Quality gate passed"),
            Some(reason) => error!(
                run_id = %report.run_id,
                step = reason.step(),
                "Quality gate failed: {}",
                reason
            ),
        }

        Ok(report)
    }

    /// Remove reports left behind by an earlier run, so every artifact
    /// read or digested during this run was written by its own step.
    fn clear_artifacts(&self) -> Result<()> {
        for artifact in self.steps.iter().filter_map(|s| s.output_artifact.as_ref()) {
            let path = self.project_dir.join(artifact);
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed stale report"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn step(&self, kind: StepKind) -> &CheckStep {
        &self.steps[kind.index()]
    }

    fn open_audit(&self, reports_dir: &Path) -> Option<AuditLogger> {
        if !self.config.audit {
            return None;
        }
        match AuditLogger::new(reports_dir.join("audit")) {
            Ok(logger) => Some(logger),
            Err(e) => {
                warn!(error = %e, "Audit log unavailable");
                None
            }
        }
    }

    /// Run one tool step and classify its outcome.
    async fn run_step(&self, step: &CheckStep) -> (StepRecord, StepResult) {
        info!(step = %step.name, "Running {}", step.kind.title());
        debug!(step = %step.name, command = %step.command, timeout = ?step.timeout);

        let start = Instant::now();
        let outcome = self
            .runner
            .run(&step.name, &step.command, &self.project_dir, step.timeout)
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;
        let started = outcome.is_ok();

        let (exit_code, failure) = match outcome {
            Ok(output) => {
                if step.capture_output {
                    self.write_captured(step, &output.combined());
                }
                if output.success() {
                    (output.exit_code, None)
                } else {
                    let report = self.read_report(step);
                    let message = describe_failure(
                        step.kind,
                        &output.stdout,
                        &output.stderr,
                        report.as_deref(),
                    );
                    (
                        output.exit_code,
                        Some(FailureReason::ToolFailed {
                            step: step.name.clone(),
                            exit_code: output.exit_code,
                            message,
                        }),
                    )
                }
            }
            Err(InvocationError::NotFound { tool }) => (
                None,
                Some(FailureReason::MissingTool {
                    step: step.name.clone(),
                    tool,
                }),
            ),
            Err(InvocationError::TimedOut { timeout }) => (
                None,
                Some(FailureReason::Timeout {
                    step: step.name.clone(),
                    timeout_secs: timeout.as_secs(),
                }),
            ),
            Err(InvocationError::Io(e)) => (
                None,
                Some(FailureReason::ToolFailed {
                    step: step.name.clone(),
                    exit_code: None,
                    message: format!("could not run '{}': {}", step.command.program, e),
                }),
            ),
        };

        if step.capture_output && !started {
            if let Some(reason) = &failure {
                self.write_captured(step, &format!("{}\n", reason));
            }
        }

        let artifact = step
            .output_artifact
            .clone()
            .filter(|p| self.project_dir.join(p).exists());

        let (status, detail, result) = match failure {
            None => {
                info!(step = %step.name, duration_ms, "Step passed");
                (StepStatus::Passed, None, StepResult::Passed)
            }
            Some(reason) => {
                let detail = match &reason {
                    FailureReason::ToolFailed { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                if step.required {
                    error!(step = %step.name, duration_ms, "Step failed: {}", reason);
                    (StepStatus::Failed, Some(detail), StepResult::Failed(reason))
                } else {
                    warn!(
                        step = %step.name,
                        duration_ms,
                        "Lenient step failed, continuing: {}",
                        reason
                    );
                    (StepStatus::Warned, Some(detail), StepResult::Warned)
                }
            }
        };

        let record = StepRecord {
            step: step.name.clone(),
            kind: step.kind,
            required: step.required,
            status,
            exit_code,
            duration_ms,
            artifact,
            detail,
        };

        (record, result)
    }

    fn write_captured(&self, step: &CheckStep, content: &str) {
        let Some(artifact) = &step.output_artifact else {
            return;
        };
        let path = self.project_dir.join(artifact);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(step = %step.name, error = %e, "Failed to create report directory");
                return;
            }
        }
        if let Err(e) = std::fs::write(&path, content) {
            warn!(step = %step.name, path = %path.display(), error = %e, "Failed to write step report");
        }
    }

    /// The security report is surfaced on failure; other artifacts are not read.
    fn read_report(&self, step: &CheckStep) -> Option<String> {
        if step.kind != StepKind::SecurityScan {
            return None;
        }
        let path = self.project_dir.join(step.output_artifact.as_ref()?);
        std::fs::read_to_string(path).ok()
    }

    fn check_coverage(&self, threshold: &ThresholdPolicy) -> (Option<CoverageResult>, StepResult) {
        let path = self.coverage_path();
        info!(path = %path.display(), "Checking coverage threshold");

        let coverage = match CoverageResult::from_file(&path) {
            Ok(coverage) => coverage,
            Err(e) => return (None, failed(e)),
        };

        match threshold.evaluate(&coverage) {
            Ok(()) => {
                info!(
                    coverage = %coverage,
                    required = threshold.min_percent(),
                    "Coverage threshold met"
                );
                (Some(coverage), StepResult::Passed)
            }
            Err(e) => (Some(coverage), failed(e)),
        }
    }
}

fn failed(error: GateError) -> StepResult {
    let message = error.to_string();
    let reason = FailureReason::from_error(error).unwrap_or(FailureReason::ToolFailed {
        step: "coverage".to_string(),
        exit_code: None,
        message,
    });
    StepResult::Failed(reason)
}

fn record_audit<T>(event: &str, result: anyhow::Result<T>) {
    if let Err(e) = result {
        warn!(event, error = %e, "Failed to write audit entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLogger;
    use crate::testing::{coverage_xml, MockToolRunner};
    use std::time::Duration;
    use tempfile::TempDir;

    fn sequencer(temp: &TempDir, runner: MockToolRunner) -> (QualityGateSequencer, Arc<MockToolRunner>) {
        let runner = Arc::new(runner);
        let seq = QualityGateSequencer::with_runner(temp.path(), GateConfig::default(), runner.clone());
        (seq, runner)
    }

    fn passing(line_rate: f64) -> MockToolRunner {
        MockToolRunner::new().writes_file("test", "reports/coverage.xml", coverage_xml(line_rate))
    }

    #[tokio::test]
    async fn test_all_steps_pass() {
        let temp = TempDir::new().unwrap();
        let (seq, runner) = sequencer(&temp, passing(0.853));

        let report = seq.run().await.unwrap();

        assert!(report.passed());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(runner.steps_run(), vec!["format", "lint", "security", "deps", "test"]);
        assert_eq!(report.coverage.map(|c| c.tenths), Some(853));
        assert!(temp.path().join("reports/gate_summary.json").exists());
        assert!(temp.path().join("reports/security").is_dir());
    }

    #[tokio::test]
    async fn test_required_failure_stops_sequence() {
        let temp = TempDir::new().unwrap();
        let (seq, runner) = sequencer(&temp, passing(0.9).with_exit_code("lint", 1));

        let report = seq.run().await.unwrap();

        assert_eq!(runner.steps_run(), vec!["format", "lint"]);
        assert_eq!(report.failure().map(|r| r.step()), Some("lint"));
        assert_eq!(report.exit_code(), 1);
        assert!(report.coverage.is_none());
    }

    #[tokio::test]
    async fn test_dep_scan_failure_only_warns() {
        let temp = TempDir::new().unwrap();
        let runner = passing(0.9).with_output(
            "deps",
            crate::quality::runner::ToolOutput::with_exit_code(64).with_stdout("-> requests 2.0 CVE-2023-0001"),
        );
        let (seq, runner) = sequencer(&temp, runner);

        let report = seq.run().await.unwrap();

        assert!(report.passed());
        assert_eq!(runner.call_count(), 5);
        assert_eq!(report.step(StepKind::DepScan).unwrap().status, StepStatus::Warned);
        let captured =
            std::fs::read_to_string(temp.path().join("reports/security/safety_report.txt")).unwrap();
        assert!(captured.contains("CVE-2023-0001"));
    }

    #[tokio::test]
    async fn test_missing_required_tool() {
        let temp = TempDir::new().unwrap();
        let (seq, _) = sequencer(&temp, passing(0.9).with_missing_tool("format"));

        let report = seq.run().await.unwrap();

        assert!(matches!(
            report.failure(),
            Some(FailureReason::MissingTool { step, tool }) if step == "format" && tool == "black"
        ));
        assert_eq!(report.exit_code(), 6);
    }

    #[tokio::test]
    async fn test_timeout_fails_required_step() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(passing(0.9).with_timeout("test"));
        let config = GateConfig::default().with_timeout(StepKind::Test, 120);
        let seq = QualityGateSequencer::with_runner(temp.path(), config, runner.clone());

        let report = seq.run().await.unwrap();

        assert_eq!(
            report.failure(),
            Some(&FailureReason::Timeout {
                step: "test".to_string(),
                timeout_secs: 120
            })
        );
        assert_eq!(runner.calls()[4].timeout, Some(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn test_missing_coverage_is_artifact_error() {
        let temp = TempDir::new().unwrap();
        let (seq, _) = sequencer(&temp, MockToolRunner::new());

        let report = seq.run().await.unwrap();

        assert!(matches!(
            report.failure(),
            Some(FailureReason::ArtifactUnreadable { .. })
        ));
        assert_eq!(report.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_previous_coverage_is_not_reused() {
        let temp = TempDir::new().unwrap();

        let (first, _) = sequencer(&temp, passing(0.95));
        assert!(first.run().await.unwrap().passed());

        let (second, _) = sequencer(&temp, MockToolRunner::new());
        let report = second.run().await.unwrap();

        assert!(matches!(
            report.failure(),
            Some(FailureReason::ArtifactUnreadable { .. })
        ));
        assert!(report.coverage.is_none());
        assert!(!temp.path().join("reports/coverage.xml").exists());
    }

    #[tokio::test]
    async fn test_unstarted_dep_scan_still_records_report() {
        for runner in [
            passing(0.9).with_missing_tool("deps"),
            passing(0.9).with_timeout("deps"),
        ] {
            let temp = TempDir::new().unwrap();
            let (seq, _) = sequencer(&temp, runner);

            let report = seq.run().await.unwrap();

            assert!(report.passed());
            let record = report.step(StepKind::DepScan).unwrap();
            assert_eq!(
                record.artifact.as_deref(),
                Some(Path::new("reports/security/safety_report.txt"))
            );
            let written =
                std::fs::read_to_string(temp.path().join("reports/security/safety_report.txt"))
                    .unwrap();
            assert!(written.contains("deps"), "report was: {}", written);
        }
    }

    #[tokio::test]
    async fn test_threshold_violation_keeps_coverage() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(passing(0.853));
        let config = GateConfig::default().with_min_coverage(90.0);
        let seq = QualityGateSequencer::with_runner(temp.path(), config, runner);

        let report = seq.run().await.unwrap();

        assert_eq!(
            report.failure(),
            Some(&FailureReason::ThresholdNotMet {
                observed: 85.3,
                required: 90.0
            })
        );
        assert_eq!(report.coverage.map(|c| c.tenths), Some(853));
        assert!(seq.evaluate_coverage().is_err());
    }

    #[tokio::test]
    async fn test_audit_entries_written_and_verify() {
        let temp = TempDir::new().unwrap();
        let (seq, _) = sequencer(&temp, passing(0.853));

        let report = seq.run().await.unwrap();

        let logger = AuditLogger::new(temp.path().join("reports/audit")).unwrap();
        let entries = logger.entries_for_run(&report.run_id).unwrap();
        // run_started + 5 steps + coverage + run_finished
        assert_eq!(entries.len(), 8);
        assert!(logger.verify().unwrap().is_valid);

        let test_entry = &entries[5];
        assert_eq!(test_entry.data["step"], "test");
        assert!(test_entry.data["artifact_sha256"].is_string());
    }

    #[tokio::test]
    async fn test_audit_can_be_disabled() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(passing(0.9));
        let seq = QualityGateSequencer::with_runner(
            temp.path(),
            GateConfig::default().with_audit(false),
            runner,
        );

        seq.run().await.unwrap();

        assert!(!temp.path().join("reports/audit/audit.jsonl").exists());
    }

    #[test]
    fn test_steps_fixed_at_construction() {
        let temp = TempDir::new().unwrap();
        let seq = QualityGateSequencer::new(temp.path(), GateConfig::default());
        assert_eq!(seq.steps().len(), 5);
        assert_eq!(seq.step(StepKind::Test).name, "test");
        assert_eq!(seq.reports_dir(), temp.path().join("reports"));
        assert_eq!(seq.threshold().min_percent(), 80.0);
    }
}
