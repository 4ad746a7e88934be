//! Audit logging for validation evidence.
//!
//! Every sequencer run appends its events to `<reports>/audit/audit.jsonl`.
//! Entries are hash-chained so the trail is tamper-evident.
//!
//! # Features
//!
//! - **Append-only logging**: All audit events are appended to a JSONL file
//! - **Tamper-evident**: Each entry includes a SHA-256 hash of the previous entry
//! - **Artifact digests**: Step entries carry the SHA-256 of the report they produced
//! - **Verification**: Can verify the integrity of the entire audit log
//!
//! # Example
//!
//! ```rust,ignore
//! use qgate::audit::AuditLogger;
//!
//! let logger = AuditLogger::new(reports_dir.join("audit"))?;
//! logger.log_run_started(&run_id, &steps)?;
//!
//! let result = logger.verify()?;
//! assert!(result.is_valid);
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::quality::coverage::CoverageResult;
use crate::quality::step::CheckStep;
use crate::quality::summary::{RunReport, StepRecord};

/// File name of the audit log inside the audit directory.
pub const AUDIT_FILE_NAME: &str = "audit.jsonl";

/// The type of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A sequencer run started.
    RunStarted,
    /// A step finished (passed, warned or failed).
    StepCompleted,
    /// The coverage summary was evaluated.
    CoverageEvaluated,
    /// A run reached a terminal state.
    RunFinished,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RunStarted => "run_started",
            Self::StepCompleted => "step_completed",
            Self::CoverageEvaluated => "coverage_evaluated",
            Self::RunFinished => "run_finished",
        };
        write!(f, "{}", s)
    }
}

/// An audit log entry with hash chaining for tamper evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique sequence number for this entry.
    pub sequence: u64,
    /// Timestamp when the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of audit event.
    pub event_type: AuditEventType,
    /// Run the event belongs to.
    pub run_id: String,
    /// User or system that triggered the event.
    pub actor: String,
    /// Event-specific data.
    pub data: serde_json::Value,
    /// SHA-256 hash of the previous entry (hex-encoded).
    /// For the first entry, this is a hash of the genesis string.
    pub previous_hash: String,
    /// SHA-256 hash of this entry (hex-encoded).
    /// Computed from all fields except this one.
    pub hash: String,
}

impl AuditEntry {
    /// Compute the hash of this entry for verification.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_le_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(self.event_type.to_string().as_bytes());
        hasher.update(self.run_id.as_bytes());
        hasher.update(self.actor.as_bytes());
        hasher.update(self.data.to_string().as_bytes());
        hasher.update(self.previous_hash.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify this entry's hash is correct.
    #[must_use]
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

/// Result of verifying an audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the entire log is valid.
    pub is_valid: bool,
    /// Total number of entries verified.
    pub entries_verified: u64,
    /// Sequence number of the first invalid entry (if any).
    pub first_invalid_entry: Option<u64>,
    /// Description of the verification error (if any).
    pub error_description: Option<String>,
}

impl VerificationResult {
    /// Create a successful verification result.
    #[must_use]
    pub fn valid(entries_verified: u64) -> Self {
        Self {
            is_valid: true,
            entries_verified,
            first_invalid_entry: None,
            error_description: None,
        }
    }

    /// Create a failed verification result.
    #[must_use]
    pub fn invalid(entries_verified: u64, invalid_entry: u64, error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            entries_verified,
            first_invalid_entry: Some(invalid_entry),
            error_description: Some(error.into()),
        }
    }
}

/// The genesis hash used for the first entry in the audit log.
const GENESIS_HASH: &str = "qgate-audit-genesis-v1";

/// SHA-256 of a file, hex-encoded. `None` if it is not a readable file.
#[must_use]
pub fn file_digest(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    let bytes = fs::read(path).ok()?;
    Some(hex::encode(Sha256::digest(&bytes)))
}

/// Audit logger with tamper-evident hash chaining.
#[derive(Debug)]
pub struct AuditLogger {
    audit_dir: PathBuf,
    actor: String,
}

impl AuditLogger {
    /// Create a new audit logger writing into `audit_dir`.
    ///
    /// The actor recorded on entries is taken from `USER` (or `USERNAME`),
    /// falling back to `system`.
    ///
    /// # Errors
    ///
    /// Returns an error if the audit directory cannot be created.
    pub fn new(audit_dir: impl Into<PathBuf>) -> Result<Self> {
        let actor = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "system".to_string());
        Self::with_actor(audit_dir, actor)
    }

    /// Create a new audit logger with an explicit actor.
    ///
    /// # Errors
    ///
    /// Returns an error if the audit directory cannot be created.
    pub fn with_actor(audit_dir: impl Into<PathBuf>, actor: impl Into<String>) -> Result<Self> {
        let logger = Self {
            audit_dir: audit_dir.into(),
            actor: actor.into(),
        };
        logger.ensure_dir()?;
        Ok(logger)
    }

    /// Get the path to the audit log file.
    #[must_use]
    pub fn audit_file(&self) -> PathBuf {
        self.audit_dir.join(AUDIT_FILE_NAME)
    }

    /// Ensure the audit directory exists.
    fn ensure_dir(&self) -> Result<()> {
        if !self.audit_dir.exists() {
            fs::create_dir_all(&self.audit_dir).context("Failed to create audit directory")?;
        }
        Ok(())
    }

    /// Log an audit event.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing log cannot be read or the entry
    /// cannot be written.
    pub fn log_event(
        &self,
        event_type: AuditEventType,
        run_id: &str,
        data: serde_json::Value,
    ) -> Result<AuditEntry> {
        let entries = self.read_entries()?;
        let sequence = entries.last().map(|e| e.sequence + 1).unwrap_or(0);
        let previous_hash = entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(compute_genesis_hash);

        let mut entry = AuditEntry {
            sequence,
            timestamp: Utc::now(),
            event_type,
            run_id: run_id.to_string(),
            actor: self.actor.clone(),
            data,
            previous_hash,
            hash: String::new(), // Computed below
        };

        entry.hash = entry.compute_hash();

        self.write_entry(&entry)?;
        Ok(entry)
    }

    /// Log the start of a run with its planned steps.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be written.
    pub fn log_run_started(
        &self,
        run_id: &str,
        project_dir: &Path,
        steps: &[CheckStep],
        min_coverage: f64,
    ) -> Result<AuditEntry> {
        let planned: Vec<_> = steps
            .iter()
            .map(|s| {
                serde_json::json!({
                    "step": s.name,
                    "command": s.command.to_string(),
                    "required": s.required,
                })
            })
            .collect();

        self.log_event(
            AuditEventType::RunStarted,
            run_id,
            serde_json::json!({
                "project_dir": project_dir.display().to_string(),
                "steps": planned,
                "min_coverage": min_coverage,
            }),
        )
    }

    /// Log a finished step, with the digest of its artifact when present.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be written.
    pub fn log_step(
        &self,
        run_id: &str,
        record: &StepRecord,
        artifact_digest: Option<&str>,
    ) -> Result<AuditEntry> {
        self.log_event(
            AuditEventType::StepCompleted,
            run_id,
            serde_json::json!({
                "step": record.step,
                "status": record.status,
                "required": record.required,
                "exit_code": record.exit_code,
                "duration_ms": record.duration_ms,
                "artifact": record.artifact,
                "artifact_sha256": artifact_digest,
                "detail": record.detail,
            }),
        )
    }

    /// Log the coverage evaluation.
    ///
    /// `coverage` is `None` when the summary could not be read.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be written.
    pub fn log_coverage(
        &self,
        run_id: &str,
        coverage: Option<&CoverageResult>,
        min_coverage: f64,
        passed: bool,
    ) -> Result<AuditEntry> {
        self.log_event(
            AuditEventType::CoverageEvaluated,
            run_id,
            serde_json::json!({
                "line_rate": coverage.map(|c| c.line_rate),
                "percent": coverage.map(CoverageResult::percent),
                "min_coverage": min_coverage,
                "passed": passed,
            }),
        )
    }

    /// Log the terminal outcome of a run.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be written.
    pub fn log_run_finished(&self, report: &RunReport) -> Result<AuditEntry> {
        self.log_event(
            AuditEventType::RunFinished,
            &report.run_id,
            serde_json::json!({
                "passed": report.passed(),
                "exit_code": report.exit_code(),
                "outcome": report.outcome,
                "steps_run": report.step_order(),
                "total_duration_ms": report.total_duration_ms(),
            }),
        )
    }

    /// Write an entry to the audit log.
    fn write_entry(&self, entry: &AuditEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.audit_file())
            .context("Failed to open audit file")?;

        let json = serde_json::to_string(entry).context("Failed to serialize audit entry")?;
        writeln!(file, "{}", json).context("Failed to write audit entry")?;

        Ok(())
    }

    /// Read all entries from the audit log.
    ///
    /// # Errors
    ///
    /// Returns an error if the audit file cannot be read or parsed.
    pub fn read_entries(&self) -> Result<Vec<AuditEntry>> {
        let file_path = self.audit_file();

        if !file_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&file_path).context("Failed to open audit file")?;
        let reader = BufReader::new(file);

        let mut entries = Vec::new();
        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result.context("Failed to read line from audit file")?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse audit entry at line {}", line_num + 1))?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Verify the integrity of the audit log.
    ///
    /// Checks that:
    /// 1. Sequence numbers are consecutive from zero
    /// 2. Each entry's hash is correct
    /// 3. Each entry's previous_hash matches the previous entry's hash
    ///    (the genesis hash for the first entry)
    ///
    /// # Errors
    ///
    /// Returns an error if the audit log cannot be read.
    pub fn verify(&self) -> Result<VerificationResult> {
        let entries = self.read_entries()?;

        if entries.is_empty() {
            return Ok(VerificationResult::valid(0));
        }

        let genesis = compute_genesis_hash();

        for (i, entry) in entries.iter().enumerate() {
            if entry.sequence != i as u64 {
                return Ok(VerificationResult::invalid(
                    i as u64,
                    entry.sequence,
                    format!("Sequence mismatch: expected {}, got {}", i, entry.sequence),
                ));
            }

            if !entry.verify_hash() {
                return Ok(VerificationResult::invalid(
                    i as u64,
                    entry.sequence,
                    "Entry hash verification failed",
                ));
            }

            let expected_previous = if i == 0 {
                &genesis
            } else {
                &entries[i - 1].hash
            };

            if entry.previous_hash != *expected_previous {
                return Ok(VerificationResult::invalid(
                    i as u64,
                    entry.sequence,
                    "Chain hash mismatch: previous_hash doesn't match",
                ));
            }
        }

        Ok(VerificationResult::valid(entries.len() as u64))
    }

    /// Get entries for a specific run.
    ///
    /// # Errors
    ///
    /// Returns an error if the audit log cannot be read.
    pub fn entries_for_run(&self, run_id: &str) -> Result<Vec<AuditEntry>> {
        let entries = self.read_entries()?;
        Ok(entries.into_iter().filter(|e| e.run_id == run_id).collect())
    }
}

/// Compute the genesis hash used for the first entry.
#[must_use]
fn compute_genesis_hash() -> String {
    let mut hasher = Sha256::new();
    hasher.update(GENESIS_HASH.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use crate::quality::state::GateState;
    use crate::quality::step::{standard_steps, StepKind};
    use crate::quality::summary::StepStatus;
    use tempfile::TempDir;

    fn logger(temp: &TempDir) -> AuditLogger {
        AuditLogger::with_actor(temp.path().join("audit"), "ci").unwrap()
    }

    fn lint_record() -> StepRecord {
        StepRecord {
            step: "lint".to_string(),
            kind: StepKind::Lint,
            required: true,
            status: StepStatus::Passed,
            exit_code: Some(0),
            duration_ms: 42,
            artifact: None,
            detail: None,
        }
    }

    #[test]
    fn test_creates_directory() {
        let temp = TempDir::new().unwrap();
        let logger = logger(&temp);
        assert!(temp.path().join("audit").is_dir());
        assert!(logger.read_entries().unwrap().is_empty());
    }

    #[test]
    fn test_run_started_records_plan() {
        let temp = TempDir::new().unwrap();
        let logger = logger(&temp);
        let steps = standard_steps(&GateConfig::default());

        let entry = logger
            .log_run_started("run-1", temp.path(), &steps, 80.0)
            .unwrap();

        assert_eq!(entry.event_type, AuditEventType::RunStarted);
        assert_eq!(entry.actor, "ci");
        assert_eq!(entry.data["steps"].as_array().unwrap().len(), 5);
        assert_eq!(entry.data["steps"][3]["step"], "deps");
        assert_eq!(entry.data["steps"][3]["required"], false);
        assert_eq!(entry.data["min_coverage"], 80.0);
    }

    #[test]
    fn test_step_entry_carries_digest() {
        let temp = TempDir::new().unwrap();
        let logger = logger(&temp);

        let report = temp.path().join("bandit_report.txt");
        fs::write(&report, "No issues identified.").unwrap();
        let digest = file_digest(&report).unwrap();
        assert_eq!(digest.len(), 64);

        let entry = logger.log_step("run-1", &lint_record(), Some(&digest)).unwrap();
        assert_eq!(entry.data["step"], "lint");
        assert_eq!(entry.data["status"], "passed");
        assert_eq!(entry.data["artifact_sha256"], digest.as_str());
    }

    #[test]
    fn test_file_digest_missing_or_directory() {
        let temp = TempDir::new().unwrap();
        assert!(file_digest(&temp.path().join("nope.txt")).is_none());
        assert!(file_digest(temp.path()).is_none());
    }

    #[test]
    fn test_chain_verifies() {
        let temp = TempDir::new().unwrap();
        let logger = logger(&temp);

        logger.log_step("run-1", &lint_record(), None).unwrap();
        logger
            .log_coverage("run-1", CoverageResult::from_line_rate(0.853).ok().as_ref(), 80.0, true)
            .unwrap();
        logger.log_step("run-2", &lint_record(), None).unwrap();

        let result = logger.verify().unwrap();
        assert!(result.is_valid);
        assert_eq!(result.entries_verified, 3);

        let entries = logger.read_entries().unwrap();
        assert_eq!(entries[0].previous_hash, compute_genesis_hash());
        assert_eq!(entries[1].previous_hash, entries[0].hash);
        assert_eq!(entries[2].sequence, 2);
        assert_eq!(logger.entries_for_run("run-1").unwrap().len(), 2);
    }

    #[test]
    fn test_full_precision_rates_verify() {
        let temp = TempDir::new().unwrap();
        let logger = logger(&temp);

        let mut written = Vec::new();
        for i in 1..400 {
            let coverage = CoverageResult::from_line_rate(f64::from(i) / 2003.0).unwrap();
            written.push(logger.log_coverage("run-1", Some(&coverage), 80.0, false).unwrap());
        }

        let result = logger.verify().unwrap();
        assert!(result.is_valid, "{:?}", result.error_description);
        assert_eq!(result.entries_verified, 399);

        let read = logger.read_entries().unwrap();
        for (ours, theirs) in written.iter().zip(&read) {
            assert_eq!(ours.data["line_rate"], theirs.data["line_rate"]);
            assert_eq!(ours.hash, theirs.compute_hash());
        }
    }

    #[test]
    fn test_tampering_detected() {
        let temp = TempDir::new().unwrap();
        let logger = logger(&temp);

        logger.log_step("run-1", &lint_record(), None).unwrap();
        logger.log_step("run-1", &lint_record(), None).unwrap();

        let path = logger.audit_file();
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replacen("\"passed\"", "\"failed\"", 1)).unwrap();

        let result = logger.verify().unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.first_invalid_entry, Some(0));
        assert!(result
            .error_description
            .unwrap()
            .contains("hash verification failed"));
    }

    #[test]
    fn test_removed_entry_detected() {
        let temp = TempDir::new().unwrap();
        let logger = logger(&temp);

        for _ in 0..3 {
            logger.log_step("run-1", &lint_record(), None).unwrap();
        }

        let path = logger.audit_file();
        let content = fs::read_to_string(&path).unwrap();
        let kept: Vec<_> = content.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        fs::write(&path, kept.join("\n")).unwrap();

        let result = logger.verify().unwrap();
        assert!(!result.is_valid);
        assert!(result.error_description.unwrap().contains("Sequence mismatch"));
    }

    #[test]
    fn test_run_finished_entry() {
        let temp = TempDir::new().unwrap();
        let logger = logger(&temp);
        let now = Utc::now();
        let report = RunReport {
            run_id: "run-9".to_string(),
            started_at: now,
            finished_at: now,
            steps: vec![lint_record()],
            coverage: None,
            min_coverage: 80.0,
            outcome: GateState::Success,
        };

        let entry = logger.log_run_finished(&report).unwrap();
        assert_eq!(entry.run_id, "run-9");
        assert_eq!(entry.data["passed"], true);
        assert_eq!(entry.data["exit_code"], 0);
        assert_eq!(entry.data["steps_run"][0], "lint");
    }
}
