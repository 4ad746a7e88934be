//! Configuration management for qgate.
//!
//! Configuration is an explicit [`GateConfig`] value handed to the sequencer
//! at construction time. It is read from `qgate.toml` in the project
//! directory when present; command-line flags (and `MIN_COVERAGE`) are
//! applied on top by the binary.
//!
//! # Example qgate.toml
//!
//! ```toml
//! min_coverage_percent = 85.0
//! reports_root = "reports"
//! source_dir = "src"
//! tests_dir = "tests"
//! security_severity = "high"
//! default_timeout_secs = 900
//!
//! [timeouts]
//! test = 1800
//!
//! [steps.lint]
//! program = "ruff"
//! args = ["check", "src", "tests"]
//! ```

use crate::error::{GateError, Result};
use crate::quality::step::StepKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up in the project directory.
pub const CONFIG_FILE_NAME: &str = "qgate.toml";

/// Default minimum line coverage in percent.
pub const DEFAULT_MIN_COVERAGE: f64 = 80.0;

/// Minimum bandit finding severity that fails the security step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecuritySeverity {
    /// Low severity and above.
    Low,
    /// Medium severity and above.
    #[default]
    Medium,
    /// High severity only.
    High,
}

impl SecuritySeverity {
    /// Bandit's `-l` flag repetition for this level.
    #[must_use]
    pub fn bandit_flag(&self) -> &'static str {
        match self {
            Self::Low => "-l",
            Self::Medium => "-ll",
            Self::High => "-lll",
        }
    }
}

impl std::fmt::Display for SecuritySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Replacement command for a single step.
///
/// Either field may be omitted; omitted fields keep the built-in default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOverride {
    /// Program to execute instead of the default tool.
    #[serde(default)]
    pub program: Option<String>,
    /// Full argument list replacing the default arguments.
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

/// Quality gate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum line coverage in percent required for the run to pass.
    pub min_coverage_percent: f64,
    /// Directory (relative to the project) receiving every report artifact.
    pub reports_root: PathBuf,
    /// Source directory checked by the formatter, linter and security scan.
    pub source_dir: PathBuf,
    /// Test directory handed to the test runner.
    pub tests_dir: PathBuf,
    /// Minimum security finding severity that fails the security step.
    pub security_severity: SecuritySeverity,
    /// Whether to append run events to the audit log.
    pub audit: bool,
    /// Timeout applied to every step without an explicit entry in `timeouts`.
    pub default_timeout_secs: Option<u64>,
    /// Per-step timeouts in seconds, keyed by step key (`format`, `lint`, ...).
    pub timeouts: BTreeMap<String, u64>,
    /// Per-step command overrides, keyed by step key.
    pub steps: BTreeMap<String, StepOverride>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_coverage_percent: DEFAULT_MIN_COVERAGE,
            reports_root: PathBuf::from("reports"),
            source_dir: PathBuf::from("src"),
            tests_dir: PathBuf::from("tests"),
            security_severity: SecuritySeverity::default(),
            audit: true,
            default_timeout_secs: None,
            timeouts: BTreeMap::new(),
            steps: BTreeMap::new(),
        }
    }
}

impl GateConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a project directory.
    ///
    /// Returns defaults when `qgate.toml` does not exist.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file exists but cannot be read,
    /// parsed, or validated.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = Self::config_path(project_dir);
        if path.exists() {
            Self::load_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read, parsed, or
    /// validated.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GateError::config_with_path(format!("failed to read: {}", e), path.to_path_buf())
        })?;
        let config: GateConfig = toml::from_str(&content).map_err(|e| {
            GateError::config_with_path(format!("failed to parse: {}", e), path.to_path_buf())
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the qgate.toml path for a project
    pub fn config_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_FILE_NAME)
    }

    /// Set the minimum coverage percentage.
    #[must_use]
    pub fn with_min_coverage(mut self, percent: f64) -> Self {
        self.min_coverage_percent = percent;
        self
    }

    /// Set the reports root.
    #[must_use]
    pub fn with_reports_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.reports_root = root.into();
        self
    }

    /// Set the security severity threshold.
    #[must_use]
    pub fn with_security_severity(mut self, severity: SecuritySeverity) -> Self {
        self.security_severity = severity;
        self
    }

    /// Enable/disable the audit log.
    #[must_use]
    pub fn with_audit(mut self, enabled: bool) -> Self {
        self.audit = enabled;
        self
    }

    /// Set a timeout for one step.
    #[must_use]
    pub fn with_timeout(mut self, kind: StepKind, secs: u64) -> Self {
        self.timeouts.insert(kind.key().to_string(), secs);
        self
    }

    /// Set the timeout used by steps without their own entry.
    #[must_use]
    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout_secs = Some(secs);
        self
    }

    /// Replace the command used by one step.
    #[must_use]
    pub fn with_step_command(
        mut self,
        kind: StepKind,
        program: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        self.steps.insert(
            kind.key().to_string(),
            StepOverride {
                program: Some(program.into()),
                args: Some(args),
            },
        );
        self
    }

    /// Effective timeout for a step.
    #[must_use]
    pub fn timeout_for(&self, kind: StepKind) -> Option<Duration> {
        self.timeouts
            .get(kind.key())
            .copied()
            .or(self.default_timeout_secs)
            .map(Duration::from_secs)
    }

    /// Command override for a step, if configured.
    #[must_use]
    pub fn override_for(&self, kind: StepKind) -> Option<&StepOverride> {
        self.steps.get(kind.key())
    }

    /// Absolute reports root for a project.
    #[must_use]
    pub fn reports_dir(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.reports_root)
    }

    /// Path of the coverage XML summary relative to the project.
    #[must_use]
    pub fn coverage_xml(&self) -> PathBuf {
        self.reports_root.join("coverage.xml")
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !self.min_coverage_percent.is_finite()
            || !(0.0..=100.0).contains(&self.min_coverage_percent)
        {
            return Err(GateError::invalid(
                "min_coverage_percent",
                format!("must be between 0 and 100, got {}", self.min_coverage_percent),
            ));
        }

        for (field, path) in [
            ("reports_root", &self.reports_root),
            ("source_dir", &self.source_dir),
            ("tests_dir", &self.tests_dir),
        ] {
            if path.as_os_str().is_empty() {
                return Err(GateError::invalid(field, "must not be empty"));
            }
        }

        if self.default_timeout_secs == Some(0) {
            return Err(GateError::invalid("default_timeout_secs", "must be greater than 0"));
        }

        for (key, secs) in &self.timeouts {
            if StepKind::from_key(key).is_none() {
                return Err(GateError::invalid(
                    format!("timeouts.{}", key),
                    format!("unknown step (expected one of {})", StepKind::keys()),
                ));
            }
            if *secs == 0 {
                return Err(GateError::invalid(
                    format!("timeouts.{}", key),
                    "must be greater than 0",
                ));
            }
        }

        for (key, step) in &self.steps {
            if StepKind::from_key(key).is_none() {
                return Err(GateError::invalid(
                    format!("steps.{}", key),
                    format!("unknown step (expected one of {})", StepKind::keys()),
                ));
            }
            if step.program.as_deref().is_some_and(|p| p.trim().is_empty()) {
                return Err(GateError::invalid(
                    format!("steps.{}.program", key),
                    "must not be empty",
                ));
            }
        }

        Ok(())
    }
}
