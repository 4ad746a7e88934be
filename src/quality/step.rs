//! The fixed check sequence and the commands each step runs.
//!
//! Default tooling targets a Python source tree:
//! - `format` - `black --check --diff`
//! - `lint` - `flake8 --count --statistics`
//! - `security` - `bandit` writing a text report
//! - `deps` - `safety check` (lenient, output captured to a report)
//! - `test` - `pytest` with coverage, HTML and JUnit reports
//!
//! Every command can be replaced through [`GateConfig::steps`]; order and
//! policy cannot.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::GateConfig;

// ============================================================================
// Step Kinds
// ============================================================================

/// The five tool-backed checks, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Formatting check (check-only mode).
    Format,
    /// Lint check.
    Lint,
    /// Static security analysis of the source tree.
    SecurityScan,
    /// Dependency vulnerability scan. The only lenient step.
    DepScan,
    /// Test execution with coverage instrumentation.
    Test,
}

impl StepKind {
    /// All steps in execution order.
    pub const ALL: [StepKind; 5] = [
        StepKind::Format,
        StepKind::Lint,
        StepKind::SecurityScan,
        StepKind::DepScan,
        StepKind::Test,
    ];

    /// Stable key used in configuration, logs and the audit trail.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Self::Format => "format",
            Self::Lint => "lint",
            Self::SecurityScan => "security",
            Self::DepScan => "deps",
            Self::Test => "test",
        }
    }

    /// Parse a configuration key.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }

    /// Comma-separated list of valid keys, for error messages.
    #[must_use]
    pub fn keys() -> String {
        Self::ALL
            .iter()
            .map(|k| k.key())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Position in the sequence.
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::Format => 0,
            Self::Lint => 1,
            Self::SecurityScan => 2,
            Self::DepScan => 3,
            Self::Test => 4,
        }
    }

    /// Human-readable title.
    #[must_use]
    pub fn title(&self) -> &'static str {
        match self {
            Self::Format => "Formatting",
            Self::Lint => "Lint",
            Self::SecurityScan => "Security scan",
            Self::DepScan => "Dependency scan",
            Self::Test => "Tests",
        }
    }

    /// Whether a failure of this step aborts the run.
    #[must_use]
    pub fn is_required(&self) -> bool {
        !matches!(self, Self::DepScan)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

// ============================================================================
// Commands
// ============================================================================

/// An external program and its argument list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    /// Program name or path.
    pub program: String,
    /// Arguments, passed verbatim.
    pub args: Vec<String>,
}

impl ToolCommand {
    /// Create a command.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Check Steps
// ============================================================================

/// One step of the sequence.
#[derive(Debug, Clone, Serialize)]
pub struct CheckStep {
    /// Which check this is.
    pub kind: StepKind,
    /// Step key (`format`, `lint`, ...).
    pub name: String,
    /// Command to run.
    pub command: ToolCommand,
    /// Whether failure aborts the run.
    pub required: bool,
    /// Report file the step produces, relative to the project directory.
    pub output_artifact: Option<PathBuf>,
    /// Write the tool's captured output to `output_artifact`.
    pub capture_output: bool,
    /// Maximum run time, if any.
    #[serde(rename = "timeout_secs", serialize_with = "serialize_secs")]
    pub timeout: Option<Duration>,
}

fn serialize_secs<S: serde::Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => s.serialize_some(&d.as_secs()),
        None => s.serialize_none(),
    }
}

/// Build the fixed step list for a configuration.
///
/// The list always holds one step per [`StepKind`], in [`StepKind::ALL`]
/// order.
#[must_use]
pub fn standard_steps(config: &GateConfig) -> Vec<CheckStep> {
    StepKind::ALL
        .into_iter()
        .map(|kind| {
            let mut command = default_command(kind, config);
            if let Some(ov) = config.override_for(kind) {
                if let Some(program) = &ov.program {
                    command.program = program.clone();
                }
                if let Some(args) = &ov.args {
                    command.args = args.clone();
                }
            }

            CheckStep {
                kind,
                name: kind.key().to_string(),
                command,
                required: kind.is_required(),
                output_artifact: default_artifact(kind, config),
                capture_output: kind == StepKind::DepScan,
                timeout: config.timeout_for(kind),
            }
        })
        .collect()
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

fn default_artifact(kind: StepKind, config: &GateConfig) -> Option<PathBuf> {
    let root = &config.reports_root;
    match kind {
        StepKind::Format | StepKind::Lint => None,
        StepKind::SecurityScan => Some(root.join("security").join("bandit_report.txt")),
        StepKind::DepScan => Some(root.join("security").join("safety_report.txt")),
        StepKind::Test => Some(config.coverage_xml()),
    }
}

fn default_command(kind: StepKind, config: &GateConfig) -> ToolCommand {
    let src = path_arg(&config.source_dir);
    let tests = path_arg(&config.tests_dir);
    let root = &config.reports_root;

    match kind {
        StepKind::Format => ToolCommand::new("black", ["--check", "--diff", src.as_str(), tests.as_str()]),
        StepKind::Lint => {
            ToolCommand::new("flake8", [src.as_str(), tests.as_str(), "--count", "--statistics"])
        }
        StepKind::SecurityScan => ToolCommand::new(
            "bandit",
            [
                "-r".to_string(),
                src,
                "-f".to_string(),
                "txt".to_string(),
                "-o".to_string(),
                path_arg(&root.join("security").join("bandit_report.txt")),
                config.security_severity.bandit_flag().to_string(),
            ],
        ),
        StepKind::DepScan => ToolCommand::new("safety", ["check", "--full-report"]),
        StepKind::Test => ToolCommand::new(
            "pytest",
            [
                tests,
                format!("--cov={}", src),
                format!("--cov-report=html:{}", path_arg(&root.join("coverage"))),
                format!("--cov-report=xml:{}", path_arg(&config.coverage_xml())),
                "--cov-report=term".to_string(),
                format!("--html={}", path_arg(&root.join("test_report.html"))),
                "--self-contained-html".to_string(),
                format!("--junitxml={}", path_arg(&root.join("junit.xml"))),
            ],
        ),
    }
}

// ============================================================================
// Failure Descriptions
// ============================================================================

fn reformat_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^would reformat (.+?)\s*$").ok())
        .as_ref()
}

/// Files the formatter reported it would change.
#[must_use]
pub fn files_to_reformat(output: &str) -> Vec<String> {
    let Some(re) = reformat_regex() else {
        return Vec::new();
    };
    re.captures_iter(output).map(|c| c[1].to_string()).collect()
}

/// Total problem count printed by `flake8 --count` (last numeric line).
#[must_use]
pub fn lint_problem_count(stdout: &str) -> Option<u64> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse().ok())
}

/// Build the operator-facing message for a failed step.
///
/// `artifact` holds the contents of the step's report file when one was
/// written.
#[must_use]
pub fn describe_failure(
    kind: StepKind,
    stdout: &str,
    stderr: &str,
    artifact: Option<&str>,
) -> String {
    match kind {
        StepKind::Format => {
            let files = files_to_reformat(&format!("{}\n{}", stderr, stdout));
            if files.is_empty() {
                "formatter reported changes".to_string()
            } else {
                format!(
                    "{} file(s) would be reformatted:\n{}",
                    files.len(),
                    files
                        .iter()
                        .map(|f| format!("  - {}", f))
                        .collect::<Vec<_>>()
                        .join("\n")
                )
            }
        }
        StepKind::Lint => match lint_problem_count(stdout) {
            Some(count) => format!("linter reported {} problem(s)", count),
            None => first_line(stdout, stderr, "linter reported problems"),
        },
        StepKind::SecurityScan => match artifact.map(str::trim).filter(|a| !a.is_empty()) {
            Some(report) => format!("security findings at or above threshold:\n{}", report),
            None => first_line(stdout, stderr, "security scan reported findings"),
        },
        StepKind::DepScan => first_line(stdout, stderr, "dependency scan reported vulnerabilities"),
        StepKind::Test => first_line(stdout, stderr, "test run failed"),
    }
}

fn first_line(stdout: &str, stderr: &str, fallback: &str) -> String {
    stderr
        .lines()
        .chain(stdout.lines())
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| format!("{}: {}", fallback, l))
        .unwrap_or_else(|| fallback.to_string())
}
