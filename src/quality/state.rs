//! Sequencer state machine.
//!
//! ```text
//! Format -> Lint -> SecurityScan -> DepScan -> Test -> CoverageCheck -> Success
//!    |        |          |                       |            |
//!    +--------+----------+-----------------------+------------+--> Failure(reason)
//! ```
//!
//! `DepScan` never transitions to `Failure`: its failures arrive as
//! [`StepResult::Warned`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::step::StepKind;
use crate::error::GateError;

/// Why a run ended in failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// A required tool exited non-zero.
    ToolFailed {
        step: String,
        exit_code: Option<i32>,
        message: String,
    },
    /// A required tool could not be started.
    MissingTool { step: String, tool: String },
    /// A required step exceeded its timeout.
    Timeout { step: String, timeout_secs: u64 },
    /// The coverage summary could not be read.
    ArtifactUnreadable { path: PathBuf, reason: String },
    /// Coverage below the configured minimum.
    ThresholdNotMet { observed: f64, required: f64 },
}

impl FailureReason {
    /// Step (or `coverage`) the failure is attributed to.
    #[must_use]
    pub fn step(&self) -> &str {
        match self {
            Self::ToolFailed { step, .. }
            | Self::MissingTool { step, .. }
            | Self::Timeout { step, .. } => step,
            Self::ArtifactUnreadable { .. } | Self::ThresholdNotMet { .. } => "coverage",
        }
    }

    /// The equivalent error, for display and exit codes.
    #[must_use]
    pub fn to_error(&self) -> GateError {
        match self.clone() {
            Self::ToolFailed {
                step,
                exit_code,
                message,
            } => GateError::tool(step, exit_code, message),
            Self::MissingTool { step, tool } => GateError::MissingTool { step, tool },
            Self::Timeout { step, timeout_secs } => GateError::Timeout { step, timeout_secs },
            Self::ArtifactUnreadable { path, reason } => {
                GateError::ArtifactUnreadable { path, reason }
            }
            Self::ThresholdNotMet { observed, required } => {
                GateError::ThresholdViolation { observed, required }
            }
        }
    }

    /// Convert a gate error back into a reason.
    ///
    /// Returns `None` for errors that are not run outcomes (configuration,
    /// I/O).
    #[must_use]
    pub fn from_error(error: GateError) -> Option<Self> {
        match error {
            GateError::ToolInvocation {
                step,
                exit_code,
                message,
            } => Some(Self::ToolFailed {
                step,
                exit_code,
                message,
            }),
            GateError::MissingTool { step, tool } => Some(Self::MissingTool { step, tool }),
            GateError::Timeout { step, timeout_secs } => Some(Self::Timeout { step, timeout_secs }),
            GateError::ArtifactUnreadable { path, reason } => {
                Some(Self::ArtifactUnreadable { path, reason })
            }
            GateError::ThresholdViolation { observed, required } => {
                Some(Self::ThresholdNotMet { observed, required })
            }
            _ => None,
        }
    }

    /// Process exit code for this failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.to_error().exit_code()
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_error())
    }
}

/// Result of one state's work, fed into [`GateState::advance`].
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// The check passed.
    Passed,
    /// A lenient check failed; recorded, not fatal.
    Warned,
    /// A required check failed.
    Failed(FailureReason),
}

/// Where the sequencer is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Format,
    Lint,
    SecurityScan,
    DepScan,
    Test,
    CoverageCheck,
    Success,
    Failure(FailureReason),
}

impl GateState {
    /// Entry state.
    #[must_use]
    pub fn initial() -> Self {
        Self::Format
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure(_))
    }

    /// The tool step executed in this state, if any.
    #[must_use]
    pub fn step_kind(&self) -> Option<StepKind> {
        match self {
            Self::Format => Some(StepKind::Format),
            Self::Lint => Some(StepKind::Lint),
            Self::SecurityScan => Some(StepKind::SecurityScan),
            Self::DepScan => Some(StepKind::DepScan),
            Self::Test => Some(StepKind::Test),
            Self::CoverageCheck | Self::Success | Self::Failure(_) => None,
        }
    }

    /// Apply the result of this state's work.
    ///
    /// Terminal states are absorbing.
    #[must_use]
    pub fn advance(self, result: StepResult) -> Self {
        if self.is_terminal() {
            return self;
        }

        match result {
            StepResult::Failed(reason) if self != Self::DepScan => Self::Failure(reason),
            _ => match self {
                Self::Format => Self::Lint,
                Self::Lint => Self::SecurityScan,
                Self::SecurityScan => Self::DepScan,
                Self::DepScan => Self::Test,
                Self::Test => Self::CoverageCheck,
                Self::CoverageCheck => Self::Success,
                terminal => terminal,
            },
        }
    }

    /// The failure reason, if the run failed.
    #[must_use]
    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Failure(reason) => Some(reason),
            _ => None,
        }
    }
}
