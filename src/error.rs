//! Custom error types for qgate.
//!
//! A run of the sequencer ends either in success or in exactly one
//! [`GateError`]. The variant decides the process exit code, so a missing
//! coverage artifact is never reported the same way as a coverage shortfall.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for qgate operations
#[derive(Error, Debug)]
pub enum GateError {
    // =========================================================================
    // Step Errors
    // =========================================================================
    /// A required tool exited non-zero
    #[error("Step '{step}' failed{}: {message}", exit_suffix(.exit_code))]
    ToolInvocation {
        step: String,
        exit_code: Option<i32>,
        message: String,
    },

    /// A required tool could not be started
    #[error("Step '{step}' could not run: tool '{tool}' not found")]
    MissingTool { step: String, tool: String },

    /// A step exceeded its configured timeout
    #[error("Step '{step}' timed out after {timeout_secs}s")]
    Timeout { step: String, timeout_secs: u64 },

    // =========================================================================
    // Coverage Errors
    // =========================================================================
    /// Coverage summary could not be located or parsed
    #[error("Coverage artifact {} could not be read: {reason}", .path.display())]
    ArtifactUnreadable { path: PathBuf, reason: String },

    /// Coverage computed but below the configured minimum
    #[error("Coverage {observed:.1}% is below the required {required:.1}%")]
    ThresholdViolation { observed: f64, required: f64 },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn exit_suffix(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!(" with exit code {}", code),
        None => " (terminated by signal)".to_string(),
    }
}

impl GateError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a tool invocation error
    pub fn tool(step: impl Into<String>, exit_code: Option<i32>, message: impl Into<String>) -> Self {
        Self::ToolInvocation {
            step: step.into(),
            exit_code,
            message: message.into(),
        }
    }

    /// Create an unreadable artifact error
    pub fn artifact(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ArtifactUnreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Name of the step this error is attributed to, if any
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::ToolInvocation { step, .. }
            | Self::MissingTool { step, .. }
            | Self::Timeout { step, .. } => Some(step),
            Self::ArtifactUnreadable { .. } | Self::ThresholdViolation { .. } => {
                Some("coverage")
            }
            _ => None,
        }
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ArtifactUnreadable { .. } => 3,
            Self::MissingTool { .. } => 6,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for qgate results
pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_violation_cites_both_percentages() {
        let err = GateError::ThresholdViolation {
            observed: 85.3,
            required: 90.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("85.3"));
        assert!(msg.contains("90.0"));
    }

    #[test]
    fn test_tool_invocation_display() {
        let err = GateError::tool("lint", Some(1), "flake8 reported 3 problems");
        assert_eq!(
            err.to_string(),
            "Step 'lint' failed with exit code 1: flake8 reported 3 problems"
        );

        let err = GateError::tool("test", None, "killed");
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(GateError::tool("format", Some(1), "x").exit_code(), 1);
        assert_eq!(
            GateError::ThresholdViolation {
                observed: 10.0,
                required: 80.0
            }
            .exit_code(),
            1
        );
        assert_eq!(GateError::artifact("reports/coverage.xml", "missing").exit_code(), 3);
        assert_eq!(
            GateError::MissingTool {
                step: "lint".into(),
                tool: "flake8".into()
            }
            .exit_code(),
            6
        );
        assert_eq!(GateError::config("bad").exit_code(), 7);
        assert_eq!(GateError::invalid("min_coverage_percent", "x").exit_code(), 7);
    }

    #[test]
    fn test_artifact_error_distinct_from_threshold() {
        let missing = GateError::artifact("reports/coverage.xml", "No such file");
        let low = GateError::ThresholdViolation {
            observed: 50.0,
            required: 80.0,
        };
        assert_ne!(missing.exit_code(), low.exit_code());
        assert!(missing.to_string().contains("could not be read"));
    }

    #[test]
    fn test_step_attribution() {
        assert_eq!(GateError::tool("security", Some(1), "x").step(), Some("security"));
        assert_eq!(
            GateError::Timeout {
                step: "test".into(),
                timeout_secs: 5
            }
            .step(),
            Some("test")
        );
        assert_eq!(GateError::artifact("a", "b").step(), Some("coverage"));
        assert_eq!(GateError::config("x").step(), None);
    }

    #[test]
    fn test_config_with_path() {
        let path = PathBuf::from("/project/qgate.toml");
        let err = GateError::config_with_path("failed to parse", path.clone());
        if let GateError::Config {
            message,
            path: opt_path,
        } = err
        {
            assert_eq!(message, "failed to parse");
            assert_eq!(opt_path, Some(path));
        } else {
            panic!("Wrong error variant");
        }
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: GateError = io_err.into();
        assert!(matches!(err, GateError::Io(_)));
        assert!(err.to_string().contains("access denied"));
    }
}
