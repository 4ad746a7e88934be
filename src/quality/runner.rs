//! External tool execution.
//!
//! [`ToolRunner`] is the seam between the sequencer and the outside world.
//! [`ProcessRunner`] spawns real processes; tests substitute
//! [`MockToolRunner`](crate::testing::MockToolRunner) to script success,
//! failure, missing tools and timeouts without running anything.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::step::ToolCommand;

/// Captured result of a tool that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Exit code, or `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock run time in milliseconds.
    pub duration_ms: u64,
}

impl ToolOutput {
    /// Create an output with the given exit code and no captured text.
    #[must_use]
    pub fn with_exit_code(exit_code: i32) -> Self {
        Self {
            exit_code: Some(exit_code),
            ..Self::default()
        }
    }

    /// Attach captured stdout.
    #[must_use]
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Attach captured stderr.
    #[must_use]
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    /// Whether the tool exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, for report artifacts.
    #[must_use]
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Why a tool produced no [`ToolOutput`].
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The program could not be found or started.
    #[error("tool '{tool}' not found")]
    NotFound { tool: String },

    /// The program ran longer than its timeout and was killed.
    #[error("timed out after {}s", .timeout.as_secs())]
    TimedOut { timeout: Duration },

    /// Spawning or waiting failed for another reason.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Abstraction for running one external tool.
///
/// A non-zero exit is a normal `Ok` result; `Err` means the tool produced
/// no exit status at all.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `command` in `working_dir`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationError`] if the tool cannot be started or times out.
    async fn run(
        &self,
        step: &str,
        command: &ToolCommand,
        working_dir: &Path,
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, InvocationError>;
}

/// Runs tools as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Create a process runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(
        &self,
        step: &str,
        command: &ToolCommand,
        working_dir: &Path,
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, InvocationError> {
        let resolved = which::which_in(&command.program, std::env::var_os("PATH"), working_dir)
            .map_err(|_| InvocationError::NotFound {
                tool: command.program.clone(),
            })?;

        debug!(step, program = %resolved.display(), "Spawning tool");

        let start = Instant::now();
        let child = tokio::process::Command::new(&resolved)
            .args(&command.args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => InvocationError::NotFound {
                    tool: command.program.clone(),
                },
                _ => InvocationError::Io(e),
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| InvocationError::TimedOut { timeout: limit })??,
            None => child.wait_with_output().await?,
        };

        let result = ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        debug!(
            step,
            exit_code = ?result.exit_code,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            "Tool finished"
        );

        Ok(result)
    }
}
