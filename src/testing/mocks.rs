//! Mock tool runner.
//!
//! Scripts the outcome of each step so the sequencer can be driven through
//! every path without any tool installed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::quality::runner::{InvocationError, ToolOutput, ToolRunner};
use crate::quality::step::ToolCommand;

/// What the mock does when a step runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Return this output.
    Output(ToolOutput),
    /// Report the tool as not installed.
    NotFound,
    /// Report a timeout.
    TimedOut,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self::Output(ToolOutput::with_exit_code(0))
    }
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub step: String,
    pub command: ToolCommand,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
}

/// Mock implementation of [`ToolRunner`].
///
/// Steps without a scripted behavior exit 0. File writes registered with
/// [`writes_file`](Self::writes_file) happen only when the step "runs",
/// i.e. its behavior is [`MockBehavior::Output`].
///
/// # Example
///
/// ```rust,ignore
/// let runner = MockToolRunner::new()
///     .with_exit_code("lint", 1)
///     .writes_file("test", "reports/coverage.xml", coverage_xml(0.85));
///
/// let seq = QualityGateSequencer::with_runner(dir, config, Arc::new(runner));
/// ```
#[derive(Debug, Default)]
pub struct MockToolRunner {
    behaviors: HashMap<String, MockBehavior>,
    writes: HashMap<String, Vec<(PathBuf, String)>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockToolRunner {
    /// Create a mock where every step passes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the output of a step.
    #[must_use]
    pub fn with_output(mut self, step: &str, output: ToolOutput) -> Self {
        self.behaviors
            .insert(step.to_string(), MockBehavior::Output(output));
        self
    }

    /// Script a bare exit code for a step.
    #[must_use]
    pub fn with_exit_code(self, step: &str, exit_code: i32) -> Self {
        self.with_output(step, ToolOutput::with_exit_code(exit_code))
    }

    /// Simulate a process killed by a signal.
    #[must_use]
    pub fn with_signal(self, step: &str) -> Self {
        self.with_output(step, ToolOutput::default())
    }

    /// Make a step's tool appear missing.
    #[must_use]
    pub fn with_missing_tool(mut self, step: &str) -> Self {
        self.behaviors
            .insert(step.to_string(), MockBehavior::NotFound);
        self
    }

    /// Make a step time out.
    #[must_use]
    pub fn with_timeout(mut self, step: &str) -> Self {
        self.behaviors
            .insert(step.to_string(), MockBehavior::TimedOut);
        self
    }

    /// Write `contents` to `relative_path` (under the working directory)
    /// when `step` runs.
    #[must_use]
    pub fn writes_file(
        mut self,
        step: &str,
        relative_path: impl Into<PathBuf>,
        contents: impl Into<String>,
    ) -> Self {
        self.writes
            .entry(step.to_string())
            .or_default()
            .push((relative_path.into(), contents.into()));
        self
    }

    /// All invocations so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Step names invoked so far, in order.
    #[must_use]
    pub fn steps_run(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.step).collect()
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn write_files(&self, step: &str, working_dir: &Path) -> std::io::Result<()> {
        for (relative, contents) in self.writes.get(step).into_iter().flatten() {
            let path = working_dir.join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, contents)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ToolRunner for MockToolRunner {
    async fn run(
        &self,
        step: &str,
        command: &ToolCommand,
        working_dir: &Path,
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, InvocationError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockCall {
                step: step.to_string(),
                command: command.clone(),
                working_dir: working_dir.to_path_buf(),
                timeout,
            });

        match self.behaviors.get(step).cloned().unwrap_or_default() {
            MockBehavior::Output(output) => {
                self.write_files(step, working_dir)?;
                Ok(output)
            }
            MockBehavior::NotFound => Err(InvocationError::NotFound {
                tool: command.program.clone(),
            }),
            MockBehavior::TimedOut => Err(InvocationError::TimedOut {
                timeout: timeout.unwrap_or_default(),
            }),
        }
    }
}
