//! Quality gate sequencing.
//!
//! - [`step`] - The fixed check list and default tool commands
//! - [`runner`] - Tool execution seam and the process-backed runner
//! - [`state`] - Sequencer state machine
//! - [`coverage`] - Coverage parsing and threshold policy
//! - [`summary`] - Per-run records and rendering
//! - [`sequencer`] - Orchestration
//!
//! # Architecture
//!
//! ```text
//! +----------------------+
//! | QualityGateSequencer |
//! |                      |
//! |  - run()             |
//! +----------+-----------+
//!            |
//!            v  one step at a time, fail fast
//! +------+  +------+  +----------+  +------+  +------+
//! |format|->| lint |->| security |->| deps |->| test |
//! +------+  +------+  +----------+  +------+  +------+
//!                                  (lenient)     |
//!                                                v
//!                                      +-------------------+
//!                                      | coverage.xml      |
//!                                      | ThresholdPolicy   |
//!                                      +-------------------+
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use qgate::config::GateConfig;
//! use qgate::quality::QualityGateSequencer;
//!
//! let config = GateConfig::load(project_dir)?;
//! let report = QualityGateSequencer::new(project_dir, config).run().await?;
//!
//! println!("{}", report.format());
//! std::process::exit(report.exit_code());
//! ```
//!
//! # Steps
//!
//! | Step | Default tool | Blocking |
//! |------|--------------|----------|
//! | `format` | `black --check --diff` | Yes |
//! | `lint` | `flake8 --count --statistics` | Yes |
//! | `security` | `bandit -r` | Yes |
//! | `deps` | `safety check --full-report` | No |
//! | `test` | `pytest --cov` | Yes |

pub mod coverage;
pub mod runner;
pub mod sequencer;
pub mod state;
pub mod step;
pub mod summary;

pub use coverage::{CoverageParseError, CoverageResult, ThresholdPolicy};
pub use runner::{InvocationError, ProcessRunner, ToolOutput, ToolRunner};
pub use sequencer::QualityGateSequencer;
pub use state::{FailureReason, GateState, StepResult};
pub use step::{standard_steps, CheckStep, StepKind, ToolCommand};
pub use summary::{RunReport, StepRecord, StepStatus, SUMMARY_FILE_NAME};
