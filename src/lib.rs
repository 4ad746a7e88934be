//! qgate - Quality-Gate Sequencer
//!
//! Runs a fixed, ordered set of code-quality checks (formatting, lint,
//! security scan, dependency scan, tests with coverage) against a source
//! tree, stopping at the first required failure, then enforces a minimum
//! line-coverage threshold. Every run leaves evidence behind: tool reports,
//! a JSON summary and a hash-chained audit log.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and exit codes
//! - [`quality`] - Step sequencing, tool execution and coverage policy
//! - [`audit`] - Tamper-evident audit trail
//! - [`validation`] - JUnit parsing and validation report rendering
//! - [`testing`] - Testing infrastructure (mock runner, fixtures)
//!
//! # Example
//!
//! ```rust,ignore
//! use qgate::config::GateConfig;
//! use qgate::quality::QualityGateSequencer;
//!
//! let config = GateConfig::load(Path::new("."))?.with_min_coverage(85.0);
//! let report = QualityGateSequencer::new(".", config).run().await?;
//!
//! println!("{}", report.format());
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod quality;
pub mod testing;
pub mod validation;

// Re-export commonly used types
pub use error::{GateError, Result};

pub use config::{GateConfig, SecuritySeverity, StepOverride};

pub use quality::{
    CheckStep, CoverageResult, FailureReason, GateState, ProcessRunner, QualityGateSequencer,
    RunReport, StepKind, StepRecord, StepStatus, ThresholdPolicy, ToolCommand, ToolOutput,
    ToolRunner,
};

pub use audit::{AuditEntry, AuditEventType, AuditLogger, VerificationResult};

pub use validation::{CoverageSummary, JunitSummary, ValidationReport};

pub use testing::MockToolRunner;
