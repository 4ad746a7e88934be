//! GxP validation report generation.
//!
//! Turns the JUnit XML and coverage data a gate run leaves behind into a
//! markdown report with test results, coverage against the threshold,
//! gate statuses, evidence artifacts and approval signature blocks.
//!
//! # Example
//!
//! ```rust,ignore
//! use qgate::validation::{parse_junit_file, CoverageSummary, ValidationReport};
//!
//! let tests = parse_junit_file(Path::new("reports/junit.xml"))?;
//! let report = ValidationReport::new(tests)
//!     .with_coverage(CoverageSummary::load(Path::new("reports/coverage.xml")))
//!     .with_commit(std::env::var("GITHUB_SHA").ok());
//!
//! report.write(Path::new("reports/validation_report.md"))?;
//! ```

pub mod junit;
pub mod report;

pub use junit::{parse_junit_file, parse_junit_str, JunitParseError, JunitSummary, TestCaseResult, TestStatus};
pub use report::{format_duration, CoverageSummary, ValidationReport};

/// Default file name of the rendered report under the reports root.
pub const REPORT_FILE_NAME: &str = "validation_report.md";
