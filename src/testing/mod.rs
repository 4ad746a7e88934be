//! Testing infrastructure for qgate.
//!
//! - **Mocks**: [`MockToolRunner`] scripts tool outcomes per step and records
//!   every invocation
//! - **Fixtures**: coverage and JUnit documents shaped like pytest output
//!
//! # Example
//!
//! ```rust,ignore
//! use qgate::testing::{coverage_xml, MockToolRunner};
//!
//! let runner = MockToolRunner::new()
//!     .with_exit_code("deps", 1)
//!     .writes_file("test", "reports/coverage.xml", coverage_xml(0.853));
//! ```

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::coverage::CoverageResult;
    use crate::quality::runner::{InvocationError, ToolRunner};
    use crate::quality::step::ToolCommand;
    use std::time::Duration;
    use tempfile::TempDir;

    fn cmd(program: &str) -> ToolCommand {
        ToolCommand::new(program, ["--check"])
    }

    // =========================================================================
    // Mock Tool Runner Tests
    // =========================================================================

    #[tokio::test]
    async fn test_mock_defaults_to_success() {
        let temp = TempDir::new().unwrap();
        let runner = MockToolRunner::new();
        let out = runner.run("format", &cmd("black"), temp.path(), None).await.unwrap();
        assert!(out.success());
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_records_calls_in_order() {
        let temp = TempDir::new().unwrap();
        let runner = MockToolRunner::new();
        runner.run("format", &cmd("black"), temp.path(), None).await.unwrap();
        runner
            .run("lint", &cmd("flake8"), temp.path(), Some(Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(runner.steps_run(), vec!["format", "lint"]);
        let calls = runner.calls();
        assert_eq!(calls[1].command.program, "flake8");
        assert_eq!(calls[1].timeout, Some(Duration::from_secs(5)));
        assert_eq!(calls[0].working_dir, temp.path());
    }

    #[tokio::test]
    async fn test_mock_scripted_failures() {
        let temp = TempDir::new().unwrap();
        let runner = MockToolRunner::new()
            .with_exit_code("lint", 2)
            .with_missing_tool("security")
            .with_timeout("test")
            .with_signal("deps");

        let out = runner.run("lint", &cmd("flake8"), temp.path(), None).await.unwrap();
        assert_eq!(out.exit_code, Some(2));

        let err = runner.run("security", &cmd("bandit"), temp.path(), None).await.unwrap_err();
        assert!(matches!(err, InvocationError::NotFound { ref tool } if tool == "bandit"));

        let err = runner
            .run("test", &cmd("pytest"), temp.path(), Some(Duration::from_secs(9)))
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::TimedOut { timeout } if timeout.as_secs() == 9));

        let out = runner.run("deps", &cmd("safety"), temp.path(), None).await.unwrap();
        assert_eq!(out.exit_code, None);
    }

    #[tokio::test]
    async fn test_mock_writes_files_only_when_run() {
        let temp = TempDir::new().unwrap();
        let runner = MockToolRunner::new()
            .writes_file("test", "reports/coverage.xml", coverage_xml(0.5))
            .writes_file("format", "never.txt", "x")
            .with_missing_tool("format");

        runner.run("test", &cmd("pytest"), temp.path(), None).await.unwrap();
        let _ = runner.run("format", &cmd("black"), temp.path(), None).await;

        let cov = CoverageResult::from_file(&temp.path().join("reports/coverage.xml")).unwrap();
        assert_eq!(cov.percent(), 50.0);
        assert!(!temp.path().join("never.txt").exists());
    }

    // =========================================================================
    // Fixture Tests
    // =========================================================================

    #[test]
    fn test_coverage_fixture_parses() {
        let cov = CoverageResult::from_xml_str(&coverage_xml(0.853)).unwrap();
        assert_eq!(cov.tenths, 853);
    }

    #[test]
    fn test_junit_fixture_counts() {
        let xml = JunitFixture::new("pytest")
            .passed("tests.test_a", "test_one", 0.25)
            .failed("tests.test_a", "test_two", "assert 1 == 2")
            .skipped("tests.test_a", "test_three", "not ready")
            .to_xml();

        assert!(xml.contains("tests=\"3\""));
        assert!(xml.contains("failures=\"1\""));
        assert!(xml.contains("skipped=\"1\""));
        assert!(xml.contains("assert 1 == 2"));
    }
}
