//! JUnit XML parsing.
//!
//! Counts come from the `testsuite` attributes (every nested suite, or the
//! root when it is itself a `testsuite`); per-case status comes from the
//! `testcase` elements.

use std::fmt;
use std::path::Path;

use anyhow::Context;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a failure message kept in the report.
pub const MAX_MESSAGE_CHARS: usize = 200;

/// Why a JUnit document could not be interpreted.
#[derive(Debug, Error, PartialEq)]
pub enum JunitParseError {
    /// The document is not well-formed XML.
    #[error("malformed XML: {0}")]
    Xml(String),

    /// The document has no elements.
    #[error("document has no root element")]
    Empty,

    /// A numeric attribute could not be parsed.
    #[error("attribute {attribute}=\"{value}\" is not a number")]
    InvalidNumber { attribute: String, value: String },
}

/// Outcome of one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        };
        write!(f, "{}", s)
    }
}

/// One `testcase` element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub name: String,
    pub classname: String,
    pub time: f64,
    pub status: TestStatus,
    /// Failure or error text, truncated to [`MAX_MESSAGE_CHARS`].
    pub message: Option<String>,
}

/// Aggregated test results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JunitSummary {
    pub total: u64,
    pub failures: u64,
    pub errors: u64,
    pub skipped: u64,
    /// Total execution time in seconds.
    pub time: f64,
    pub test_cases: Vec<TestCaseResult>,
}

impl JunitSummary {
    /// Tests that neither failed, errored nor were skipped.
    #[must_use]
    pub fn passed(&self) -> u64 {
        self.total.saturating_sub(
            self.failures
                .saturating_add(self.errors)
                .saturating_add(self.skipped),
        )
    }

    /// Failures plus errors.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failures.saturating_add(self.errors)
    }

    /// Pass rate in percent, `None` when no tests ran.
    #[must_use]
    pub fn pass_rate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.passed() as f64 / self.total as f64 * 100.0)
        }
    }

    /// Cases with status [`TestStatus::Failed`].
    #[must_use]
    pub fn failed_tests(&self) -> Vec<&TestCaseResult> {
        self.test_cases
            .iter()
            .filter(|c| c.status == TestStatus::Failed)
            .collect()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SuiteTotals {
    tests: u64,
    failures: u64,
    errors: u64,
    skipped: u64,
    time: f64,
}

impl SuiteTotals {
    fn from_element(e: &BytesStart<'_>) -> Result<Self, JunitParseError> {
        Ok(Self {
            tests: number_attr(e, "tests")?.unwrap_or(0),
            failures: number_attr(e, "failures")?.unwrap_or(0),
            errors: number_attr(e, "errors")?.unwrap_or(0),
            skipped: number_attr(e, "skipped")?.unwrap_or(0),
            time: number_attr(e, "time")?.unwrap_or(0.0),
        })
    }
}

#[derive(Debug)]
struct MessageCapture {
    text: String,
    fallback: Option<String>,
}

impl MessageCapture {
    fn finish(self) -> String {
        let text = self.text.trim();
        let message = if !text.is_empty() {
            text.to_string()
        } else {
            self.fallback
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "No message".to_string())
        };
        truncate(&message, MAX_MESSAGE_CHARS)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn text_attr(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, JunitParseError> {
    let Some(attr) = e
        .try_get_attribute(name)
        .map_err(|err| JunitParseError::Xml(err.to_string()))?
    else {
        return Ok(None);
    };
    let value = attr
        .unescape_value()
        .map_err(|err| JunitParseError::Xml(err.to_string()))?;
    Ok(Some(value.into_owned()))
}

fn number_attr<T: std::str::FromStr>(
    e: &BytesStart<'_>,
    name: &str,
) -> Result<Option<T>, JunitParseError> {
    match text_attr(e, name)? {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| JunitParseError::InvalidNumber {
                attribute: name.to_string(),
                value,
            }),
    }
}

#[derive(Debug, Default)]
struct Collector {
    root_seen: bool,
    root_suite: Option<SuiteTotals>,
    suites: Vec<SuiteTotals>,
    cases: Vec<TestCaseResult>,
    current: Option<TestCaseResult>,
    capture: Option<MessageCapture>,
}

impl Collector {
    fn open(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<(), JunitParseError> {
        let is_root = !self.root_seen;
        self.root_seen = true;

        match e.name().as_ref() {
            b"testsuite" => {
                let totals = SuiteTotals::from_element(e)?;
                if is_root {
                    self.root_suite = Some(totals);
                } else {
                    self.suites.push(totals);
                }
            }
            b"testcase" => {
                let case = TestCaseResult {
                    name: text_attr(e, "name")?.unwrap_or_else(|| "Unknown".to_string()),
                    classname: text_attr(e, "classname")?
                        .unwrap_or_else(|| "Unknown".to_string()),
                    time: number_attr(e, "time")?.unwrap_or(0.0),
                    status: TestStatus::Passed,
                    message: None,
                };
                if empty {
                    self.cases.push(case);
                } else {
                    self.current = Some(case);
                }
            }
            b"failure" | b"error" => {
                if let Some(case) = self.current.as_mut() {
                    case.status = TestStatus::Failed;
                    let capture = MessageCapture {
                        text: String::new(),
                        fallback: text_attr(e, "message")?,
                    };
                    if empty {
                        if case.message.is_none() {
                            case.message = Some(capture.finish());
                        }
                    } else {
                        self.capture = Some(capture);
                    }
                }
            }
            b"skipped" => {
                if let Some(case) = self.current.as_mut() {
                    if case.status == TestStatus::Passed {
                        case.status = TestStatus::Skipped;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if let Some(capture) = self.capture.as_mut() {
            capture.text.push_str(text);
        }
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"failure" | b"error" => {
                if let (Some(capture), Some(case)) = (self.capture.take(), self.current.as_mut()) {
                    if case.message.is_none() {
                        case.message = Some(capture.finish());
                    }
                }
            }
            b"testcase" => {
                if let Some(case) = self.current.take() {
                    self.cases.push(case);
                }
            }
            _ => {}
        }
    }

    fn finish(self) -> Result<JunitSummary, JunitParseError> {
        if !self.root_seen {
            return Err(JunitParseError::Empty);
        }

        let suites = if self.suites.is_empty() {
            self.root_suite.into_iter().collect()
        } else {
            self.suites
        };

        let mut summary = JunitSummary {
            test_cases: self.cases,
            ..JunitSummary::default()
        };
        for suite in suites {
            summary.total = summary.total.saturating_add(suite.tests);
            summary.failures = summary.failures.saturating_add(suite.failures);
            summary.errors = summary.errors.saturating_add(suite.errors);
            summary.skipped = summary.skipped.saturating_add(suite.skipped);
            summary.time += suite.time;
        }
        Ok(summary)
    }
}

/// Parse a JUnit XML document.
///
/// # Errors
///
/// Returns [`JunitParseError`] if the document is malformed, empty, or has
/// non-numeric count attributes.
pub fn parse_junit_str(xml: &str) -> Result<JunitSummary, JunitParseError> {
    let mut reader = Reader::from_str(xml);
    let mut collector = Collector::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => collector.open(&e, false)?,
            Ok(Event::Empty(e)) => collector.open(&e, true)?,
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|err| JunitParseError::Xml(err.to_string()))?;
                collector.text(&text);
            }
            Ok(Event::CData(c)) => {
                collector.text(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(e)) => collector.close(e.name().as_ref()),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(JunitParseError::Xml(e.to_string())),
        }
    }

    collector.finish()
}

/// Read and parse a JUnit XML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn parse_junit_file(path: &Path) -> anyhow::Result<JunitSummary> {
    let xml = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JUnit report {}", path.display()))?;
    let summary = parse_junit_str(&xml)
        .with_context(|| format!("Failed to parse JUnit report {}", path.display()))?;
    tracing::info!(tests = summary.total, "Parsed JUnit report");
    Ok(summary)
}
