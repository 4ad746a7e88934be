//! Coverage threshold evaluation.
//!
//! The test step writes a Cobertura-style XML summary whose root element
//! carries a `line-rate` attribute (a fraction between 0 and 1). The rate is
//! converted to a percentage held in integer tenths, and compared against
//! the configured minimum.
//!
//! Rounding: both the observed percentage and the minimum are rounded
//! half-up to one decimal before comparison, so `79.95` counts as `80.0`.

use std::fmt;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{GateError, Result};

/// Absorbs binary representation error (e.g. `0.8525 * 1000 = 852.4999..`).
const ROUNDING_GUARD: f64 = 1e-6;

/// Why a coverage summary could not be interpreted.
#[derive(Debug, Error, PartialEq)]
pub enum CoverageParseError {
    /// The document is not well-formed XML.
    #[error("malformed XML: {0}")]
    Xml(String),

    /// No `coverage` element was found.
    #[error("no <coverage> element found")]
    MissingElement,

    /// The `coverage` element has no `line-rate` attribute.
    #[error("<coverage> element has no line-rate attribute")]
    MissingAttribute,

    /// `line-rate` is not a number.
    #[error("line-rate '{0}' is not a number")]
    InvalidRate(String),

    /// `line-rate` lies outside `[0, 1]`.
    #[error("line-rate {0} is outside 0..=1")]
    OutOfRange(f64),
}

/// Round a percentage half-up to integer tenths.
#[must_use]
pub fn percent_to_tenths(percent: f64) -> u32 {
    (percent * 10.0 + ROUNDING_GUARD).round().max(0.0) as u32
}

fn tenths_to_percent(tenths: u32) -> f64 {
    f64::from(tenths) / 10.0
}

/// Line coverage extracted from a coverage summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageResult {
    /// Raw `line-rate` value.
    pub line_rate: f64,
    /// Percentage in tenths, rounded half-up.
    pub tenths: u32,
}

impl CoverageResult {
    /// Build from a `line-rate` fraction.
    ///
    /// # Errors
    ///
    /// Returns [`CoverageParseError::OutOfRange`] for values outside `[0, 1]`.
    pub fn from_line_rate(line_rate: f64) -> std::result::Result<Self, CoverageParseError> {
        if !line_rate.is_finite() || !(0.0..=1.0).contains(&line_rate) {
            return Err(CoverageParseError::OutOfRange(line_rate));
        }
        Ok(Self {
            line_rate,
            tenths: percent_to_tenths(line_rate * 100.0),
        })
    }

    /// Parse the `line-rate` of the first `coverage` element in `xml`.
    ///
    /// The whole document is read, so a truncated report is rejected even
    /// when its root element is intact.
    ///
    /// # Errors
    ///
    /// Returns [`CoverageParseError`] if the document is malformed or the
    /// attribute is missing or invalid.
    pub fn from_xml_str(xml: &str) -> std::result::Result<Self, CoverageParseError> {
        let mut reader = Reader::from_str(xml);
        let mut rate = None;
        let mut open: Vec<String> = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    if rate.is_none() && e.name().as_ref() == b"coverage" {
                        rate = Some(line_rate(&e)?);
                    }
                    open.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                }
                Ok(Event::Empty(e)) => {
                    if rate.is_none() && e.name().as_ref() == b"coverage" {
                        rate = Some(line_rate(&e)?);
                    }
                }
                Ok(Event::End(_)) => {
                    open.pop();
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(CoverageParseError::Xml(e.to_string())),
            }
        }

        if let Some(name) = open.last() {
            return Err(CoverageParseError::Xml(format!(
                "document ends inside <{}>",
                name
            )));
        }

        Self::from_line_rate(rate.ok_or(CoverageParseError::MissingElement)?)
    }

    /// Read and parse a coverage XML file.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::ArtifactUnreadable`] if the file is missing,
    /// unreadable, or malformed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path)
            .map_err(|e| GateError::artifact(path, e.to_string()))?;
        Self::from_xml_str(&xml).map_err(|e| GateError::artifact(path, e.to_string()))
    }

    /// Coverage percentage, one decimal.
    #[must_use]
    pub fn percent(&self) -> f64 {
        tenths_to_percent(self.tenths)
    }
}

fn line_rate(e: &BytesStart<'_>) -> std::result::Result<f64, CoverageParseError> {
    let attr = e
        .try_get_attribute("line-rate")
        .map_err(|err| CoverageParseError::Xml(err.to_string()))?
        .ok_or(CoverageParseError::MissingAttribute)?;
    let value = attr
        .unescape_value()
        .map_err(|err| CoverageParseError::Xml(err.to_string()))?;
    value
        .trim()
        .parse()
        .map_err(|_| CoverageParseError::InvalidRate(value.to_string()))
}

impl fmt::Display for CoverageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.percent())
    }
}

/// Minimum coverage a run must reach.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    min_tenths: u32,
}

impl ThresholdPolicy {
    /// Create a policy from a minimum percentage.
    #[must_use]
    pub fn new(min_percent: f64) -> Self {
        Self {
            min_tenths: percent_to_tenths(min_percent),
        }
    }

    /// Minimum percentage after rounding.
    #[must_use]
    pub fn min_percent(&self) -> f64 {
        tenths_to_percent(self.min_tenths)
    }

    /// Whether `coverage` meets the minimum.
    #[must_use]
    pub fn is_met(&self, coverage: &CoverageResult) -> bool {
        coverage.tenths >= self.min_tenths
    }

    /// Whether a percentage (0-100) meets the minimum, with the same rounding.
    #[must_use]
    pub fn is_percent_met(&self, percent: f64) -> bool {
        percent_to_tenths(percent) >= self.min_tenths
    }

    /// Check `coverage` against the minimum.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::ThresholdViolation`] citing the observed and
    /// required percentages.
    pub fn evaluate(&self, coverage: &CoverageResult) -> Result<()> {
        if self.is_met(coverage) {
            Ok(())
        } else {
            Err(GateError::ThresholdViolation {
                observed: coverage.percent(),
                required: self.min_percent(),
            })
        }
    }
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MIN_COVERAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COBERTURA: &str = r#"<?xml version="1.0" ?>
<coverage version="7.3.2" timestamp="1700000000000" lines-valid="150" lines-covered="128" line-rate="0.853" branches-covered="0" branches-valid="0" branch-rate="0" complexity="0">
	<sources>
		<source>/work/src</source>
	</sources>
	<packages>
		<package name="clinical" line-rate="0.853" branch-rate="0" complexity="0">
		</package>
	</packages>
</coverage>
"#;

    #[test]
    fn test_parse_cobertura_line_rate() {
        let cov = CoverageResult::from_xml_str(COBERTURA).unwrap();
        assert_eq!(cov.line_rate, 0.853);
        assert_eq!(cov.tenths, 853);
        assert_eq!(cov.percent(), 85.3);
        assert_eq!(cov.to_string(), "85.3%");
    }

    #[test]
    fn test_threshold_80_passes_and_90_fails() {
        let cov = CoverageResult::from_xml_str(COBERTURA).unwrap();

        assert!(ThresholdPolicy::new(80.0).evaluate(&cov).is_ok());

        let err = ThresholdPolicy::new(90.0).evaluate(&cov).unwrap_err();
        assert!(matches!(err, GateError::ThresholdViolation { .. }));
        let msg = err.to_string();
        assert!(msg.contains("85.3"), "message was: {}", msg);
        assert!(msg.contains("90"), "message was: {}", msg);
    }

    #[test]
    fn test_empty_coverage_element() {
        let cov = CoverageResult::from_xml_str(r#"<coverage line-rate="1"/>"#).unwrap();
        assert_eq!(cov.percent(), 100.0);
    }

    #[test]
    fn test_rounding_half_up() {
        assert_eq!(percent_to_tenths(85.25), 853);
        assert_eq!(percent_to_tenths(85.24), 852);
        assert_eq!(CoverageResult::from_line_rate(0.8525).unwrap().tenths, 853);
        assert_eq!(CoverageResult::from_line_rate(0.7995).unwrap().tenths, 800);
    }

    #[test]
    fn test_boundary_equal_to_threshold_passes() {
        let cov = CoverageResult::from_line_rate(0.8).unwrap();
        assert!(ThresholdPolicy::new(80.0).is_met(&cov));

        let just_below = CoverageResult::from_line_rate(0.7994).unwrap();
        assert!(!ThresholdPolicy::new(80.0).is_met(&just_below));
    }

    #[test]
    fn test_threshold_rounds_minimum() {
        let policy = ThresholdPolicy::new(79.96);
        assert_eq!(policy.min_percent(), 80.0);
        assert_eq!(ThresholdPolicy::default().min_percent(), 80.0);
    }

    #[test]
    fn test_missing_attribute() {
        let err = CoverageResult::from_xml_str(r#"<coverage version="7"></coverage>"#).unwrap_err();
        assert_eq!(err, CoverageParseError::MissingAttribute);
    }

    #[test]
    fn test_missing_element() {
        let err = CoverageResult::from_xml_str("<report><summary/></report>").unwrap_err();
        assert_eq!(err, CoverageParseError::MissingElement);

        let err = CoverageResult::from_xml_str("").unwrap_err();
        assert_eq!(err, CoverageParseError::MissingElement);
    }

    #[test]
    fn test_invalid_rate() {
        let err = CoverageResult::from_xml_str(r#"<coverage line-rate="high"/>"#).unwrap_err();
        assert_eq!(err, CoverageParseError::InvalidRate("high".to_string()));

        let err = CoverageResult::from_xml_str(r#"<coverage line-rate="1.5"/>"#).unwrap_err();
        assert_eq!(err, CoverageParseError::OutOfRange(1.5));
    }

    #[test]
    fn test_malformed_xml() {
        let err = CoverageResult::from_xml_str("<root><coverage line-rate=\"0.5\"").unwrap_err();
        assert!(matches!(err, CoverageParseError::Xml(_)), "got {:?}", err);
    }

    #[test]
    fn test_truncated_report_is_rejected() {
        let cut_mid_tag = r#"<?xml version="1.0" ?>
<coverage version="7.3.2" line-rate="0.95" branch-rate="0"><packages><package name="a""#;
        let err = CoverageResult::from_xml_str(cut_mid_tag).unwrap_err();
        assert!(matches!(err, CoverageParseError::Xml(_)), "got {:?}", err);

        let cut_between_tags = r#"<coverage line-rate="0.95"><packages><package name="a">"#;
        let err = CoverageResult::from_xml_str(cut_between_tags).unwrap_err();
        assert!(matches!(err, CoverageParseError::Xml(ref m) if m.contains("<package>")), "got {:?}", err);

        let idx = COBERTURA.find("</packages>").unwrap();
        assert!(CoverageResult::from_xml_str(&COBERTURA[..idx]).is_err());
    }

    #[test]
    fn test_truncated_file_is_artifact_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("coverage.xml");
        std::fs::write(&path, r#"<coverage line-rate="0.95"><packages>"#).unwrap();
        let err = CoverageResult::from_file(&path).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_from_file_missing_is_artifact_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("coverage.xml");
        let err = CoverageResult::from_file(&path).unwrap_err();
        assert!(matches!(err, GateError::ArtifactUnreadable { path: ref p, .. } if *p == path));
    }

    #[test]
    fn test_from_file_malformed_is_artifact_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("coverage.xml");
        std::fs::write(&path, "not xml at all").unwrap();
        let err = CoverageResult::from_file(&path).unwrap_err();
        assert!(matches!(err, GateError::ArtifactUnreadable { .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_from_file_reads_valid_report() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("coverage.xml");
        std::fs::write(&path, COBERTURA).unwrap();
        assert_eq!(CoverageResult::from_file(&path).unwrap().tenths, 853);
    }
}
