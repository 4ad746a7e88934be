//! Report fixtures shaped like the files pytest-cov and pytest write.

/// A Cobertura coverage summary with the given root `line-rate`.
#[must_use]
pub fn coverage_xml(line_rate: f64) -> String {
    format!(
        r#"<?xml version="1.0" ?>
<coverage version="7.3.2" timestamp="1700000000000" lines-valid="1000" lines-covered="{covered}" line-rate="{line_rate}" branches-covered="0" branches-valid="0" branch-rate="0" complexity="0">
	<sources>
		<source>src</source>
	</sources>
	<packages>
		<package name="clinical" line-rate="{line_rate}" branch-rate="0" complexity="0">
			<classes/>
		</package>
	</packages>
</coverage>
"#,
        covered = (line_rate * 1000.0).round() as u64,
        line_rate = line_rate,
    )
}

/// Builder for JUnit XML documents.
///
/// # Example
///
/// ```rust,ignore
/// let xml = JunitFixture::new("pytest")
///     .passed("tests.test_validator", "test_valid_patient", 0.01)
///     .failed("tests.test_validator", "test_bad_age", "AssertionError: age")
///     .to_xml();
/// ```
#[derive(Debug, Clone, Default)]
pub struct JunitFixture {
    suite: String,
    cases: Vec<FixtureCase>,
}

#[derive(Debug, Clone)]
enum FixtureOutcome {
    Passed,
    Failed(String),
    Error(String),
    Skipped(String),
}

#[derive(Debug, Clone)]
struct FixtureCase {
    classname: String,
    name: String,
    time: f64,
    outcome: FixtureOutcome,
}

impl JunitFixture {
    /// Start a suite.
    #[must_use]
    pub fn new(suite: &str) -> Self {
        Self {
            suite: suite.to_string(),
            cases: Vec::new(),
        }
    }

    /// Add a passing case.
    #[must_use]
    pub fn passed(mut self, classname: &str, name: &str, time: f64) -> Self {
        self.push(classname, name, time, FixtureOutcome::Passed);
        self
    }

    /// Add a failing case.
    #[must_use]
    pub fn failed(mut self, classname: &str, name: &str, message: &str) -> Self {
        self.push(classname, name, 0.0, FixtureOutcome::Failed(message.to_string()));
        self
    }

    /// Add an erroring case.
    #[must_use]
    pub fn errored(mut self, classname: &str, name: &str, message: &str) -> Self {
        self.push(classname, name, 0.0, FixtureOutcome::Error(message.to_string()));
        self
    }

    /// Add a skipped case.
    #[must_use]
    pub fn skipped(mut self, classname: &str, name: &str, reason: &str) -> Self {
        self.push(classname, name, 0.0, FixtureOutcome::Skipped(reason.to_string()));
        self
    }

    fn push(&mut self, classname: &str, name: &str, time: f64, outcome: FixtureOutcome) {
        self.cases.push(FixtureCase {
            classname: classname.to_string(),
            name: name.to_string(),
            time,
            outcome,
        });
    }

    /// Render as a pytest-style `<testsuites>` document.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let (mut failures, mut errors, mut skipped) = (0, 0, 0);
        for case in &self.cases {
            match case.outcome {
                FixtureOutcome::Passed => {}
                FixtureOutcome::Failed(_) => failures += 1,
                FixtureOutcome::Error(_) => errors += 1,
                FixtureOutcome::Skipped(_) => skipped += 1,
            }
        }
        let time: f64 = self.cases.iter().map(|c| c.time).sum();

        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<testsuites>\n");
        xml.push_str(&format!(
            "  <testsuite name=\"{}\" errors=\"{}\" failures=\"{}\" skipped=\"{}\" tests=\"{}\" time=\"{:.3}\">\n",
            self.suite,
            errors,
            failures,
            skipped,
            self.cases.len(),
            time
        ));

        for case in &self.cases {
            let open = format!(
                "    <testcase classname=\"{}\" name=\"{}\" time=\"{:.3}\"",
                case.classname, case.name, case.time
            );
            match &case.outcome {
                FixtureOutcome::Passed => xml.push_str(&format!("{} />\n", open)),
                FixtureOutcome::Failed(msg) => xml.push_str(&format!(
                    "{}>\n      <failure message=\"{}\">{}</failure>\n    </testcase>\n",
                    open,
                    escape(msg),
                    escape(msg)
                )),
                FixtureOutcome::Error(msg) => xml.push_str(&format!(
                    "{}>\n      <error message=\"{}\">{}</error>\n    </testcase>\n",
                    open,
                    escape(msg),
                    escape(msg)
                )),
                FixtureOutcome::Skipped(msg) => xml.push_str(&format!(
                    "{}>\n      <skipped type=\"pytest.skip\" message=\"{}\" />\n    </testcase>\n",
                    open,
                    escape(msg)
                )),
            }
        }

        xml.push_str("  </testsuite>\n</testsuites>\n");
        xml
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
