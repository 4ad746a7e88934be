//! Benchmark suite for qgate.
//!
//! This module provides performance benchmarks for:
//! - Coverage summary parsing and threshold evaluation
//! - JUnit XML parsing at growing suite sizes
//! - Validation report rendering
//! - A full sequencer run against the mock runner
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Save baseline for comparison
//! cargo bench -- --save-baseline main
//!
//! # Compare against baseline
//! cargo bench -- --baseline main
//! ```
//!
//! Criterion writes its JSON estimates and HTML reports to `target/criterion/`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tempfile::TempDir;

use qgate::config::GateConfig;
use qgate::quality::{CoverageResult, QualityGateSequencer, ThresholdPolicy};
use qgate::testing::{coverage_xml, JunitFixture, MockToolRunner};
use qgate::validation::{parse_junit_str, CoverageSummary, ValidationReport};

// ============================================================================
// Coverage Benchmarks
// ============================================================================

/// Benchmark parsing the coverage summary and applying the threshold.
fn bench_coverage_threshold(c: &mut Criterion) {
    let mut group = c.benchmark_group("coverage_threshold");
    let xml = coverage_xml(0.8525);
    let policy = ThresholdPolicy::new(85.0);

    group.bench_function("parse_summary", |b| {
        b.iter(|| black_box(CoverageResult::from_xml_str(black_box(&xml))))
    });

    group.bench_function("parse_and_evaluate", |b| {
        b.iter(|| {
            let coverage = CoverageResult::from_xml_str(black_box(&xml)).unwrap();
            black_box(policy.is_met(&coverage))
        })
    });

    group.finish();
}

// ============================================================================
// JUnit Benchmarks
// ============================================================================

/// Build a suite where every tenth case fails and every twentieth is skipped.
fn junit_suite(cases: usize) -> String {
    let mut fixture = JunitFixture::new("pytest");
    for i in 0..cases {
        let class = format!("tests.test_module_{}", i / 25);
        let name = format!("test_case_{}", i);
        fixture = match i {
            i if i % 20 == 0 => fixture.skipped(&class, &name, "requires database"),
            i if i % 10 == 0 => fixture.failed(&class, &name, "AssertionError: expected 42"),
            _ => fixture.passed(&class, &name, 0.013),
        };
    }
    fixture.to_xml()
}

/// Benchmark JUnit parsing at growing suite sizes.
fn bench_junit_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("junit_parsing");

    for cases in [50, 500, 5000] {
        let xml = junit_suite(cases);
        group.throughput(Throughput::Elements(cases as u64));
        group.bench_with_input(BenchmarkId::new("parse", cases), &xml, |b, xml| {
            b.iter(|| black_box(parse_junit_str(black_box(xml))))
        });
    }

    group.finish();
}

// ============================================================================
// Report Benchmarks
// ============================================================================

/// Benchmark rendering the validation report markdown.
fn bench_report_rendering(c: &mut Criterion) {
    let mut group = c.benchmark_group("report_rendering");

    for cases in [50, 500] {
        let tests = parse_junit_str(&junit_suite(cases)).unwrap();
        let coverage = CoverageResult::from_line_rate(0.873).unwrap();
        let report = ValidationReport::new(tests)
            .with_commit(Some("4f2c9e1a".to_string()))
            .with_coverage(Some(CoverageSummary::from_xml_result(&coverage)))
            .with_threshold(ThresholdPolicy::new(85.0));

        group.bench_with_input(BenchmarkId::new("render", cases), &report, |b, report| {
            b.iter(|| black_box(report.render()))
        });
    }

    group.finish();
}

// ============================================================================
// Sequencer Benchmarks
// ============================================================================

/// Benchmark sequencer overhead with tool execution mocked out.
///
/// Covers state transitions, artifact checks, summary and audit writes.
fn bench_sequencer_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequencer_run");
    group.sample_size(30);

    let rt = tokio::runtime::Runtime::new().unwrap();

    for audit in [false, true] {
        let temp_dir = TempDir::new().unwrap();
        let runner = MockToolRunner::new()
            .with_exit_code("deps", 1)
            .writes_file("test", "reports/coverage.xml", coverage_xml(0.9));
        let sequencer = QualityGateSequencer::with_runner(
            temp_dir.path(),
            GateConfig::default().with_audit(audit),
            Arc::new(runner),
        );

        let label = if audit { "with_audit" } else { "no_audit" };
        group.bench_function(label, |b| {
            b.iter(|| black_box(rt.block_on(sequencer.run()).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_coverage_threshold,
    bench_junit_parsing,
    bench_report_rendering,
    bench_sequencer_run
);
criterion_main!(benches);
