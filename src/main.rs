//! qgate - Quality-Gate Sequencer
//!
//! Runs formatting, lint, security, dependency and test checks in order and
//! enforces a coverage threshold.

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use qgate::audit::AuditLogger;
use qgate::config::GateConfig;
use qgate::error::GateError;
use qgate::quality::{
    CoverageResult, QualityGateSequencer, RunReport, ThresholdPolicy, SUMMARY_FILE_NAME,
};
use qgate::validation::{parse_junit_file, CoverageSummary, ValidationReport, REPORT_FILE_NAME};

#[derive(Parser)]
#[command(name = "qgate")]
#[command(version)]
#[command(about = "Run the code-quality gate and enforce a coverage threshold", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Configuration file (defaults to <project>/qgate.toml if present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// Minimum line coverage in percent
    #[arg(long, env = "MIN_COVERAGE", value_name = "PCT")]
    min_coverage: Option<f64>,

    /// Reports root, relative to the project directory
    #[arg(long, value_name = "DIR")]
    reports_dir: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Do not write the audit log
    #[arg(long)]
    no_audit: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full quality gate (default)
    Run(RunArgs),

    /// Evaluate the coverage threshold against an existing coverage XML
    Coverage {
        /// Coverage XML (defaults to <reports>/coverage.xml)
        #[arg(long, value_name = "FILE")]
        xml: Option<PathBuf>,

        /// Minimum line coverage in percent
        #[arg(long, env = "MIN_COVERAGE", value_name = "PCT")]
        min_coverage: Option<f64>,
    },

    /// Show the planned steps and resolved commands
    Steps {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate the GxP validation report
    Report {
        /// JUnit XML test results
        #[arg(long, value_name = "FILE")]
        junit: PathBuf,

        /// Coverage data (coverage XML or coverage.py JSON)
        #[arg(long, value_name = "FILE")]
        coverage: Option<PathBuf>,

        /// Output markdown file (defaults to <reports>/validation_report.md)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Commit SHA recorded in the report
        #[arg(long, env = "GITHUB_SHA", value_name = "SHA")]
        commit: Option<String>,

        /// Minimum line coverage in percent
        #[arg(long, env = "MIN_COVERAGE", value_name = "PCT")]
        min_coverage: Option<f64>,
    },

    /// Inspect the audit log
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand)]
enum AuditAction {
    /// Verify the audit log hash chain
    Verify {
        /// Reports root, relative to the project directory
        #[arg(long, value_name = "DIR")]
        reports_dir: Option<PathBuf>,
    },
}

/// Print an error and exit with its code.
fn exit_with(error: &GateError) -> ! {
    match error.step() {
        Some(step) => eprintln!("{} [{}] {}", "Error:".red().bold(), step, error),
        None => eprintln!("{} {}", "Error:".red().bold(), error),
    }
    std::process::exit(error.exit_code());
}

fn load_config(config_file: Option<&Path>, project_path: &Path) -> GateConfig {
    let loaded = match config_file {
        Some(path) => GateConfig::load_file(path),
        None => GateConfig::load(project_path),
    };
    loaded.unwrap_or_else(|e| exit_with(&e))
}

/// Re-validate after CLI overrides.
fn checked(config: GateConfig) -> GateConfig {
    if let Err(e) = config.validate() {
        exit_with(&e);
    }
    config
}

fn min_coverage_from_env() -> Option<f64> {
    let value = std::env::var("MIN_COVERAGE").ok()?;
    if value.trim().is_empty() {
        return None;
    }
    match value.trim().parse() {
        Ok(pct) => Some(pct),
        Err(_) => exit_with(&GateError::invalid(
            "MIN_COVERAGE",
            format!("'{}' is not a number", value),
        )),
    }
}

fn resolve(project_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_path.join(path)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "qgate=debug,info"
    } else {
        "qgate=info,warn"
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // Resolve project path
    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());

    if !project_path.is_dir() {
        exit_with(&GateError::invalid(
            "project",
            format!("directory does not exist: {}", project_path.display()),
        ));
    }

    let config = load_config(cli.config.as_deref(), &project_path);

    match cli.command {
        None => {
            // Bare `qgate` behaves like `qgate run`; only the environment applies.
            let args = RunArgs {
                min_coverage: min_coverage_from_env(),
                ..RunArgs::default()
            };
            run_gate(&project_path, config, args).await
        }
        Some(Commands::Run(args)) => run_gate(&project_path, config, args).await,

        Some(Commands::Coverage { xml, min_coverage }) => {
            let mut config = config;
            if let Some(pct) = min_coverage {
                config = config.with_min_coverage(pct);
            }
            let config = checked(config);

            let xml = match xml {
                Some(path) => resolve(&project_path, &path),
                None => project_path.join(config.coverage_xml()),
            };
            let policy = ThresholdPolicy::new(config.min_coverage_percent);

            let coverage = CoverageResult::from_file(&xml).unwrap_or_else(|e| exit_with(&e));
            match policy.evaluate(&coverage) {
                Ok(()) => {
                    println!(
                        "{} Coverage {} meets the required {:.1}%",
                        "OK".green().bold(),
                        coverage,
                        policy.min_percent()
                    );
                    Ok(())
                }
                Err(e) => exit_with(&e),
            }
        }

        Some(Commands::Steps { json }) => {
            let sequencer = QualityGateSequencer::new(&project_path, config);

            if json {
                println!("{}", serde_json::to_string_pretty(sequencer.steps())?);
                return Ok(());
            }

            println!("\n{} Planned steps", "Quality Gate:".cyan().bold());
            println!("{}", "─".repeat(40));
            for (i, step) in sequencer.steps().iter().enumerate() {
                let policy = if step.required {
                    "required".normal()
                } else {
                    "lenient".yellow()
                };
                println!("{}. {} ({})", i + 1, step.kind.title().bold(), policy);
                println!("   $ {}", step.command);
                if let Some(artifact) = &step.output_artifact {
                    println!("   report: {}", artifact.display());
                }
                if let Some(timeout) = step.timeout {
                    println!("   timeout: {}s", timeout.as_secs());
                }
            }
            println!(
                "{}. {} (required)",
                sequencer.steps().len() + 1,
                "Coverage threshold".bold()
            );
            println!(
                "   {} >= {:.1}%",
                sequencer.config().coverage_xml().display(),
                sequencer.threshold().min_percent()
            );
            Ok(())
        }

        Some(Commands::Report {
            junit,
            coverage,
            output,
            commit,
            min_coverage,
        }) => {
            let mut config = config;
            if let Some(pct) = min_coverage {
                config = config.with_min_coverage(pct);
            }
            let config = checked(config);
            let reports_dir = config.reports_dir(&project_path);

            let tests = parse_junit_file(&resolve(&project_path, &junit))?;
            let coverage = coverage.and_then(|path| CoverageSummary::load(&resolve(&project_path, &path)));

            let summary_path = reports_dir.join(SUMMARY_FILE_NAME);
            let gate_run = if summary_path.exists() {
                match RunReport::read_json(&summary_path) {
                    Ok(run) => Some(run),
                    Err(e) => {
                        eprintln!("{} {:#}", "Warning:".yellow().bold(), e);
                        None
                    }
                }
            } else {
                None
            };

            let report = ValidationReport::new(tests)
                .with_commit(commit)
                .with_coverage(coverage)
                .with_threshold(ThresholdPolicy::new(config.min_coverage_percent))
                .with_gate_run(gate_run);

            let output = match output {
                Some(path) => resolve(&project_path, &path),
                None => reports_dir.join(REPORT_FILE_NAME),
            };
            report.write(&output)?;

            if report.passed() {
                println!(
                    "{} Validation report written to {}",
                    "PASSED".green().bold(),
                    output.display()
                );
                Ok(())
            } else {
                println!(
                    "{} Validation report written to {}",
                    "FAILED".red().bold(),
                    output.display()
                );
                std::process::exit(1);
            }
        }

        Some(Commands::Audit { action }) => match action {
            AuditAction::Verify { reports_dir } => {
                let config = match reports_dir {
                    Some(dir) => checked(config.with_reports_root(dir)),
                    None => config,
                };
                let logger = AuditLogger::new(config.reports_dir(&project_path).join("audit"))?;
                let result = logger.verify()?;

                if result.is_valid {
                    println!(
                        "{} Audit log intact ({} entries verified)",
                        "OK".green().bold(),
                        result.entries_verified
                    );
                    Ok(())
                } else {
                    eprintln!(
                        "{} Audit log verification failed at entry {}: {}",
                        "Error:".red().bold(),
                        result
                            .first_invalid_entry
                            .map_or_else(|| "?".to_string(), |n| n.to_string()),
                        result.error_description.unwrap_or_default()
                    );
                    std::process::exit(1);
                }
            }
        },
    }
}

async fn run_gate(project_path: &Path, config: GateConfig, args: RunArgs) -> anyhow::Result<()> {
    let mut config = config;
    if let Some(pct) = args.min_coverage {
        config = config.with_min_coverage(pct);
    }
    if let Some(dir) = args.reports_dir {
        config = config.with_reports_root(dir);
    }
    if args.no_audit {
        config = config.with_audit(false);
    }
    let config = checked(config);

    let sequencer = QualityGateSequencer::new(project_path, config);
    let report = sequencer.run().await.unwrap_or_else(|e| exit_with(&e));

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.format());
    }

    if !report.passed() {
        std::process::exit(report.exit_code());
    }
    Ok(())
}
