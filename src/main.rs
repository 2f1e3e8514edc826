//! xctest-engine CLI
//!
//! Entry point for the `xctest-engine` command-line tool.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::env;
use std::path::{Path, PathBuf};
use std::process;

use xctest_engine::{
    build_arguments, logging, probe_version, Classification, ConfigError, CoverageMode,
    ResultInterpreter, RunConfig, RunReport, SystemLauncher, TestEngine, XcodeTestEngine,
};
use xctest_report::{TestResult, TestStatus, TestSummary, XcodeResultParser};

/// Exit code when a config error happens outside a run
const EXIT_CONFIG: i32 = 3;

/// Exit code for local I/O problems (cwd, serialization)
const EXIT_IO: i32 = 6;

#[derive(Parser)]
#[command(name = "xctest-engine")]
#[command(about = "Run xcodebuild unit tests and collect coverage", version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ProjectArgs {
    /// Path to engine config (default: .xctest/engine.toml in the project root)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Project root directory
    #[arg(long, default_value = ".")]
    project_root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and run the unit tests
    Run {
        #[command(flatten)]
        project: ProjectArgs,

        /// Require coverage extraction
        #[arg(long, conflicts_with = "no_coverage")]
        coverage: bool,

        /// Skip coverage extraction even if configured
        #[arg(long)]
        no_coverage: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved xcodebuild arguments without running anything
    Args {
        #[command(flatten)]
        project: ProjectArgs,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the major xcodebuild version, or "unknown"
    Version {
        #[command(flatten)]
        project: ProjectArgs,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Run {
            project,
            coverage,
            no_coverage,
            json,
        } => {
            run_tests(&project, CoverageMode::from_flags(coverage, no_coverage), json);
        }
        Commands::Args { project, json } => {
            run_args(&project, json);
        }
        Commands::Version { project } => {
            run_version(&project);
        }
    }
}

/// Resolve a `--config` override against the current directory, so the
/// engine does not reinterpret it relative to the project root.
fn config_path(project: &ProjectArgs) -> Option<PathBuf> {
    let path = project.config.as_ref()?;
    if path.is_absolute() {
        return Some(path.clone());
    }
    match env::current_dir() {
        Ok(cwd) => Some(cwd.join(path)),
        Err(e) => {
            eprintln!("Error reading current directory: {}", e);
            process::exit(EXIT_IO);
        }
    }
}

fn configure(
    engine: &XcodeTestEngine,
    project: &ProjectArgs,
    coverage: CoverageMode,
) -> RunConfig {
    let config_path = config_path(project);
    match engine.configure(&project.project_root, config_path.as_deref(), coverage) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(EXIT_CONFIG);
        }
    }
}

fn run_tests(project: &ProjectArgs, coverage: CoverageMode, json_output: bool) {
    let engine = XcodeTestEngine::new();
    let config = configure(&engine, project, coverage);

    let report = match engine.run(&config) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    };

    let results = XcodeResultParser::new().interpret(&report, &config.project_root);
    let summary = TestSummary::from_results(&results);

    if json_output {
        let output = serde_json::json!({
            "engine": engine.name(),
            "summary": summary,
            "results": results,
            "report": report,
        });
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(EXIT_IO);
            }
        }
    } else {
        print_human(&report, &results, &summary);
    }

    process::exit(exit_code(&report, &summary));
}

/// 0 all passed, 1 tests failed, 2 broken.
fn exit_code(report: &RunReport, summary: &TestSummary) -> i32 {
    match report.classification {
        Classification::Broken { .. } => 2,
        Classification::TestsFailed => 1,
        Classification::Passed if !summary.all_passed() => 1,
        Classification::Passed => 0,
    }
}

fn print_human(report: &RunReport, results: &[TestResult], summary: &TestSummary) {
    for result in results {
        let label = match result.status {
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
            TestStatus::Skip => "SKIP",
            TestStatus::Broken => "BROKEN",
        };
        match result.duration_seconds {
            Some(secs) => println!("[{}] {} ({:.3}s)", label, result.name, secs),
            None => println!("[{}] {}", label, result.name),
        }
        if result.status.is_failure() {
            if let Some(ref details) = result.details {
                for line in details.lines() {
                    println!("    {}", line);
                }
            }
        }
    }

    println!();
    println!(
        "{} tests: {} passed, {} failed, {} skipped, {} broken ({}, {})",
        summary.total,
        summary.passed,
        summary.failed,
        summary.skipped,
        summary.broken,
        report.classification,
        report.strategy
    );
    if let Some(ref artifacts) = report.coverage_artifacts {
        if let Some(ref profile) = artifacts.profile_path {
            println!("Coverage profile: {}", profile.display());
        }
    }
}

fn run_args(project: &ProjectArgs, json_output: bool) {
    let engine = XcodeTestEngine::new();
    let config = configure(&engine, project, CoverageMode::Unset);
    let args = build_arguments(&config.build, config.coverage_enabled);

    if json_output {
        match serde_json::to_string_pretty(&args) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(EXIT_IO);
            }
        }
    } else {
        for pair in args.chunks(2) {
            match pair {
                [key, value] => println!("{} \"{}\"", key, value),
                [single] => println!("{}", single),
                _ => {}
            }
        }
    }
}

/// Probe with the configured xcodebuild, falling back to the one on PATH
/// when the project has no config file.
fn run_version(project: &ProjectArgs) {
    let engine = XcodeTestEngine::new();
    let config_path = config_path(project);

    let configured = engine.configure(
        &project.project_root,
        config_path.as_deref(),
        CoverageMode::Disabled,
    );
    let config = match configured {
        Ok(config) => config,
        Err(ConfigError::NotFound(_)) => default_config(&project.project_root),
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(EXIT_CONFIG);
        }
    };

    match probe_version(&SystemLauncher::new(), &config) {
        Some(major) => println!("{}", major),
        None => println!("unknown"),
    }
}

fn default_config(project_root: &Path) -> RunConfig {
    match RunConfig::parse(project_root, "[build]\n", CoverageMode::Disabled) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(EXIT_CONFIG);
        }
    }
}
