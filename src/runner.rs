//! Build/test run state machine
//!
//! States: INIT → PRE_BUILD → PROBING → {BUILDING → TESTING | TESTING}
//!         → {COVERAGE_EXTRACTION → DONE | DONE | BROKEN}
//!
//! The exit code of the final xcodebuild step decides the classification.
//! Process failures during build or test become a `Broken` classification
//! in the report; only the pre-build hook, coverage extraction and process
//! spawn failures abort the run with an error.

use std::fmt;
use std::io;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::command::{self, CommandInvocation, XcodebuildAction};
use crate::config::{ConfigError, RunConfig};
use crate::coverage::{CoverageArtifacts, CoverageError, CoverageExtractor};
use crate::engine::ENGINE_NAME;
use crate::hook::{self, HookError};
use crate::process::{run_to_completion, run_until_sentinel, ExecutionOutcome, ProcessLauncher};
use crate::toolchain::{self, ToolVersion};

/// Run state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    /// Running the pre-build hook
    PreBuild,
    /// Querying the xcodebuild version
    Probing,
    /// `build-for-testing`
    Building,
    /// `test-without-building` or the combined `test`
    Testing,
    CoverageExtraction,
    Done,
    Broken,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Broken)
    }

    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: RunState) -> bool {
        match (self, target) {
            (RunState::Init, RunState::PreBuild) => true,

            (RunState::PreBuild, RunState::Probing) => true,
            (RunState::PreBuild, RunState::Broken) => true,

            (RunState::Probing, RunState::Building) => true,
            (RunState::Probing, RunState::Testing) => true,

            // A failed build goes straight to classification
            (RunState::Building, RunState::Testing) => true,
            (RunState::Building, RunState::Done) => true,
            (RunState::Building, RunState::Broken) => true,

            (RunState::Testing, RunState::CoverageExtraction) => true,
            (RunState::Testing, RunState::Done) => true,
            (RunState::Testing, RunState::Broken) => true,

            (RunState::CoverageExtraction, RunState::Done) => true,
            (RunState::CoverageExtraction, RunState::Broken) => true,

            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Init => "INIT",
            RunState::PreBuild => "PRE_BUILD",
            RunState::Probing => "PROBING",
            RunState::Building => "BUILDING",
            RunState::Testing => "TESTING",
            RunState::CoverageExtraction => "COVERAGE_EXTRACTION",
            RunState::Done => "DONE",
            RunState::Broken => "BROKEN",
        };
        f.write_str(s)
    }
}

/// How build and test are invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// `build-for-testing`, then `test-without-building` watched for the
    /// completion line
    Decoupled,
    /// A single `test` invocation run to completion
    Combined,
}

impl Strategy {
    /// Decoupled for versions at or above `cutoff`; combined for older or
    /// unknown versions.
    pub fn select(version: ToolVersion, cutoff: u32) -> Self {
        match version {
            Some(major) if major >= cutoff => Strategy::Decoupled,
            _ => Strategy::Combined,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Decoupled => f.write_str("decoupled"),
            Strategy::Combined => f.write_str("combined"),
        }
    }
}

/// Outcome class of a run, derived from the final exit code alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    /// Exit code 0
    Passed,
    /// The designated "tests failed" exit code; individual failures are
    /// left to the result interpreter
    TestsFailed,
    /// Any other exit code; carries the step's stderr verbatim
    Broken { stderr: String },
}

impl Classification {
    pub fn classify(outcome: &ExecutionOutcome, tests_failed_exit_code: i32) -> Self {
        match outcome.exit_code {
            0 => Classification::Passed,
            code if code == tests_failed_exit_code => Classification::TestsFailed,
            _ => Classification::Broken {
                stderr: outcome.stderr_text(),
            },
        }
    }

    pub fn is_broken(&self) -> bool {
        matches!(self, Classification::Broken { .. })
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Passed => f.write_str("passed"),
            Classification::TestsFailed => f.write_str("tests failed"),
            Classification::Broken { .. } => f.write_str("broken"),
        }
    }
}

/// One state change, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub engine: String,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    /// Terminal state reached
    pub state: RunState,

    pub transitions: Vec<StateTransition>,

    /// Probed major version (None if unknown)
    pub tool_version: ToolVersion,

    pub strategy: Strategy,

    /// Every external command issued, in order
    pub invocations: Vec<CommandInvocation>,

    /// Outcome of the last xcodebuild step
    pub outcome: ExecutionOutcome,

    pub classification: Classification,

    /// `llvm-cov show` text, when coverage was extracted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_artifacts: Option<CoverageArtifacts>,

    /// SHA-256 of the configuration file
    pub config_digest: String,
}

impl RunReport {
    pub fn stdout(&self) -> String {
        self.outcome.stdout_text()
    }

    pub fn stderr(&self) -> String {
        self.outcome.stderr_text()
    }
}

/// Errors that abort a run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("pre-build failed: {0}")]
    PreBuild(#[from] HookError),

    #[error("coverage extraction failed: {0}")]
    Coverage(#[from] CoverageError),

    #[error("failed to start `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl RunError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) => 3,
            RunError::PreBuild(_) => 4,
            RunError::Coverage(_) => 5,
            RunError::Launch { .. } => 6,
        }
    }
}

/// Result type for run operations
pub type RunResult<T> = Result<T, RunError>;

/// State and transition log for one run.
struct Progress {
    state: RunState,
    transitions: Vec<StateTransition>,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: RunState::Init,
            transitions: Vec::new(),
        }
    }

    fn advance(&mut self, to: RunState) {
        debug_assert!(
            self.state.can_transition_to(to),
            "invalid transition {} -> {}",
            self.state,
            to
        );
        debug!(from = %self.state, to = %to, "state transition");
        self.transitions.push(StateTransition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
    }
}

/// Completion mode for an xcodebuild step.
#[derive(Clone, Copy)]
enum Watch {
    ToCompletion,
    UntilSentinel,
}

/// Drives one build/test run through a process launcher.
pub struct BuildTestRunner<'a> {
    launcher: &'a dyn ProcessLauncher,
}

impl<'a> BuildTestRunner<'a> {
    pub fn new(launcher: &'a dyn ProcessLauncher) -> Self {
        Self { launcher }
    }

    /// Execute the run described by `config`.
    pub fn run(&self, config: &RunConfig) -> RunResult<RunReport> {
        let started_at = Utc::now();
        let mut progress = Progress::new();
        let mut invocations = Vec::new();

        progress.advance(RunState::PreBuild);
        match hook::run_pre_build(self.launcher, config) {
            Ok(Some(invocation)) => invocations.push(invocation),
            Ok(None) => debug!("no pre-build command configured"),
            Err(e) => {
                progress.advance(RunState::Broken);
                return Err(e.into());
            }
        }

        progress.advance(RunState::Probing);
        if let Some(invocation) = toolchain::version_invocation(config) {
            invocations.push(invocation);
        }
        let tool_version = toolchain::probe_version(self.launcher, config);
        let strategy = Strategy::select(tool_version, config.watch.decoupled_min_version);
        info!(?tool_version, %strategy, "selected build strategy");

        let outcome = match strategy {
            Strategy::Decoupled => {
                progress.advance(RunState::Building);
                let build = self.step(
                    config,
                    XcodebuildAction::BuildForTesting,
                    Watch::ToCompletion,
                    &mut invocations,
                )?;
                if build.success() {
                    progress.advance(RunState::Testing);
                    self.step(
                        config,
                        XcodebuildAction::TestWithoutBuilding,
                        Watch::UntilSentinel,
                        &mut invocations,
                    )?
                } else {
                    warn!(exit_code = build.exit_code, "build-for-testing failed");
                    build
                }
            }
            Strategy::Combined => {
                progress.advance(RunState::Testing);
                self.step(config, XcodebuildAction::Test, Watch::ToCompletion, &mut invocations)?
            }
        };

        let classification =
            Classification::classify(&outcome, config.watch.tests_failed_exit_code);
        info!(
            exit_code = outcome.exit_code,
            terminated = outcome.terminated,
            %classification,
            "run classified"
        );

        let mut coverage = None;
        let mut coverage_artifacts = None;
        match classification {
            Classification::Passed if config.coverage_enabled => {
                progress.advance(RunState::CoverageExtraction);
                let extraction = match CoverageExtractor::new(self.launcher).extract(config) {
                    Ok(extraction) => extraction,
                    Err(e) => {
                        progress.advance(RunState::Broken);
                        return Err(e.into());
                    }
                };
                invocations.extend(extraction.invocations);
                coverage = Some(extraction.report);
                coverage_artifacts = Some(extraction.artifacts);
                progress.advance(RunState::Done);
            }
            Classification::Passed | Classification::TestsFailed => {
                if config.coverage_enabled {
                    debug!("skipping coverage for a run with failures");
                }
                progress.advance(RunState::Done);
            }
            Classification::Broken { .. } => progress.advance(RunState::Broken),
        }

        Ok(RunReport {
            engine: ENGINE_NAME.to_string(),
            started_at,
            finished_at: Utc::now(),
            state: progress.state,
            transitions: progress.transitions,
            tool_version,
            strategy,
            invocations,
            outcome,
            classification,
            coverage,
            coverage_artifacts,
            config_digest: config.digest.clone(),
        })
    }

    fn step(
        &self,
        config: &RunConfig,
        action: XcodebuildAction,
        watch: Watch,
        invocations: &mut Vec<CommandInvocation>,
    ) -> RunResult<ExecutionOutcome> {
        let invocation = command::xcodebuild(config, action).ok_or_else(|| {
            ConfigError::ValidationError("tools.xcodebuild must name a command".to_string())
        })?;
        invocations.push(invocation.clone());
        info!(command = %invocation, "running xcodebuild");

        let timing = config.watch.timing();
        let result = match watch {
            Watch::ToCompletion => run_to_completion(self.launcher, &invocation, timing),
            Watch::UntilSentinel => {
                run_until_sentinel(self.launcher, &invocation, &config.watch.sentinels(), timing)
            }
        };

        result.map_err(|source| RunError::Launch {
            command: invocation.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::config::CoverageMode;
    use crate::process::fake::{FakeLauncher, Script};
    use tempfile::TempDir;

    const BASIC: &str = "[build]\nscheme = \"MyApp\"\n\n[watch]\npoll-interval-ms = 10\ntermination-grace-seconds = 0\n";

    fn config(toml: &str) -> RunConfig {
        RunConfig::parse(Path::new("/proj"), toml, CoverageMode::Unset).unwrap()
    }

    fn xcode(version: &str) -> Script {
        Script::exits(0).read(&format!("Xcode {version}\nBuild version 1A1\n"), "")
    }

    fn passing_tests() -> Script {
        Script::hangs()
            .read("Test Case '-[MyAppTests testA]' passed (0.001 seconds).\n", "")
            .read("** TEST EXECUTE SUCCEEDED **\n", "")
    }

    /// Trailing action argument of each xcodebuild call.
    fn actions(launcher: &FakeLauncher) -> Vec<String> {
        launcher
            .calls()
            .iter()
            .filter(|c| c.program == "xcodebuild")
            .filter_map(|c| c.args.last().cloned())
            .collect()
    }

    #[test]
    fn test_strategy_select() {
        assert_eq!(Strategy::select(Some(16), 8), Strategy::Decoupled);
        assert_eq!(Strategy::select(Some(8), 8), Strategy::Decoupled);
        assert_eq!(Strategy::select(Some(7), 8), Strategy::Combined);
        assert_eq!(Strategy::select(None, 8), Strategy::Combined);
    }

    #[test]
    fn test_classification() {
        let outcome = |code: i32| {
            ExecutionOutcome::exited(code, crate::process::OutputChunk::new("", "boom\n"))
        };
        assert_eq!(Classification::classify(&outcome(0), 65), Classification::Passed);
        assert_eq!(Classification::classify(&outcome(65), 65), Classification::TestsFailed);
        for code in [1, 2, 64, 66, 70, 134, -1] {
            assert_eq!(
                Classification::classify(&outcome(code), 65),
                Classification::Broken {
                    stderr: "boom\n".to_string()
                }
            );
        }
    }

    #[test]
    fn test_state_transitions() {
        assert!(RunState::Init.can_transition_to(RunState::PreBuild));
        assert!(RunState::Building.can_transition_to(RunState::Broken));
        assert!(!RunState::Init.can_transition_to(RunState::Testing));
        assert!(!RunState::Done.can_transition_to(RunState::Broken));
        assert!(RunState::Broken.is_terminal());
    }

    #[test]
    fn test_decoupled_builds_before_testing() {
        let launcher = FakeLauncher::new()
            .on("-version", xcode("16.2"))
            .on("build-for-testing", Script::exits(0).read("** TEST BUILD SUCCEEDED **\n", ""))
            .on("test-without-building", passing_tests());

        let report = BuildTestRunner::new(&launcher).run(&config(BASIC)).unwrap();

        assert_eq!(actions(&launcher), vec!["-version", "build-for-testing", "test-without-building"]);
        assert_eq!(report.strategy, Strategy::Decoupled);
        assert_eq!(report.tool_version, Some(16));
        assert_eq!(report.classification, Classification::Passed);
        assert_eq!(report.state, RunState::Done);
        assert!(report.outcome.terminated);
        assert!(report.stdout().contains("testA"));
        assert_eq!(report.invocations, launcher.calls());
    }

    #[test]
    fn test_legacy_version_runs_single_test() {
        let launcher = FakeLauncher::new()
            .on("-version", xcode("7.3"))
            .on("test", Script::exits(0).read("** TEST SUCCEEDED **\n", ""));

        let report = BuildTestRunner::new(&launcher).run(&config(BASIC)).unwrap();

        assert_eq!(actions(&launcher), vec!["-version", "test"]);
        assert_eq!(report.strategy, Strategy::Combined);
        assert!(!report.outcome.terminated);
    }

    #[test]
    fn test_unknown_version_falls_back_to_combined() {
        let launcher = FakeLauncher::new()
            .on("-version", Script::exits(0).read("Xcode sixteen\n", ""))
            .on("test", Script::exits(0));

        let report = BuildTestRunner::new(&launcher).run(&config(BASIC)).unwrap();

        assert_eq!(report.tool_version, None);
        assert_eq!(actions(&launcher), vec!["-version", "test"]);
    }

    #[test]
    fn test_no_pre_build_proceeds_to_probing() {
        let launcher = FakeLauncher::new()
            .on("-version", xcode("16.0"))
            .on("build-for-testing", Script::exits(0))
            .on("test-without-building", passing_tests());

        let report = BuildTestRunner::new(&launcher).run(&config(BASIC)).unwrap();

        assert!(launcher.calls().iter().all(|c| c.program != "sh"));
        let path: Vec<RunState> = report.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![
                RunState::PreBuild,
                RunState::Probing,
                RunState::Building,
                RunState::Testing,
                RunState::Done,
            ]
        );
    }

    #[test]
    fn test_pre_build_runs_first() {
        let launcher = FakeLauncher::new()
            .on("-c", Script::exits(0))
            .on("-version", xcode("7.0"))
            .on("test", Script::exits(0));
        let toml = format!("pre-build = \"make deps\"\n{BASIC}");

        let report = BuildTestRunner::new(&launcher).run(&config(&toml)).unwrap();

        assert_eq!(report.invocations[0].program, "sh");
        assert_eq!(launcher.calls()[0].args, vec!["-c", "make deps"]);
    }

    #[test]
    fn test_pre_build_failure_aborts() {
        let launcher = FakeLauncher::new()
            .on("-c", Script::exits(1).read("", "missing tool\n"))
            .on("-version", xcode("16.0"));
        let toml = format!("pre-build = \"make deps\"\n{BASIC}");

        let err = BuildTestRunner::new(&launcher).run(&config(&toml)).unwrap_err();

        assert!(matches!(err, RunError::PreBuild(HookError::Failed { exit_code: 1, .. })));
        assert_eq!(err.exit_code(), 4);
        assert_eq!(launcher.calls().len(), 1);
    }

    #[test]
    fn test_build_failure_skips_testing() {
        let launcher = FakeLauncher::new()
            .on("-version", xcode("16.0"))
            .on(
                "build-for-testing",
                Script::exits(70).read("", "error: Unable to find a destination\n"),
            )
            .on("test-without-building", passing_tests());

        let report = BuildTestRunner::new(&launcher).run(&config(BASIC)).unwrap();

        assert_eq!(
            report.classification,
            Classification::Broken {
                stderr: "error: Unable to find a destination\n".to_string()
            }
        );
        assert_eq!(report.state, RunState::Broken);
        assert!(!launcher.launched("test-without-building"));
    }

    #[test]
    fn test_tests_failed_code_is_not_broken() {
        let launcher = FakeLauncher::new()
            .on("-version", xcode("7.0"))
            .on(
                "test",
                Script::exits(65).read("Test Case '-[A b]' failed (0.1 seconds).\n", "failures\n"),
            );

        let report = BuildTestRunner::new(&launcher).run(&config(BASIC)).unwrap();

        assert_eq!(report.classification, Classification::TestsFailed);
        assert_eq!(report.state, RunState::Done);
    }

    #[test]
    fn test_configured_tests_failed_code() {
        let launcher = FakeLauncher::new()
            .on("-version", xcode("7.0"))
            .on("test", Script::exits(65));
        let toml = format!("{BASIC}tests-failed-exit-code = 1\n");

        let report = BuildTestRunner::new(&launcher).run(&config(&toml)).unwrap();

        assert!(report.classification.is_broken());
    }

    #[test]
    fn test_coverage_skipped_on_failure() {
        let launcher = FakeLauncher::new()
            .on("-showBuildSettings", Script::exits(0))
            .on("-version", xcode("7.0"))
            .on("test", Script::exits(65));
        let toml = format!("{BASIC}\n[coverage]\nproduct = \"MyApp.app/MyApp\"\n");

        let report = BuildTestRunner::new(&launcher).run(&config(&toml)).unwrap();

        assert!(report.coverage.is_none());
        assert!(!launcher.launched("-showBuildSettings"));
    }

    #[test]
    fn test_coverage_skipped_when_disabled() {
        let launcher = FakeLauncher::new()
            .on("-showBuildSettings", Script::exits(0))
            .on("-version", xcode("7.0"))
            .on("test", Script::exits(0));
        let toml = format!("{BASIC}\n[coverage]\nproduct = \"MyApp.app/MyApp\"\n");
        let config = RunConfig::parse(Path::new("/proj"), &toml, CoverageMode::Disabled).unwrap();

        let report = BuildTestRunner::new(&launcher).run(&config).unwrap();

        assert!(report.coverage.is_none());
        assert!(!launcher.launched("-showBuildSettings"));
        assert_eq!(launcher.calls()[1].args[..4], ["-scheme", "MyApp", "-enableCodeCoverage", "NO"]);
    }

    #[test]
    fn test_coverage_extracted_after_clean_run() {
        let temp = TempDir::new().unwrap();
        let objroot = temp.path().join("Build/Intermediates");
        for rel in [
            "CodeCoverage/MyApp/Coverage.profdata",
            "CodeCoverage/MyApp/Products/Debug-iphonesimulator/MyApp.app/MyApp",
        ] {
            let path = objroot.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"").unwrap();
        }

        let launcher = FakeLauncher::new()
            .on(
                "-showBuildSettings",
                Script::exits(0).read(&format!("    OBJROOT = {}\n", objroot.display()), ""),
            )
            .on("-version", xcode("16.0"))
            .on("build-for-testing", Script::exits(0))
            .on("test-without-building", passing_tests())
            .on("show", Script::exits(0).read("coverage text\n", ""));
        let toml = format!("{BASIC}\n[coverage]\nproduct = \"MyApp.app/MyApp\"\n");
        let config = RunConfig::parse(temp.path(), &toml, CoverageMode::Unset).unwrap();

        let report = BuildTestRunner::new(&launcher).run(&config).unwrap();

        assert_eq!(report.coverage.as_deref(), Some("coverage text\n"));
        assert_eq!(report.state, RunState::Done);
        assert!(report
            .transitions
            .iter()
            .any(|t| t.to == RunState::CoverageExtraction));
        assert_eq!(report.invocations.len(), 5);
    }

    #[test]
    fn test_coverage_error_aborts() {
        let launcher = FakeLauncher::new()
            .on("-showBuildSettings", Script::exits(0).read("nothing useful\n", ""))
            .on("-version", xcode("7.0"))
            .on("test", Script::exits(0));
        let toml = format!("{BASIC}\n[coverage]\nproduct = \"MyApp.app/MyApp\"\n");

        let err = BuildTestRunner::new(&launcher).run(&config(&toml)).unwrap_err();

        assert!(matches!(
            err,
            RunError::Coverage(CoverageError::MissingBuildSetting { .. })
        ));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_spawn_failure_is_error() {
        let launcher = FakeLauncher::new()
            .on("-version", xcode("7.0"))
            .on("test", Script::unlaunchable());

        let err = BuildTestRunner::new(&launcher).run(&config(BASIC)).unwrap_err();

        assert!(matches!(err, RunError::Launch { .. }));
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn test_report_serializes() {
        let launcher = FakeLauncher::new()
            .on("-version", xcode("7.0"))
            .on("test", Script::exits(3).read("", "crash\n"));

        let report = BuildTestRunner::new(&launcher).run(&config(BASIC)).unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["engine"], ENGINE_NAME);
        assert_eq!(json["state"], "BROKEN");
        assert_eq!(json["strategy"], "combined");
        assert_eq!(json["classification"]["kind"], "broken");
        assert_eq!(json["classification"]["stderr"], "crash\n");
        assert!(json.get("coverage").is_none());
    }
}
