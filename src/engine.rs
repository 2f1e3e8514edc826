//! Host-facing engine contract
//!
//! A host (a CLI, a lint/test runner) only talks to an engine through
//! [`TestEngine`]: configure once, run, then hand the report to a
//! [`ResultInterpreter`]. The engine never prints results itself.

use std::fs;
use std::path::Path;

use xctest_report::{ParseInput, TestResult, XcodeResultParser};

use crate::config::{ConfigError, CoverageMode, RunConfig};
use crate::process::{ProcessLauncher, SystemLauncher};
use crate::runner::{BuildTestRunner, RunReport, RunResult};

/// Name the engine reports to hosts.
pub const ENGINE_NAME: &str = "xcode-test-engine";

/// A unit test engine as seen by its host.
pub trait TestEngine {
    fn name(&self) -> &str;

    /// Resolve the immutable configuration for one run.
    fn configure(
        &self,
        project_root: &Path,
        config_path: Option<&Path>,
        coverage: CoverageMode,
    ) -> Result<RunConfig, ConfigError>;

    fn run(&self, config: &RunConfig) -> RunResult<RunReport>;

    /// Whether the engine prints its own results; when false the host
    /// formats the interpreted results.
    fn reports_own_output(&self) -> bool {
        false
    }
}

/// Turns a run report into per-test results.
pub trait ResultInterpreter {
    fn interpret(&self, report: &RunReport, project_root: &Path) -> Vec<TestResult>;
}

impl ResultInterpreter for XcodeResultParser {
    fn interpret(&self, report: &RunReport, project_root: &Path) -> Vec<TestResult> {
        let stdout = report.stdout();
        let stderr = report.stderr();
        self.parse(&ParseInput {
            stdout: &stdout,
            stderr: &stderr,
            coverage: report.coverage.as_deref(),
            broken: report.classification.is_broken(),
            project_root,
        })
    }
}

/// xcodebuild-backed engine.
#[derive(Debug, Clone, Default)]
pub struct XcodeTestEngine<L = SystemLauncher> {
    launcher: L,
}

impl XcodeTestEngine<SystemLauncher> {
    pub fn new() -> Self {
        Self::with_launcher(SystemLauncher::new())
    }
}

impl<L: ProcessLauncher> XcodeTestEngine<L> {
    pub fn with_launcher(launcher: L) -> Self {
        Self { launcher }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }
}

impl<L: ProcessLauncher> TestEngine for XcodeTestEngine<L> {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn configure(
        &self,
        project_root: &Path,
        config_path: Option<&Path>,
        coverage: CoverageMode,
    ) -> Result<RunConfig, ConfigError> {
        let root = fs::canonicalize(project_root)
            .map_err(|_| ConfigError::NotFound(project_root.to_path_buf()))?;
        RunConfig::load(&root, config_path, coverage)
    }

    fn run(&self, config: &RunConfig) -> RunResult<RunReport> {
        BuildTestRunner::new(&self.launcher).run(config)
    }
}
