//! xcodebuild argument construction.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{BuildSettings, RunConfig, COVERAGE_SETTING};

/// A single external command: program, ordered arguments, working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandInvocation {
    pub program: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl CommandInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Build from a configured command prefix such as `["xcrun", "llvm-cov"]`.
    ///
    /// Returns `None` for an empty prefix.
    pub fn from_prefix(prefix: &[String]) -> Option<Self> {
        let (program, rest) = prefix.split_first()?;
        Some(Self {
            program: program.clone(),
            args: rest.to_vec(),
            working_dir: None,
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

impl fmt::Display for CommandInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            f.write_str(" ")?;
            if is_flag(arg) || is_plain(arg) {
                f.write_str(arg)?;
            } else {
                write!(f, "\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))?;
            }
        }
        Ok(())
    }
}

fn is_flag(arg: &str) -> bool {
    match arg.strip_prefix('-') {
        Some(rest) if !rest.is_empty() => rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '='),
        _ => false,
    }
}

/// Bare action words such as `test` or `build-for-testing`.
fn is_plain(arg: &str) -> bool {
    !arg.is_empty() && arg.chars().all(|c| c.is_ascii_lowercase() || c == '-')
}

/// Turn build settings into xcodebuild arguments.
///
/// Each setting becomes `-key value`, in configuration order, followed by
/// `-enableCodeCoverage YES|NO`. A configured `enableCodeCoverage` is
/// ignored in favour of `coverage`. Values are passed through unchecked.
pub fn build_arguments(settings: &BuildSettings, coverage: bool) -> Vec<String> {
    let mut args = Vec::with_capacity(settings.len() * 2 + 2);

    for (key, value) in settings.iter() {
        if key == COVERAGE_SETTING {
            continue;
        }
        args.push(format!("-{key}"));
        args.push(value.to_string());
    }

    args.push(format!("-{COVERAGE_SETTING}"));
    args.push(if coverage { "YES" } else { "NO" }.to_string());
    args
}

/// Trailing xcodebuild action for an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XcodebuildAction {
    BuildForTesting,
    TestWithoutBuilding,
    /// Combined build and test
    Test,
    /// Print resolved build settings for the test action
    ShowBuildSettings,
}

impl XcodebuildAction {
    fn trailing_args(self) -> &'static [&'static str] {
        match self {
            XcodebuildAction::BuildForTesting => &["build-for-testing"],
            XcodebuildAction::TestWithoutBuilding => &["test-without-building"],
            XcodebuildAction::Test => &["test"],
            XcodebuildAction::ShowBuildSettings => &["-showBuildSettings", "test"],
        }
    }
}

/// Full xcodebuild invocation for `action`, run from the project root.
///
/// Returns `None` when no xcodebuild command is configured.
pub fn xcodebuild(config: &RunConfig, action: XcodebuildAction) -> Option<CommandInvocation> {
    let invocation = CommandInvocation::from_prefix(&config.tools.xcodebuild)?
        .args(build_arguments(&config.build, config.coverage_enabled))
        .args(action.trailing_args().iter().copied())
        .current_dir(&config.project_root);
    Some(invocation)
}
