//! xctest-engine - xcodebuild unit test engine
//!
//! Drives `xcodebuild` to build and run unit tests, watches its streaming
//! output for the tool's own completion line (xcodebuild can keep running
//! after tests finish while a simulator session stays attached), optionally
//! extracts `llvm-cov` coverage, and hands the raw output to a result
//! interpreter.

pub mod command;
pub mod config;
pub mod coverage;
pub mod engine;
pub mod hook;
pub mod logging;
pub mod process;
pub mod runner;
pub mod toolchain;

pub use command::{build_arguments, CommandInvocation, XcodebuildAction};
pub use config::{BuildSettings, ConfigError, CoverageMode, CoverageSettings, RunConfig};
pub use coverage::{CoverageArtifacts, CoverageError, CoverageExtraction, CoverageExtractor};
pub use engine::{ResultInterpreter, TestEngine, XcodeTestEngine, ENGINE_NAME};
pub use hook::HookError;
pub use process::{
    run_to_completion, run_until_sentinel, ExecutionOutcome, ProcessHandle, ProcessLauncher,
    Sentinels, SystemLauncher, WatchTiming,
};
pub use runner::{
    BuildTestRunner, Classification, RunError, RunReport, RunResult, RunState, StateTransition,
    Strategy,
};
pub use toolchain::{parse_major_version, probe_version, ToolVersion};
