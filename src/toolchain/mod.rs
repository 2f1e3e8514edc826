//! xcodebuild version probe
//!
//! The major Xcode version decides whether build and test can run as
//! separate invocations. Anything that prevents reading it (missing tool,
//! non-zero exit, unexpected output) yields an unknown version, which
//! callers treat as a legacy toolchain.

use std::sync::OnceLock;

use regex_lite::Regex;
use tracing::{debug, warn};

use crate::command::CommandInvocation;
use crate::config::RunConfig;
use crate::process::{run_to_completion, ProcessLauncher};

/// Major version of the build tool; `None` when it could not be determined.
pub type ToolVersion = Option<u32>;

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // First line: "Xcode 16.2"
    RE.get_or_init(|| Regex::new(r"(?m)^\S+ (\d+)\.(\d+)").expect("version pattern is valid"))
}

/// Extract the major version from `xcodebuild -version` output.
pub fn parse_major_version(stdout: &str) -> ToolVersion {
    let caps = version_re().captures(stdout)?;
    caps[1].parse().ok()
}

/// The `-version` query for the configured xcodebuild.
pub fn version_invocation(config: &RunConfig) -> Option<CommandInvocation> {
    CommandInvocation::from_prefix(&config.tools.xcodebuild)
        .map(|inv| inv.arg("-version").current_dir(&config.project_root))
}

/// Query the build tool for its major version. Never fails.
pub fn probe_version(launcher: &dyn ProcessLauncher, config: &RunConfig) -> ToolVersion {
    let invocation = version_invocation(config)?;

    let outcome = match run_to_completion(launcher, &invocation, config.watch.timing()) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(command = %invocation, error = %e, "version probe failed to start");
            return None;
        }
    };

    if !outcome.success() {
        warn!(exit_code = outcome.exit_code, "version probe exited non-zero");
        return None;
    }

    let version = parse_major_version(&outcome.stdout_text());
    match version {
        Some(major) => debug!(major, "probed xcodebuild version"),
        None => warn!("could not parse xcodebuild version output"),
    }
    version
}
