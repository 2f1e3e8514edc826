//! Pre-build hook: an optional shell command run before xcodebuild.

use std::io;

use tracing::{info, warn};

use crate::command::CommandInvocation;
use crate::config::RunConfig;
use crate::process::{run_to_completion, ProcessLauncher};

/// Error types for the pre-build hook
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("pre-build command `{command}` exited with {exit_code}: {stderr}")]
    Failed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("failed to start pre-build command `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Shell invocation for a hook command string.
pub fn hook_invocation(command: &str, config: &RunConfig) -> CommandInvocation {
    CommandInvocation::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&config.project_root)
}

/// Run the configured pre-build command in the project root.
///
/// Returns the invocation that ran, or `None` when no hook is configured.
/// Any non-zero exit is fatal for the run.
pub fn run_pre_build(
    launcher: &dyn ProcessLauncher,
    config: &RunConfig,
) -> Result<Option<CommandInvocation>, HookError> {
    let Some(ref command) = config.pre_build else {
        return Ok(None);
    };

    let invocation = hook_invocation(command, config);
    info!(command = %command, "running pre-build command");

    let outcome = run_to_completion(launcher, &invocation, config.watch.timing()).map_err(|source| {
        HookError::Launch {
            command: command.clone(),
            source,
        }
    })?;

    if !outcome.success() {
        warn!(exit_code = outcome.exit_code, "pre-build command failed");
        return Err(HookError::Failed {
            command: command.clone(),
            exit_code: outcome.exit_code,
            stderr: outcome.stderr_text(),
        });
    }

    Ok(Some(invocation))
}
