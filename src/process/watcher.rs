//! Completion modes for a launched process.
//!
//! `run_to_completion` waits for natural exit. `run_until_sentinel` also
//! watches the output for the tool's completion line: xcodebuild prints
//! its test report and can then sit idle forever with a simulator session
//! attached, so once a sentinel has been seen, the first read that brings
//! no new stdout ends the process.

use std::io;

use tracing::{debug, info};

use super::{ExecutionOutcome, OutputChunk, ProcessLauncher, Sentinels, WatchTiming};
use crate::command::CommandInvocation;

/// Run a process until it exits on its own.
pub fn run_to_completion(
    launcher: &dyn ProcessLauncher,
    invocation: &CommandInvocation,
    timing: WatchTiming,
) -> io::Result<ExecutionOutcome> {
    let mut process = launcher.launch(invocation)?;
    let mut output = OutputChunk::default();

    while process.try_wait()?.is_none() {
        process.wait_ready(timing.poll_interval)?;
        output.append(process.read_available()?);
    }

    let (exit_code, rest) = process.finish()?;
    output.append(rest);

    debug!(command = %invocation, exit_code, "process exited");
    Ok(ExecutionOutcome::exited(exit_code, output))
}

/// Run a process until it exits, or until it goes quiet after printing
/// one of `sentinels`.
///
/// A natural exit always reports the real exit code, sentinel or not. A
/// forced termination always reports exit code 0 with the output read so
/// far.
pub fn run_until_sentinel(
    launcher: &dyn ProcessLauncher,
    invocation: &CommandInvocation,
    sentinels: &Sentinels,
    timing: WatchTiming,
) -> io::Result<ExecutionOutcome> {
    let mut process = launcher.launch(invocation)?;
    let mut output = OutputChunk::default();
    let mut sentinel_seen = false;

    loop {
        if process.try_wait()?.is_some() {
            let (exit_code, rest) = process.finish()?;
            output.append(rest);
            debug!(command = %invocation, exit_code, sentinel_seen, "process exited");
            return Ok(ExecutionOutcome::exited(exit_code, output));
        }

        process.wait_ready(timing.poll_interval)?;
        let chunk = process.read_available()?;

        if sentinel_seen && chunk.stdout.is_empty() {
            output.append(chunk);
            info!(command = %invocation, "idle after completion line, terminating");
            process.terminate(timing.termination_grace)?;
            return Ok(ExecutionOutcome::terminated(output));
        }

        let stdout_from = output.stdout.len();
        let stderr_from = output.stderr.len();
        output.append(chunk);

        if !sentinel_seen && sentinels.appear_in(&output, stdout_from, stderr_from) {
            debug!(command = %invocation, "completion line observed");
            sentinel_seen = true;
        }
    }
}
