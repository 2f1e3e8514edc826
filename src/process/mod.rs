//! External process execution and output watching.
//!
//! Every external call goes through a [`ProcessLauncher`], which hands back
//! a [`ProcessHandle`]: a running process whose stdout/stderr can be waited
//! on with a bounded timeout and read without blocking. The watcher
//! functions in [`watcher`] are explicit loops over that handle.

mod system;
mod watcher;

#[cfg(test)]
pub(crate) mod fake;

use std::io;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::command::CommandInvocation;

pub use system::SystemLauncher;
pub use watcher::{run_to_completion, run_until_sentinel};

/// Output stream of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Bytes read from a process since the previous read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputChunk {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl OutputChunk {
    pub fn new(stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }

    pub fn push(&mut self, stream: Stream, bytes: &[u8]) {
        match stream {
            Stream::Stdout => self.stdout.extend_from_slice(bytes),
            Stream::Stderr => self.stderr.extend_from_slice(bytes),
        }
    }

    pub fn append(&mut self, other: OutputChunk) {
        self.stdout.extend(other.stdout);
        self.stderr.extend(other.stderr);
    }
}

/// Final result of an external process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    /// Real exit code, 128+N when killed by signal N, or 0 when the
    /// watcher terminated the process after its completion sentinel
    pub exit_code: i32,

    #[serde(serialize_with = "serialize_lossy")]
    pub stdout: Vec<u8>,

    #[serde(serialize_with = "serialize_lossy")]
    pub stderr: Vec<u8>,

    /// Set when the watcher killed the process after a sentinel
    pub terminated: bool,
}

impl ExecutionOutcome {
    /// Outcome of a process that exited on its own.
    pub fn exited(exit_code: i32, output: OutputChunk) -> Self {
        Self {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            terminated: false,
        }
    }

    /// Outcome of a process reaped after its completion sentinel. The exit
    /// code is always 0; the kill-induced status is discarded.
    pub fn terminated(output: OutputChunk) -> Self {
        Self {
            exit_code: 0,
            stdout: output.stdout,
            stderr: output.stderr,
            terminated: true,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

fn serialize_lossy<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

/// Timing knobs for watching a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchTiming {
    /// Upper bound on each readiness wait
    pub poll_interval: Duration,

    /// How long a terminated process gets between SIGTERM and SIGKILL
    pub termination_grace: Duration,
}

impl Default for WatchTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            termination_grace: Duration::from_secs(5),
        }
    }
}

/// Completion lines that mark a test run as logically finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinels {
    pub success: String,
    pub failure: String,
}

impl Sentinels {
    pub fn new(success: impl Into<String>, failure: impl Into<String>) -> Self {
        Self {
            success: success.into(),
            failure: failure.into(),
        }
    }

    /// Check whether either sentinel occurs in `output`, looking only at
    /// bytes appended after `stdout_from` / `stderr_from` (plus enough
    /// earlier bytes to catch a sentinel split across reads).
    pub fn appear_in(&self, output: &OutputChunk, stdout_from: usize, stderr_from: usize) -> bool {
        [self.success.as_bytes(), self.failure.as_bytes()]
            .iter()
            .any(|needle| {
                contains_after(&output.stdout, needle, stdout_from)
                    || contains_after(&output.stderr, needle, stderr_from)
            })
    }
}

fn contains_after(haystack: &[u8], needle: &[u8], from: usize) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return false;
    }
    let start = from.saturating_sub(needle.len() - 1);
    haystack[start..].windows(needle.len()).any(|w| w == needle)
}

/// A running external process.
///
/// Implementations own the child and its pipes exclusively. A handle that
/// is dropped before being reaped must kill and reap its process.
pub trait ProcessHandle {
    /// Non-blocking exit check. Returns the exit code once the process has
    /// exited.
    fn try_wait(&mut self) -> io::Result<Option<i32>>;

    /// Block until output is available or `timeout` elapses. Returns
    /// whether output is ready.
    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Take whatever output arrived since the previous read, without
    /// blocking.
    fn read_available(&mut self) -> io::Result<OutputChunk>;

    /// Forcibly stop the process, escalating after `grace`, and reap it.
    fn terminate(&mut self, grace: Duration) -> io::Result<()>;

    /// Wait for exit and collect the remaining output.
    fn finish(self: Box<Self>) -> io::Result<(i32, OutputChunk)>;
}

/// Starts external processes.
pub trait ProcessLauncher {
    fn launch(&self, invocation: &CommandInvocation) -> io::Result<Box<dyn ProcessHandle>>;
}

impl<L: ProcessLauncher + ?Sized> ProcessLauncher for &L {
    fn launch(&self, invocation: &CommandInvocation) -> io::Result<Box<dyn ProcessHandle>> {
        (**self).launch(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinels() -> Sentinels {
        Sentinels::new("** TEST EXECUTE SUCCEEDED **", "** TEST EXECUTE FAILED **")
    }

    #[test]
    fn test_sentinel_in_stdout() {
        let output = OutputChunk::new(b"Testing...\n** TEST EXECUTE SUCCEEDED **\n".to_vec(), Vec::new());
        assert!(sentinels().appear_in(&output, 0, 0));
    }

    #[test]
    fn test_failure_sentinel_in_stderr() {
        let output = OutputChunk::new(Vec::new(), b"** TEST EXECUTE FAILED **".to_vec());
        assert!(sentinels().appear_in(&output, 0, 0));
    }

    #[test]
    fn test_sentinel_split_across_reads() {
        let mut output = OutputChunk::new(b"** TEST EXECUTE SUC".to_vec(), Vec::new());
        assert!(!sentinels().appear_in(&output, 0, 0));

        let from = output.stdout.len();
        output.append(OutputChunk::new(b"CEEDED **\n".to_vec(), Vec::new()));
        assert!(sentinels().appear_in(&output, from, 0));
    }

    #[test]
    fn test_no_sentinel() {
        let output = OutputChunk::new(b"** BUILD SUCCEEDED **".to_vec(), b"warning".to_vec());
        assert!(!sentinels().appear_in(&output, 0, 0));
    }

    #[test]
    fn test_terminated_outcome_reports_zero() {
        let outcome = ExecutionOutcome::terminated(OutputChunk::new(b"out".to_vec(), b"err".to_vec()));
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.terminated);
        assert_eq!(outcome.stdout_text(), "out");
        assert_eq!(outcome.stderr_text(), "err");
    }

    #[test]
    fn test_outcome_serializes_text() {
        let outcome = ExecutionOutcome::exited(65, OutputChunk::new(b"a".to_vec(), b"b".to_vec()));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["exit_code"], 65);
        assert_eq!(json["stdout"], "a");
        assert_eq!(json["terminated"], false);
    }
}
