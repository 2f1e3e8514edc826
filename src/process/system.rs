//! `std::process` backed launcher.
//!
//! Children run in their own process group so a forced termination also
//! reaches the helpers they spawn (simulator bridges, test runners). One
//! reader thread per pipe forwards chunks over a channel; waiting for
//! readiness is a `recv_timeout` on that channel.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{OutputChunk, ProcessHandle, ProcessLauncher, Stream};
use crate::command::CommandInvocation;

/// Pipe read buffer size.
const READ_BUFFER_SIZE: usize = 8192;

/// Poll step while waiting out the termination grace period.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Launches real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl SystemLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, invocation: &CommandInvocation) -> io::Result<Box<dyn ProcessHandle>> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(ref dir) = invocation.working_dir {
            command.current_dir(dir);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        debug!(command = %invocation, "spawning");
        let mut child = command.spawn()?;

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(Stream::Stdout, stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(Stream::Stderr, stderr, tx);
        }

        Ok(Box::new(SystemProcess {
            child,
            events: rx,
            pending: OutputChunk::default(),
            streams_open: true,
            status: None,
        }))
    }
}

/// Forward everything read from `reader` until EOF. Dropping the sender
/// on EOF is what tells the handle the stream is closed.
fn spawn_reader<R: Read + Send + 'static>(stream: Stream, mut reader: R, tx: Sender<(Stream, Vec<u8>)>) {
    thread::spawn(move || {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
}

struct SystemProcess {
    child: Child,
    events: Receiver<(Stream, Vec<u8>)>,
    /// Output received but not yet handed out
    pending: OutputChunk,
    /// False once both reader threads have hit EOF
    streams_open: bool,
    /// Set once the child has been reaped
    status: Option<ExitStatus>,
}

impl SystemProcess {
    fn drain_nonblocking(&mut self) {
        while self.streams_open {
            match self.events.try_recv() {
                Ok((stream, bytes)) => self.pending.push(stream, &bytes),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.streams_open = false,
            }
        }
    }

    fn signal_group(&mut self, hard: bool) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let signal = if hard { Signal::SIGKILL } else { Signal::SIGTERM };
            let pgid = Pid::from_raw(self.child.id() as i32);
            if let Err(e) = killpg(pgid, signal) {
                debug!(pid = self.child.id(), error = %e, "killpg failed");
            }
            if hard {
                let _ = self.child.kill();
            }
        }
        #[cfg(not(unix))]
        {
            let _ = hard;
            let _ = self.child.kill();
        }
    }
}

impl ProcessHandle for SystemProcess {
    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        if let Some(status) = self.status {
            return Ok(Some(exit_code(status)));
        }
        match self.child.try_wait()? {
            Some(status) => {
                self.status = Some(status);
                Ok(Some(exit_code(status)))
            }
            None => Ok(None),
        }
    }

    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool> {
        if !self.pending.is_empty() {
            return Ok(true);
        }

        if !self.streams_open {
            // Both pipes closed but the process may still be running;
            // nothing to wait on except time.
            thread::sleep(timeout);
            return Ok(false);
        }

        match self.events.recv_timeout(timeout) {
            Ok((stream, bytes)) => {
                self.pending.push(stream, &bytes);
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => {
                self.streams_open = false;
                Ok(false)
            }
        }
    }

    fn read_available(&mut self) -> io::Result<OutputChunk> {
        self.drain_nonblocking();
        Ok(std::mem::take(&mut self.pending))
    }

    fn terminate(&mut self, grace: Duration) -> io::Result<()> {
        debug!(pid = self.child.id(), "terminating process group");
        if self.status.is_none() {
            self.signal_group(false);
        }

        let start = Instant::now();
        while self.status.is_none() && start.elapsed() < grace {
            if let Some(status) = self.child.try_wait()? {
                self.status = Some(status);
                break;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }

        if self.status.is_none() {
            warn!(pid = self.child.id(), "process ignored SIGTERM, killing");
        }
        // Group members can outlive the child, so the group is always
        // killed, even after the child exited on SIGTERM.
        self.signal_group(true);
        if self.status.is_none() {
            self.status = Some(self.child.wait()?);
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> io::Result<(i32, OutputChunk)> {
        let status = match self.status {
            Some(s) => s,
            None => self.child.wait()?,
        };
        self.status = Some(status);

        // Grandchildren can keep the pipes open past our child's exit, so
        // stop collecting once the streams stay quiet for a while.
        let linger = Duration::from_secs(2);
        while self.streams_open {
            match self.events.recv_timeout(linger) {
                Ok((stream, bytes)) => self.pending.push(stream, &bytes),
                Err(RecvTimeoutError::Disconnected) => self.streams_open = false,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(pid = self.child.id(), "output pipes still open after exit");
                    break;
                }
            }
        }

        Ok((exit_code(status), std::mem::take(&mut self.pending)))
    }
}

impl Drop for SystemProcess {
    fn drop(&mut self) {
        if self.status.is_none() {
            self.signal_group(true);
            if let Ok(status) = self.child.wait() {
                self.status = Some(status);
            }
        }
    }
}

/// Exit code, or 128+N for a process killed by signal N.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
