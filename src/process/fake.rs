//! Scripted launcher for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use super::{OutputChunk, ProcessHandle, ProcessLauncher};
use crate::command::CommandInvocation;

/// Behaviour of one fake process.
#[derive(Debug, Clone)]
pub struct Script {
    reads: Vec<OutputChunk>,
    remainder: OutputChunk,
    /// None: never exits on its own
    exit: Option<i32>,
    killed_code: i32,
    launch_error: bool,
}

impl Script {
    /// Exits with `code` once all scripted reads have been consumed.
    pub fn exits(code: i32) -> Self {
        Self {
            reads: Vec::new(),
            remainder: OutputChunk::default(),
            exit: Some(code),
            killed_code: 137,
            launch_error: false,
        }
    }

    /// Keeps running until terminated.
    pub fn hangs() -> Self {
        Self {
            exit: None,
            ..Self::exits(0)
        }
    }

    /// Launching fails with `NotFound`.
    pub fn unlaunchable() -> Self {
        Self {
            launch_error: true,
            ..Self::exits(0)
        }
    }

    pub fn read(mut self, stdout: &str, stderr: &str) -> Self {
        self.reads.push(OutputChunk::new(stdout.as_bytes(), stderr.as_bytes()));
        self
    }

    /// Output only collected by `finish`.
    pub fn remainder(mut self, stdout: &str, stderr: &str) -> Self {
        self.remainder = OutputChunk::new(stdout.as_bytes(), stderr.as_bytes());
        self
    }

    pub fn killed_with(mut self, code: i32) -> Self {
        self.killed_code = code;
        self
    }
}

/// What happened to one fake process.
#[derive(Debug, Default)]
pub struct Probe {
    reads: Cell<usize>,
    terminated: Cell<bool>,
}

impl Probe {
    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    pub fn terminated(&self) -> bool {
        self.terminated.get()
    }
}

struct ScriptedProcess {
    reads: VecDeque<OutputChunk>,
    remainder: OutputChunk,
    exit: Option<i32>,
    killed_code: i32,
    killed: bool,
    probe: Rc<Probe>,
}

impl ProcessHandle for ScriptedProcess {
    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        if self.killed {
            return Ok(Some(self.killed_code));
        }
        if self.reads.is_empty() {
            return Ok(self.exit);
        }
        Ok(None)
    }

    fn wait_ready(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(self.reads.front().is_some_and(|c| !c.is_empty()))
    }

    fn read_available(&mut self) -> io::Result<OutputChunk> {
        self.probe.reads.set(self.probe.reads.get() + 1);
        Ok(self.reads.pop_front().unwrap_or_default())
    }

    fn terminate(&mut self, _grace: Duration) -> io::Result<()> {
        self.killed = true;
        self.probe.terminated.set(true);
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> io::Result<(i32, OutputChunk)> {
        let mut rest = OutputChunk::default();
        for chunk in self.reads.drain(..) {
            rest.append(chunk);
        }
        rest.append(std::mem::take(&mut self.remainder));
        let code = if self.killed {
            self.killed_code
        } else {
            self.exit.unwrap_or(self.killed_code)
        };
        Ok((code, rest))
    }
}

/// Launcher answering invocations from scripted rules.
///
/// A rule matches when any argument equals its key; the first matching
/// rule wins, so more specific keys go first.
#[derive(Default)]
pub struct FakeLauncher {
    rules: Vec<(String, Script)>,
    launches: RefCell<Vec<(String, CommandInvocation, Rc<Probe>)>>,
    calls: RefCell<Vec<CommandInvocation>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, arg: &str, script: Script) -> Self {
        self.rules.push((arg.to_string(), script));
        self
    }

    /// Every invocation seen, in order, including failed launches.
    pub fn calls(&self) -> Vec<CommandInvocation> {
        self.calls.borrow().clone()
    }

    /// Probe of the latest process launched through the rule for `arg`.
    pub fn probe(&self, arg: &str) -> Rc<Probe> {
        self.launches
            .borrow()
            .iter()
            .rev()
            .find(|(key, _, _)| key == arg)
            .map(|(_, _, probe)| Rc::clone(probe))
            .unwrap_or_else(|| panic!("no process launched for rule {arg:?}"))
    }

    /// Whether any launched invocation carried `arg`.
    pub fn launched(&self, arg: &str) -> bool {
        self.launches.borrow().iter().any(|(key, _, _)| key == arg)
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, invocation: &CommandInvocation) -> io::Result<Box<dyn ProcessHandle>> {
        self.calls.borrow_mut().push(invocation.clone());

        let (key, script) = self
            .rules
            .iter()
            .find(|(key, _)| invocation.args.iter().any(|a| a == key))
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no fake for {invocation}"))
            })?;

        if script.launch_error {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: not found", invocation.program),
            ));
        }

        let probe = Rc::new(Probe::default());
        self.launches
            .borrow_mut()
            .push((key.clone(), invocation.clone(), Rc::clone(&probe)));

        Ok(Box::new(ScriptedProcess {
            reads: script.reads.iter().cloned().collect(),
            remainder: script.remainder.clone(),
            exit: script.exit,
            killed_code: script.killed_code,
            killed: false,
            probe,
        }))
    }
}
