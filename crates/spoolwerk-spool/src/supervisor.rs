// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Helper process supervision.
//
// Drivers, questioners, responders and mailers are spawned through the
// `Launcher` trait.  The real launcher hands each child to a Tokio task that
// waits for it and posts a `ChildExit` on a channel; the event loop drains
// that channel and is the only place the exit is acted on.  Exits are routed
// through `ChildTables`, which asks the driver table first, then the
// question table, then the helper table.

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::{JobKey, PrinterId};

// ---------------------------------------------------------------------------
// Spawn requests and exits
// ---------------------------------------------------------------------------

/// What a child reads on its standard input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildInput {
    Null,
    /// Opened before `spawn` returns, so the file may be unlinked afterwards.
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// A program to run with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub stdin: ChildInput,
}

impl SpawnRequest {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: ChildInput::Null,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn stdin(mut self, input: ChildInput) -> Self {
        self.stdin = input;
        self
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Code(i32),
    Signaled { signal: i32, core_dumped: bool },
}

impl ExitOutcome {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Code(code),
            (None, Some(signal)) => Self::Signaled {
                signal,
                core_dumped: status.core_dumped(),
            },
            (None, None) => Self::Code(-1),
        }
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signaled {
                signal,
                core_dumped,
            } => write!(
                f,
                "signal {signal}{}",
                if *core_dumped { " (core dumped)" } else { "" }
            ),
        }
    }
}

/// Notification that a child has terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub pid: u32,
    pub outcome: ExitOutcome,
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

/// Starts helper processes and signals processes.
pub trait Launcher {
    /// Start a child and return its process id.
    fn spawn(&mut self, request: SpawnRequest) -> Result<u32>;

    /// Send a signal to a process.
    fn signal(&mut self, pid: i32, signal: Signal) -> Result<()>;
}

/// Launcher backed by `tokio::process`.  Must be used inside a runtime.
pub struct ProcessLauncher {
    exits: mpsc::UnboundedSender<ChildExit>,
}

impl ProcessLauncher {
    /// Create the launcher and the receiver its exit notifications go to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChildExit>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { exits: tx }, rx)
    }

    /// A sender other subsystems can use to report exits of children they
    /// spawn themselves.
    pub fn exit_sender(&self) -> mpsc::UnboundedSender<ChildExit> {
        self.exits.clone()
    }
}

impl Launcher for ProcessLauncher {
    fn spawn(&mut self, request: SpawnRequest) -> Result<u32> {
        let program = request.program.display().to_string();
        let spawn_err = |reason: String| SpoolError::Spawn {
            program: program.clone(),
            reason,
        };

        let mut command = tokio::process::Command::new(&request.program);
        command
            .args(&request.args)
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        let mut feed = None;
        match request.stdin {
            ChildInput::Null => {
                command.stdin(Stdio::null());
            }
            ChildInput::File(path) => {
                let file = std::fs::File::open(&path)
                    .map_err(|e| spawn_err(format!("{}: {e}", path.display())))?;
                command.stdin(Stdio::from(file));
            }
            ChildInput::Bytes(bytes) => {
                command.stdin(Stdio::piped());
                feed = Some(bytes);
            }
        }

        let mut child = command.spawn().map_err(|e| spawn_err(e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| spawn_err("child exited before its pid was read".into()))?;
        let stdin = child.stdin.take();
        let exits = self.exits.clone();

        tokio::spawn(async move {
            if let (Some(mut pipe), Some(bytes)) = (stdin, feed) {
                if let Err(e) = pipe.write_all(&bytes).await {
                    debug!(pid, error = %e, "child closed its input early");
                }
                drop(pipe);
            }
            let outcome = match child.wait().await {
                Ok(status) => ExitOutcome::from_status(status),
                Err(e) => {
                    warn!(pid, error = %e, "wait for child failed");
                    ExitOutcome::Code(-1)
                }
            };
            if exits.send(ChildExit { pid, outcome }).is_err() {
                debug!(pid, "exit reported after event loop closed");
            }
        });

        debug!(pid, program = %program, "child started");
        Ok(pid)
    }

    fn signal(&mut self, pid: i32, signal: Signal) -> Result<()> {
        kill(Pid::from_raw(pid), signal).map_err(|e| SpoolError::Signal {
            pid,
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Claimant tables
// ---------------------------------------------------------------------------

/// Kind of helper that is neither a driver nor a questioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperKind {
    Responder,
    Mailer,
    /// Protocol handler started for an accepted network connection.
    Listener,
}

/// Who an exited child belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claimant {
    Driver(PrinterId),
    Question(JobKey),
    Helper(HelperKind),
}

/// Side tables mapping live child pids to their context.
#[derive(Debug, Default)]
pub struct ChildTables {
    drivers: HashMap<u32, PrinterId>,
    questions: HashMap<u32, JobKey>,
    helpers: HashMap<u32, HelperKind>,
}

impl ChildTables {
    pub fn add_driver(&mut self, pid: u32, printer: PrinterId) {
        self.drivers.insert(pid, printer);
    }

    pub fn add_question(&mut self, pid: u32, job: JobKey) {
        self.questions.insert(pid, job);
    }

    /// Point a running questioner at a job's new key after a move.
    pub fn rekey_question(&mut self, from: &JobKey, to: JobKey) {
        for job in self.questions.values_mut() {
            if job == from {
                *job = to;
            }
        }
    }

    pub fn add_helper(&mut self, pid: u32, kind: HelperKind) {
        self.helpers.insert(pid, kind);
    }

    /// Remove `pid` from the first table that knows it.
    pub fn claim(&mut self, pid: u32) -> Option<Claimant> {
        if let Some(printer) = self.drivers.remove(&pid) {
            return Some(Claimant::Driver(printer));
        }
        if let Some(job) = self.questions.remove(&pid) {
            return Some(Claimant::Question(job));
        }
        self.helpers.remove(&pid).map(Claimant::Helper)
    }

    pub fn active_questions(&self) -> usize {
        self.questions.len()
    }

    pub fn active_drivers(&self) -> usize {
        self.drivers.len()
    }
}

// ---------------------------------------------------------------------------
// Test launcher
// ---------------------------------------------------------------------------

/// What a [`RecordingLauncher`] has seen.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct LaunchLog {
    pub spawned: Vec<(u32, SpawnRequest)>,
    pub signals: Vec<(i32, Signal)>,
    pub fail_spawns: bool,
    pub fail_signals: bool,
    next_pid: u32,
}

/// Launcher that records requests instead of running anything.  Clones
/// share one log, so a test can keep a handle after boxing the launcher.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingLauncher {
    log: std::rc::Rc<std::cell::RefCell<LaunchLog>>,
}

#[cfg(test)]
impl RecordingLauncher {
    pub fn spawned(&self) -> Vec<(u32, SpawnRequest)> {
        self.log.borrow().spawned.clone()
    }

    pub fn signals(&self) -> Vec<(i32, Signal)> {
        self.log.borrow().signals.clone()
    }

    pub fn set_fail_spawns(&self, fail: bool) {
        self.log.borrow_mut().fail_spawns = fail;
    }

    pub fn set_fail_signals(&self, fail: bool) {
        self.log.borrow_mut().fail_signals = fail;
    }

    pub fn spawned_programs(&self) -> Vec<String> {
        self.log
            .borrow()
            .spawned
            .iter()
            .map(|(_, r)| {
                r.program
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Pid of the most recent spawn of `program`.
    pub fn last_pid_of(&self, program: &str) -> Option<u32> {
        self.log
            .borrow()
            .spawned
            .iter()
            .rev()
            .find(|(_, r)| r.program.file_name().is_some_and(|n| n == program))
            .map(|(pid, _)| *pid)
    }
}

#[cfg(test)]
impl Launcher for RecordingLauncher {
    fn spawn(&mut self, request: SpawnRequest) -> Result<u32> {
        let mut log = self.log.borrow_mut();
        if log.fail_spawns {
            return Err(SpoolError::Spawn {
                program: request.program.display().to_string(),
                reason: "spawning disabled".into(),
            });
        }
        log.next_pid += 1;
        let pid = 1000 + log.next_pid;
        log.spawned.push((pid, request));
        Ok(pid)
    }

    fn signal(&mut self, pid: i32, signal: Signal) -> Result<()> {
        let mut log = self.log.borrow_mut();
        if log.fail_signals {
            return Err(SpoolError::Signal {
                pid,
                reason: "no such process".into(),
            });
        }
        log.signals.push((pid, signal));
        Ok(())
    }
}
