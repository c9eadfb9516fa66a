// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolwerk Spool: the spooler engine.  Job queue, destination registry,
// media matching scheduler, helper process supervision, and the event loop
// tying the command FIFO, control socket and network listeners together.

pub mod alert;
pub mod changelog;
pub mod commands;
pub mod control;
pub mod ipp;
pub mod listener;
pub mod lockfile;
pub mod media;
pub mod nodeid;
pub mod question;
pub mod queue;
pub mod registry;
pub mod respond;
pub mod retry;
pub mod scheduler;
pub mod secondary;
pub mod server;
pub mod spooler;
pub mod state;
pub mod supervisor;

#[cfg(test)]
mod testutil;

pub use lockfile::{LockFile, stop_daemon};
pub use queue::{JobQueue, QueueEntry};
pub use registry::Registry;
pub use server::run;
pub use spooler::Spooler;
pub use supervisor::{Launcher, ProcessLauncher};
