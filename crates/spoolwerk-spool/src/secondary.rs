// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operator requests relayed through the FIFO.
//
// A request line is `<pid> <command> <args...>`.  The answer is written to
// a reply file named after the requester's pid.  Its first line is a reply
// code and the rest is data or a message for the operator.  The requester
// is then woken with SIGUSR1; if it has gone away the reply file is removed.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::str::{FromStr, SplitWhitespace};

use nix::sys::signal::Signal;
use tracing::{debug, info, instrument, warn};

use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::{
    DestId, GroupId, JobKey, JobStatus, PrinterId, PrinterStatus, ReplyCode, ResponseCode,
};

use crate::media;
use crate::nodeid::NodeMatch;
use crate::queue::rename_job_files;
use crate::spooler::Spooler;

/// Closes the queue file text of one job in a listing.
const END_OF_QUEUE_FILE: &str = "..\n";
/// Closes one job in a listing.
const END_OF_JOB: &str = ".\n";

/// The answer to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: ReplyCode,
    pub body: String,
    /// Wake the requester as soon as the reply is written.  Cleared for
    /// a stop-and-wait, which is woken when the printer reaches STOPT.
    pub wake: bool,
}

impl Reply {
    fn new(code: ReplyCode) -> Self {
        Self {
            code,
            body: String::new(),
            wake: true,
        }
    }

    fn data() -> Self {
        Self::new(ReplyCode::OkData)
    }

    fn with(code: ReplyCode, message: impl AsRef<str>) -> Self {
        let mut reply = Self::new(code);
        reply.line(message);
        reply
    }

    fn line(&mut self, text: impl AsRef<str>) {
        self.body.push_str(text.as_ref());
        self.body.push('\n');
    }

    /// Reply file contents.
    pub fn render(&self) -> String {
        format!("{}\n{}", self.code, self.body)
    }
}

/// A resolved argument, or the reply that explains why it could not be.
type Resolved<T> = std::result::Result<T, Reply>;

/// Arguments of one request.
struct Args<'a> {
    words: SplitWhitespace<'a>,
    line: &'a str,
}

impl<'a> Args<'a> {
    fn word(&mut self) -> Result<&'a str> {
        self.words
            .next()
            .ok_or_else(|| SpoolError::MalformedCommand(self.line.to_string()))
    }

    fn number<T: FromStr>(&mut self) -> Result<T> {
        let word = self.word()?;
        word.parse()
            .map_err(|_| SpoolError::MalformedCommand(self.line.to_string()))
    }

    fn optional(&mut self) -> Option<&'a str> {
        self.words.next()
    }
}

/// Which jobs a request is about.  An id or subid of -1 matches any.
#[derive(Debug, Clone, Copy)]
struct JobSelector {
    destnode: NodeMatch,
    /// `None` for `all` or `any`.
    dest: Option<DestId>,
    id: i32,
    subid: i32,
    homenode: NodeMatch,
}

impl JobSelector {
    fn matches(&self, key: &JobKey) -> bool {
        self.destnode.matches(key.destnode)
            && self.dest.is_none_or(|dest| dest == key.dest)
            && (self.id == -1 || self.id == key.id)
            && (self.subid == -1 || self.subid == key.subid)
            && self.homenode.matches(key.homenode)
    }

    fn is_wildcard(&self) -> bool {
        self.id == -1 || self.subid == -1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopMode {
    Stop,
    StopAndWait,
    Halt,
}

fn no_such_dest(name: &str) -> Reply {
    Reply::with(
        ReplyCode::BadDest,
        format!("The destination \"{name}\" does not exist."),
    )
}

fn foreign_node(name: &str) -> Reply {
    Reply::with(
        ReplyCode::BadDest,
        format!("The node \"{name}\" is not served by this spooler."),
    )
}

fn no_such_job() -> Reply {
    Reply::with(ReplyCode::BadJob, "No such job.")
}

fn remove_reply(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        debug!(path = %path.display(), error = %e, "reply file not removed");
    }
}

impl Spooler {
    /// Where the reply to `pid` is written.
    pub fn reply_path(&self, pid: i32) -> PathBuf {
        self.config
            .paths
            .temp_dir
            .join(format!("spoolwerk-reply-{pid}"))
    }

    /// Handle one `<pid> <command>` line.
    #[instrument(skip_all)]
    pub(crate) fn secondary(&mut self, line: &str) -> Result<()> {
        let mut words = line.split_whitespace();
        let pid: i32 = words
            .next()
            .and_then(|w| w.parse().ok())
            .filter(|pid| *pid > 0)
            .ok_or_else(|| SpoolError::MalformedCommand(line.to_string()))?;

        let path = self.reply_path(pid);
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) => {
                warn!(pid, path = %path.display(), error = %e, "cannot create reply file");
                return Ok(());
            }
        };

        let mut args = Args { words, line };
        let reply = match self.request(pid, &mut args) {
            Ok(reply) => reply,
            Err(e) if e.is_fatal() => {
                remove_reply(&path);
                return Err(e);
            }
            Err(e) => {
                warn!(pid, command = line, error = %e, "request failed");
                Reply::with(ReplyCode::Internal, e.to_string())
            }
        };
        debug!(pid, code = %reply.code, "reply");

        if let Err(e) = file.write_all(reply.render().as_bytes()) {
            warn!(pid, error = %e, "cannot write reply file");
            remove_reply(&path);
            return Ok(());
        }
        drop(file);

        if reply.wake {
            if let Err(e) = self.launcher.signal(pid, Signal::SIGUSR1) {
                debug!(pid, error = %e, "requester has gone away");
                remove_reply(&path);
            }
        }
        Ok(())
    }

    fn request(&mut self, pid: i32, args: &mut Args<'_>) -> Result<Reply> {
        let command = args.word()?;
        match command {
            "l" => self.list_jobs(args),
            "s" => self.printer_status(args),
            "t" => self.start_printer(args),
            "p" => self.stop_printer(args, StopMode::Stop, pid),
            "P" => self.stop_printer(args, StopMode::StopAndWait, pid),
            "b" => self.stop_printer(args, StopMode::Halt, pid),
            "h" => self.hold_job(args),
            "r" => self.release_job(args),
            "c" => self.cancel_jobs(args),
            "f" => self.list_media(args),
            "M" => self.mount(args),
            "A" => self.set_accepting(args, true),
            "R" => self.set_accepting(args, false),
            "D" => self.list_destinations(args),
            "m" => self.move_jobs(args),
            "U" => self.rush_job(args),
            "G" => self.hold_group(args),
            _ => Err(SpoolError::MalformedCommand(args.line.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Argument resolution
    // -----------------------------------------------------------------------

    fn is_local_node(&self, name: &str) -> bool {
        name == "*" || name == self.config.node_name
    }

    /// `node dest id subid homenode`, with `all` or `any` for every
    /// destination.
    fn job_selector(&self, args: &mut Args<'_>) -> Result<Resolved<JobSelector>> {
        let destnode = args.word()?;
        let dest = args.word()?;
        let id = args.number()?;
        let subid = args.number()?;
        let homenode = args.word()?;
        if !self.is_local_node(destnode) {
            return Ok(Err(foreign_node(destnode)));
        }
        let dest = match dest {
            "all" | "any" => None,
            name => match self.registry.dest_by_name(name) {
                Some(dest) => Some(dest),
                None => return Ok(Err(no_such_dest(name))),
            },
        };
        Ok(Ok(JobSelector {
            destnode: self.nodes.matcher(destnode),
            dest,
            id,
            subid,
            homenode: self.nodes.matcher(homenode),
        }))
    }

    /// `node dest`, where `all` yields `None` if allowed.
    fn dest_arg(&self, args: &mut Args<'_>, allow_all: bool) -> Result<Resolved<Option<DestId>>> {
        let node = args.word()?;
        let name = args.word()?;
        if !self.is_local_node(node) {
            return Ok(Err(foreign_node(node)));
        }
        if allow_all && name == "all" {
            return Ok(Ok(None));
        }
        Ok(self.registry.dest_by_name(name).map(Some).ok_or_else(|| no_such_dest(name)))
    }

    /// `node printer`.  A printer wins a clash with a group name here.
    fn printer_arg(&self, args: &mut Args<'_>) -> Result<Resolved<PrinterId>> {
        let node = args.word()?;
        let name = args.word()?;
        if !self.is_local_node(node) {
            return Ok(Err(foreign_node(node)));
        }
        Ok(match self.registry.dest_by_name_reversed(name) {
            Some(DestId::Printer(prn)) => Ok(prn),
            Some(DestId::Group(_)) => Err(Reply::with(
                ReplyCode::PrinterOnly,
                format!("\"{name}\" is a group, not a printer."),
            )),
            None => Err(no_such_dest(name)),
        })
    }

    /// Printers covered by a destination argument: every live printer,
    /// one printer, or a group's members.
    fn printers_of(&self, dest: Option<DestId>) -> Vec<PrinterId> {
        match dest {
            None => self
                .registry
                .printer_ids()
                .filter(|prn| !self.registry.printer(*prn).deleted)
                .collect(),
            Some(dest) => self.registry.candidates(dest),
        }
    }

    fn matching_keys(&self, selector: &JobSelector) -> Vec<JobKey> {
        self.queue
            .entries()
            .iter()
            .filter(|e| selector.matches(&e.key))
            .map(|e| e.key)
            .collect()
    }

    fn printer_with_job(&self, key: &JobKey) -> Option<PrinterId> {
        self.registry
            .printer_ids()
            .find(|prn| self.registry.printer(*prn).job == Some(*key))
    }

    // -----------------------------------------------------------------------
    // Listings
    // -----------------------------------------------------------------------

    /// `l node dest id subid homenode`
    fn list_jobs(&self, args: &mut Args<'_>) -> Result<Reply> {
        let selector = match self.job_selector(args)? {
            Ok(selector) => selector,
            Err(reply) => return Ok(reply),
        };
        let mut reply = Reply::data();
        for entry in self.queue.entries().iter().filter(|e| selector.matches(&e.key)) {
            let name = self.job_name(&entry.key);
            let text = match std::fs::read_to_string(name.queue_file(&self.config.paths.queue_dir)) {
                Ok(text) => text,
                Err(e) => {
                    debug!(job = %name, error = %e, "queue file gone, job not listed");
                    continue;
                }
            };
            let printer = match entry.status {
                JobStatus::Printing(prn) => self.registry.printer(prn).name.as_str(),
                _ => "?",
            };
            let arrested = entry.arrested_at.map_or(0, |at| at.timestamp());
            reply.line(format!(
                "{} {} {} {} {} {} {} {} {} {} {} {}",
                name.destnode,
                name.dest,
                name.id,
                name.subid,
                name.homenode,
                entry.priority,
                entry.status.code(),
                printer,
                entry.never,
                entry.notnow,
                entry.pass,
                arrested
            ));
            reply.body.push_str(&text);
            if !text.is_empty() && !text.ends_with('\n') {
                reply.body.push('\n');
            }
            reply.body.push_str(END_OF_QUEUE_FILE);
            reply.body.push_str(END_OF_JOB);
        }
        Ok(reply)
    }

    /// `s node dest|all`
    fn printer_status(&self, args: &mut Args<'_>) -> Result<Reply> {
        let dest = match self.dest_arg(args, true)? {
            Ok(dest) => dest,
            Err(reply) => return Ok(reply),
        };
        let node = &self.config.node_name;
        let mut reply = Reply::data();
        for prn in self.printers_of(dest) {
            let p = self.registry.printer(prn);
            let job = match p.status {
                PrinterStatus::Printing
                | PrinterStatus::Canceling
                | PrinterStatus::Stopping
                | PrinterStatus::Halting
                | PrinterStatus::Seizing => p.job,
                _ => None,
            };
            match job {
                Some(key) => {
                    let job = self.job_name(&key);
                    reply.line(format!(
                        "{node} {} {} {} {} {} {} {} {}",
                        p.name,
                        p.status.code(),
                        p.next_error_retry + p.next_engaged_retry,
                        p.countdown,
                        job.dest,
                        job.id,
                        job.subid,
                        job.homenode
                    ));
                }
                None => {
                    let retry = if p.status == PrinterStatus::Engaged {
                        p.next_engaged_retry
                    } else {
                        p.next_error_retry
                    };
                    reply.line(format!(
                        "{node} {} {} {} {} ? 0 0 ?",
                        p.name,
                        p.status.code(),
                        retry,
                        p.countdown
                    ));
                }
            }
            if let Ok(text) = std::fs::read_to_string(self.config.paths.status_dir.join(&p.name)) {
                for line in text.lines() {
                    reply.line(line);
                }
            }
            reply.line(".");
        }
        Ok(reply)
    }

    /// `f node dest|all`
    fn list_media(&self, args: &mut Args<'_>) -> Result<Reply> {
        let dest = match self.dest_arg(args, true)? {
            Ok(dest) => dest,
            Err(reply) => return Ok(reply),
        };
        let mut reply = Reply::data();
        for prn in self.printers_of(dest) {
            let p = self.registry.printer(prn);
            reply.line(format!("{} {}", p.name, p.bins.len()));
            for bin in &p.bins {
                let medium = bin.mounted.map_or("", |m| self.media.name(m));
                reply.line(format!("{} {medium}", bin.name).trim_end());
            }
        }
        Ok(reply)
    }

    /// `D node dest|all`
    fn list_destinations(&self, args: &mut Args<'_>) -> Result<Reply> {
        let dests: Vec<DestId> = match self.dest_arg(args, true)? {
            Ok(Some(dest)) => vec![dest],
            Ok(None) => self
                .registry
                .printer_ids()
                .map(DestId::Printer)
                .chain(self.registry.group_ids().map(DestId::Group))
                .filter(|dest| self.registry.dest_is_live(*dest))
                .collect(),
            Err(reply) => return Ok(reply),
        };
        let mut reply = Reply::data();
        for dest in dests {
            reply.line(format!(
                "{} {} {} {}",
                self.registry.dest_name(dest),
                u8::from(dest.is_group()),
                u8::from(self.registry.is_accepting(dest)),
                u8::from(self.registry.is_protected(dest))
            ));
        }
        Ok(reply)
    }

    // -----------------------------------------------------------------------
    // Printer control
    // -----------------------------------------------------------------------

    /// `t node printer`
    fn start_printer(&mut self, args: &mut Args<'_>) -> Result<Reply> {
        let prn = match self.printer_arg(args)? {
            Ok(prn) => prn,
            Err(reply) => return Ok(reply),
        };
        let name = self.registry.printer(prn).name.clone();
        match self.registry.printer(prn).status {
            PrinterStatus::Idle
            | PrinterStatus::Canceling
            | PrinterStatus::Seizing
            | PrinterStatus::Engaged
            | PrinterStatus::Starved => Ok(Reply::with(
                ReplyCode::Already,
                format!("The printer \"{name}\" is not stopt."),
            )),
            PrinterStatus::Printing => Ok(Reply::with(
                ReplyCode::Already,
                format!("The printer \"{name}\" is already printing."),
            )),
            PrinterStatus::Fault | PrinterStatus::Stopt => {
                info!(printer = %name, "printer started");
                self.set_printer_status(prn, PrinterStatus::Idle)?;
                self.look_for_work(prn)?;
                Ok(Reply::new(ReplyCode::Ok))
            }
            PrinterStatus::Halting => Ok(Reply::with(
                ReplyCode::NotPossible,
                format!("There is an outstanding halt command for the printer \"{name}\"."),
            )),
            PrinterStatus::Stopping => {
                // The stop never completes, so whoever waits for it is let go.
                if let Some(waiter) = self.registry.printer_mut(prn).stop_waiter.take() {
                    if let Err(e) = self.launcher.signal(waiter, Signal::SIGUSR1) {
                        debug!(pid = waiter, error = %e, "stop waiter has gone away");
                    }
                }
                self.set_printer_status(prn, PrinterStatus::Printing)?;
                Ok(Reply::new(ReplyCode::Ok))
            }
            PrinterStatus::Deleted => Ok(no_such_dest(&name)),
        }
    }

    /// `p`, `P` and `b node printer`
    fn stop_printer(&mut self, args: &mut Args<'_>, mode: StopMode, pid: i32) -> Result<Reply> {
        let prn = match self.printer_arg(args)? {
            Ok(prn) => prn,
            Err(reply) => return Ok(reply),
        };
        let printer = self.registry.printer(prn);
        let name = printer.name.clone();
        let status = printer.status;
        let someone_waits = printer.stop_waiter.is_some();
        let (next, kill) = match (status, mode) {
            (
                PrinterStatus::Fault
                | PrinterStatus::Idle
                | PrinterStatus::Engaged
                | PrinterStatus::Starved,
                _,
            ) => {
                info!(printer = %name, "printer stopped");
                self.set_printer_status(prn, PrinterStatus::Stopt)?;
                return Ok(Reply::new(ReplyCode::Ok));
            }
            (PrinterStatus::Halting, _) => {
                return Ok(Reply::with(
                    ReplyCode::Already,
                    format!("The printer \"{name}\" is already halting."),
                ));
            }
            (PrinterStatus::Stopt, _) => {
                return Ok(Reply::with(
                    ReplyCode::Already,
                    format!("The printer \"{name}\" is already stopt."),
                ));
            }
            (PrinterStatus::Stopping, StopMode::Stop | StopMode::StopAndWait) => {
                return Ok(Reply::with(
                    ReplyCode::Already,
                    format!("The printer \"{name}\" is already stopping."),
                ));
            }
            (PrinterStatus::Deleted, _) => return Ok(no_such_dest(&name)),
            // The driver is already being killed.
            (PrinterStatus::Canceling | PrinterStatus::Seizing, _) => {
                (PrinterStatus::Halting, false)
            }
            (PrinterStatus::Printing | PrinterStatus::Stopping, StopMode::Halt) => {
                (PrinterStatus::Halting, true)
            }
            (PrinterStatus::Printing, _) => (PrinterStatus::Stopping, false),
        };

        if mode == StopMode::StopAndWait && someone_waits {
            return Ok(Reply::with(
                ReplyCode::CantWait,
                format!("Another process is already waiting for \"{name}\" to stop."),
            ));
        }
        info!(printer = %name, status = %next, "printer stopping after current job");
        self.set_printer_status(prn, next)?;
        if kill {
            self.kill_driver(prn);
        }
        let mut reply = Reply::new(ReplyCode::Ok);
        if mode == StopMode::StopAndWait {
            self.registry.printer_mut(prn).stop_waiter = Some(pid);
            reply.wake = false;
        }
        Ok(reply)
    }

    // -----------------------------------------------------------------------
    // Job control
    // -----------------------------------------------------------------------

    /// `h node dest id subid homenode`
    fn hold_job(&mut self, args: &mut Args<'_>) -> Result<Reply> {
        let selector = match self.job_selector(args)? {
            Ok(selector) => selector,
            Err(reply) => return Ok(reply),
        };
        let Some(key) = self.matching_keys(&selector).first().copied() else {
            return Ok(no_such_job());
        };
        let jobid = self.jobid(&key);
        let status = self.queue.get(&key).map_or(JobStatus::Waiting, |e| e.status);
        match status {
            JobStatus::Waiting | JobStatus::WaitingForMedia | JobStatus::Stranded => {
                self.set_job_status(&key, JobStatus::Held)?;
            }
            JobStatus::Held => {
                return Ok(Reply::with(
                    ReplyCode::Already,
                    format!("Job \"{jobid}\" is already held."),
                ));
            }
            JobStatus::Arrested => {
                return Ok(Reply::with(
                    ReplyCode::Already,
                    format!("Job \"{jobid}\" is arrested."),
                ));
            }
            JobStatus::Seizing => {
                return Ok(Reply::with(
                    ReplyCode::Already,
                    format!("Job \"{jobid}\" is already being seized."),
                ));
            }
            JobStatus::Canceling => {
                // The driver is already dying; hold the job instead.
                if let Some(prn) = self.printer_with_job(&key) {
                    let printer = self.registry.printer_mut(prn);
                    printer.cancel_job = false;
                    printer.hold_job = true;
                    if printer.status == PrinterStatus::Canceling {
                        self.set_printer_status(prn, PrinterStatus::Seizing)?;
                    }
                }
                self.set_job_status(&key, JobStatus::Seizing)?;
            }
            JobStatus::Printing(prn) => {
                self.registry.printer_mut(prn).hold_job = true;
                if self.registry.printer(prn).status == PrinterStatus::Printing {
                    self.set_printer_status(prn, PrinterStatus::Seizing)?;
                }
                self.set_job_status(&key, JobStatus::Seizing)?;
                self.kill_driver(prn);
                let printer = &self.registry.printer(prn).name;
                return Ok(Reply::with(
                    ReplyCode::Ok,
                    format!("Seizing job \"{jobid}\" which is printing on \"{printer}\"."),
                ));
            }
        }
        info!(job = %jobid, "job held");
        Ok(Reply::new(ReplyCode::Ok))
    }

    /// `r node dest id subid homenode`
    fn release_job(&mut self, args: &mut Args<'_>) -> Result<Reply> {
        let selector = match self.job_selector(args)? {
            Ok(selector) => selector,
            Err(reply) => return Ok(reply),
        };
        let Some(key) = self.matching_keys(&selector).first().copied() else {
            return Ok(no_such_job());
        };
        let jobid = self.jobid(&key);
        match self.queue.get(&key).map(|e| e.status) {
            Some(JobStatus::Held | JobStatus::Arrested) => {
                self.set_job_status(&key, JobStatus::Waiting)?;
                if let Some(entry) = self.queue.get_mut(&key) {
                    entry.arrested_at = None;
                }
                self.recompute_notnow(&key)?;
                if self.queue.get(&key).is_some_and(|e| e.status == JobStatus::Waiting) {
                    self.try_suitable(&key)?;
                }
                info!(job = %jobid, "job released");
                Ok(Reply::new(ReplyCode::Ok))
            }
            Some(JobStatus::Seizing) => Ok(Reply::with(
                ReplyCode::Already,
                format!("Job \"{jobid}\" is being seized and can not be released yet."),
            )),
            _ => Ok(Reply::with(
                ReplyCode::Already,
                format!("Job \"{jobid}\" is not held."),
            )),
        }
    }

    /// `c node dest id subid homenode inform`
    fn cancel_jobs(&mut self, args: &mut Args<'_>) -> Result<Reply> {
        let selector = match self.job_selector(args)? {
            Ok(selector) => selector,
            Err(reply) => return Ok(reply),
        };
        let inform: i32 = args.number()?;
        let mut count = 0;
        for key in self.matching_keys(&selector) {
            let Some(status) = self.queue.get(&key).map(|e| e.status) else {
                continue;
            };
            count += 1;
            match status {
                JobStatus::Printing(prn) => {
                    if self.registry.printer(prn).status == PrinterStatus::Printing {
                        self.set_printer_status(prn, PrinterStatus::Canceling)?;
                    }
                    self.registry.printer_mut(prn).cancel_job = true;
                    self.set_job_status(&key, JobStatus::Canceling)?;
                    self.kill_driver(prn);
                }
                JobStatus::Canceling => {}
                JobStatus::Seizing => {
                    if let Some(prn) = self.printer_with_job(&key) {
                        let printer = self.registry.printer_mut(prn);
                        printer.hold_job = false;
                        printer.cancel_job = true;
                        if printer.status == PrinterStatus::Seizing {
                            self.set_printer_status(prn, PrinterStatus::Canceling)?;
                        }
                    }
                    self.set_job_status(&key, JobStatus::Canceling)?;
                }
                other => {
                    if inform != 0 && other != JobStatus::Arrested {
                        self.respond(&key, ResponseCode::Canceled, None);
                    }
                    self.discard_job(&key)?;
                }
            }
        }
        info!(count, "jobs canceled");
        if count == 0 && !selector.is_wildcard() {
            return Ok(no_such_job());
        }
        let mut reply = Reply::data();
        reply.line(count.to_string());
        Ok(reply)
    }

    /// `m node dest id subid homenode newnode newdest`
    fn move_jobs(&mut self, args: &mut Args<'_>) -> Result<Reply> {
        let selector = match self.job_selector(args)? {
            Ok(selector) => selector,
            Err(reply) => return Ok(reply),
        };
        let newnode = args.word()?;
        let newdest_name = args.word()?;
        if !self.is_local_node(newnode) {
            return Ok(foreign_node(newnode));
        }
        let Some(newdest) = self.registry.dest_by_name(newdest_name) else {
            return Ok(no_such_dest(newdest_name));
        };

        let queue_dir = self.config.paths.queue_dir.clone();
        let data_dir = self.config.paths.data_dir.clone();
        let mut moved = Vec::new();
        let mut printing = 0;
        let mut rank2 = 0;
        for index in 0..self.queue.len() {
            let entry = &self.queue.entries()[index];
            let key = entry.key;
            if !selector.matches(&key) {
                if key.dest == newdest {
                    rank2 += 1;
                }
                continue;
            }
            if matches!(
                entry.status,
                JobStatus::Printing(_) | JobStatus::Canceling | JobStatus::Seizing
            ) {
                printing += 1;
                continue;
            }

            if key.dest != newdest {
                let from = self.job_name(&key);
                let line = format!("MOV {} {} {}", self.jobid(&key), newdest_name, rank2);
                self.log_change(&line);
                let mut to = from.clone();
                to.dest = newdest_name.to_string();
                rename_job_files(&queue_dir, &data_dir, &from, &to);
                append_job_log(
                    &to.data_file(&data_dir, "log"),
                    &format!("Job moved from destination \"{}\" to \"{}\".", from.dest, to.dest),
                );
                let entry = &mut self.queue.entries_mut()[index];
                entry.key.dest = newdest;
                entry.pass = i32::from(newdest.is_group());
                let new_key = entry.key;
                self.children.rekey_question(&key, new_key);
            }
            let entry = &mut self.queue.entries_mut()[index];
            entry.never = 0;
            moved.push(entry.key);
            rank2 += 1;
        }

        for key in &moved {
            if self.queue.get(key).is_some_and(|e| e.status == JobStatus::Stranded) {
                self.set_job_status(key, JobStatus::Waiting)?;
            }
            self.recompute_notnow(key)?;
            if self.queue.get(key).is_some_and(|e| e.status == JobStatus::Waiting) {
                self.try_suitable(key)?;
            }
        }
        info!(moved = moved.len(), printing, dest = newdest_name, "jobs moved");

        let mut reply = match moved.len() {
            0 if selector.id == -1 => return Ok(Reply::with(ReplyCode::BadJob, "No jobs are queued there.")),
            0 if printing > 0 => Reply::new(ReplyCode::Ok),
            0 => return Ok(no_such_job()),
            1 => Reply::with(ReplyCode::Ok, "1 file was moved."),
            n => Reply::with(ReplyCode::Ok, format!("{n} files were moved.")),
        };
        match printing {
            0 => {}
            1 => reply.line("1 file was not moved because it was being printed."),
            n => reply.line(format!("{n} files were not moved because they were being printed.")),
        }
        Ok(reply)
    }

    /// `U node dest id subid homenode newpos`
    fn rush_job(&mut self, args: &mut Args<'_>) -> Result<Reply> {
        let selector = match self.job_selector(args)? {
            Ok(selector) => selector,
            Err(reply) => return Ok(reply),
        };
        let newpos: i32 = args.number()?;
        let Some(key) = self.matching_keys(&selector).first().copied() else {
            return Ok(no_such_job());
        };
        let line = format!("RSH {}", self.jobid(&key));
        self.log_change(&line);
        self.queue.rush(&key, newpos == 0);
        Ok(Reply::new(ReplyCode::Ok))
    }

    // -----------------------------------------------------------------------
    // Destination control
    // -----------------------------------------------------------------------

    /// `M node printer bin [medium]`
    fn mount(&mut self, args: &mut Args<'_>) -> Result<Reply> {
        let prn = match self.printer_arg(args)? {
            Ok(prn) => prn,
            Err(reply) => return Ok(reply),
        };
        let bin_name = args.word()?;
        let medium = args.optional().filter(|m| !m.is_empty());
        let printer = self.registry.printer(prn);
        let Some(bin) = printer.bins.iter().position(|b| b.name == bin_name) else {
            return Ok(Reply::with(
                ReplyCode::BadBin,
                format!("The printer \"{}\" does not have a bin called \"{bin_name}\".", printer.name),
            ));
        };
        let mounted = medium.map(|m| self.media.intern(m));
        self.registry.printer_mut(prn).bins[bin].mounted = mounted;

        self.printer_media_changed(prn)?;
        if self.registry.printer(prn).status == PrinterStatus::Idle {
            self.look_for_work(prn)?;
        }
        let printer = self.registry.printer(prn);
        if let Err(e) = media::save_mounted(&self.config.paths.mounted_dir, printer, &self.media) {
            warn!(printer = %printer.name, error = %e, "mounted media not saved");
        }
        let line = format!("MOUNT {} {} {}", printer.name, bin_name, medium.unwrap_or(""));
        self.log_change(line.trim_end());
        Ok(Reply::new(ReplyCode::Ok))
    }

    /// `A`/`R node dest`
    fn set_accepting(&mut self, args: &mut Args<'_>, accepting: bool) -> Result<Reply> {
        let dest = match self.dest_arg(args, false)? {
            Ok(Some(dest)) => dest,
            Ok(None) => return Ok(no_such_dest("all")),
            Err(reply) => return Ok(reply),
        };
        match dest {
            DestId::Printer(prn) => self.registry.printer_mut(prn).accepting = accepting,
            DestId::Group(group) => self.registry.group_mut(group).accepting = accepting,
        }
        info!(dest = %self.registry.dest_name(dest), accepting, "acceptance changed");
        self.persist_dest(dest);
        Ok(Reply::new(ReplyCode::Ok))
    }

    /// `G node group 0|1`
    fn hold_group(&mut self, args: &mut Args<'_>) -> Result<Reply> {
        let group = match self.dest_arg(args, false)? {
            Ok(Some(DestId::Group(group))) => group,
            Ok(_) => {
                return Ok(Reply::with(ReplyCode::BadDest, "Not a group."));
            }
            Err(reply) => return Ok(reply),
        };
        let held = args.number::<i32>()? != 0;
        self.registry.group_mut(group).held = held;
        info!(group = %self.registry.group(group).name, held, "group hold changed");
        self.persist_group(group);
        if !held {
            self.start_group_jobs(group)?;
        }
        Ok(Reply::new(ReplyCode::Ok))
    }

    fn start_group_jobs(&mut self, group: GroupId) -> Result<()> {
        let dest = DestId::Group(group);
        let keys: Vec<JobKey> = self
            .queue
            .entries()
            .iter()
            .filter(|e| e.key.dest == dest && e.status == JobStatus::Waiting)
            .map(|e| e.key)
            .collect();
        for key in keys {
            self.try_suitable(&key)?;
        }
        Ok(())
    }
}

fn append_job_log(path: &Path, message: &str) {
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| writeln!(file, "{message}"));
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "job log not written");
    }
}

#[cfg(test)]
mod tests {
    use spoolwerk_core::types::GroupId;

    use super::*;
    use crate::supervisor::{ChildExit, ExitOutcome};
    use crate::testutil::{Fixture, fixture, local_key, write_job};

    const PID: i32 = 4242;

    fn announce(fx: &mut Fixture, dest: &str, id: i32, text: &str) {
        write_job(fx.spooler.config(), dest, id, text);
        fx.spooler
            .handle_fifo_line(&format!("j hydra {dest} {id} 0 hydra 20 0"))
            .expect("announce");
    }

    /// Send a request and return the reply file, which is consumed.
    fn ask(fx: &mut Fixture, command: &str) -> String {
        fx.spooler
            .handle_fifo_line(&format!("{PID} {command}"))
            .expect("request");
        let path = fx.spooler.reply_path(PID);
        let text = std::fs::read_to_string(&path).expect("reply file");
        std::fs::remove_file(&path).expect("consume reply");
        text
    }

    fn woken(fx: &Fixture) -> usize {
        fx.launcher
            .signals()
            .iter()
            .filter(|(pid, sig)| *pid == PID && *sig == Signal::SIGUSR1)
            .count()
    }

    fn stop(fx: &mut Fixture, prn: usize) {
        fx.spooler
            .with_lock(|s| s.set_printer_status(PrinterId(prn), PrinterStatus::Stopt))
            .expect("stop");
    }

    fn driver_exit(fx: &mut Fixture, outcome: ExitOutcome) {
        let pid = fx.launcher.last_pid_of("spoolwerk-driver").expect("driver");
        fx.spooler.reap(ChildExit { pid, outcome }).expect("reap");
    }

    #[test]
    fn listing_carries_the_queue_file_and_end_tags() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        stop(&mut fx, 0);
        announce(&mut fx, "oscar", 7, "Title: report\n");
        let reply = ask(&mut fx, "l hydra oscar -1 -1 *");
        assert_eq!(
            reply,
            "-1\nhydra oscar 7 0 hydra 20 -1 ? 0 0 0 0\nTitle: report\n..\n.\n"
        );
        assert_eq!(woken(&fx), 1);
    }

    #[test]
    fn unknown_destination_and_foreign_node_are_baddest() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        assert!(ask(&mut fx, "l hydra nowhere -1 -1 *").starts_with("1\n"));
        assert!(ask(&mut fx, "h faraway oscar 1 0 *").starts_with("1\n"));
    }

    #[test]
    fn existing_reply_file_aborts_the_request() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        let path = fx.spooler.reply_path(PID);
        std::fs::write(&path, "stale").expect("write");
        fx.spooler
            .handle_fifo_line(&format!("{PID} A hydra oscar"))
            .expect("request");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "stale");
        assert_eq!(woken(&fx), 0);
    }

    #[test]
    fn vanished_requester_loses_its_reply_file() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        fx.launcher.set_fail_signals(true);
        fx.spooler
            .handle_fifo_line(&format!("{PID} D hydra all"))
            .expect("request");
        assert!(!fx.spooler.reply_path(PID).exists());
    }

    #[test]
    fn status_reports_printing_job_and_driver_lines() {
        let mut fx = fixture(&[("oscar", ""), ("papa", "")], &[]);
        announce(&mut fx, "oscar", 3, "");
        let status_dir = fx.spooler.config().paths.status_dir.clone();
        std::fs::write(status_dir.join("oscar"), "status: warming up\n").expect("status");
        let reply = ask(&mut fx, "s hydra all");
        assert_eq!(
            reply,
            "-1\nhydra oscar 1 0 0 oscar 3 0 hydra\nstatus: warming up\n.\nhydra papa 0 0 0 ? 0 0 ?\n.\n"
        );
    }

    #[test]
    fn stop_and_wait_is_woken_when_the_printer_stops() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        announce(&mut fx, "oscar", 1, "");
        assert_eq!(ask(&mut fx, "P hydra oscar"), "0\n");
        assert_eq!(woken(&fx), 0);
        assert_eq!(fx.spooler.registry().printer(PrinterId(0)).status, PrinterStatus::Stopping);

        // A second waiter is refused.
        fx.spooler
            .handle_fifo_line("777 P hydra oscar")
            .expect("request");
        let other = fx.spooler.reply_path(777);
        assert!(std::fs::read_to_string(other).expect("reply").starts_with("8\n"));

        driver_exit(&mut fx, ExitOutcome::Code(0));
        assert_eq!(fx.spooler.registry().printer(PrinterId(0)).status, PrinterStatus::Stopt);
        assert_eq!(woken(&fx), 1);
        assert!(fx.spooler.queue().is_empty());
    }

    #[test]
    fn stop_and_wait_refused_while_someone_waits() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        announce(&mut fx, "oscar", 1, "");
        fx.spooler
            .with_lock(|s| s.set_printer_status(PrinterId(0), PrinterStatus::Canceling))
            .expect("canceling");
        fx.spooler.registry.printer_mut(PrinterId(0)).stop_waiter = Some(99);
        assert!(ask(&mut fx, "P hydra oscar").starts_with("7\n"));
        assert_eq!(fx.spooler.registry().printer(PrinterId(0)).status, PrinterStatus::Canceling);
    }

    #[test]
    fn halt_kills_the_driver_and_start_resumes() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        announce(&mut fx, "oscar", 1, "");
        let driver = fx.launcher.last_pid_of("spoolwerk-driver").expect("driver");
        assert_eq!(ask(&mut fx, "b hydra oscar"), "0\n");
        assert!(fx
            .launcher
            .signals()
            .contains(&(driver as i32, Signal::SIGTERM)));
        assert!(ask(&mut fx, "t hydra oscar").starts_with("22\n"));

        driver_exit(
            &mut fx,
            ExitOutcome::Signaled {
                signal: 15,
                core_dumped: false,
            },
        );
        assert!(ask(&mut fx, "b hydra oscar").starts_with("8\n"));
        assert_eq!(ask(&mut fx, "t hydra oscar"), "0\n");
        let key = local_key(DestId::Printer(PrinterId(0)), 1);
        assert_eq!(
            fx.spooler.queue().get(&key).expect("queued").status,
            JobStatus::Printing(PrinterId(0))
        );
    }

    #[test]
    fn start_of_stopping_printer_cancels_the_stop() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        announce(&mut fx, "oscar", 1, "");
        ask(&mut fx, "p hydra oscar");
        fx.spooler.registry.printer_mut(PrinterId(0)).stop_waiter = Some(55);
        assert_eq!(ask(&mut fx, "t hydra oscar"), "0\n");
        let printer = fx.spooler.registry().printer(PrinterId(0));
        assert_eq!(printer.status, PrinterStatus::Printing);
        assert_eq!(printer.stop_waiter, None);
        assert!(fx.launcher.signals().contains(&(55, Signal::SIGUSR1)));
    }

    #[test]
    fn group_name_is_not_a_printer() {
        let mut fx = fixture(&[("p1", "")], &[("duo", "Printer: p1\n")]);
        assert!(ask(&mut fx, "t hydra duo").starts_with("6\n"));
    }

    #[test]
    fn holding_a_printing_job_seizes_it() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        announce(&mut fx, "oscar", 1, "");
        let reply = ask(&mut fx, "h hydra oscar 1 0 hydra");
        assert!(reply.starts_with("0\nSeizing job \"oscar-1\""));
        let key = local_key(DestId::Printer(PrinterId(0)), 1);
        assert_eq!(fx.spooler.queue().get(&key).expect("queued").status, JobStatus::Seizing);

        driver_exit(
            &mut fx,
            ExitOutcome::Signaled {
                signal: 15,
                core_dumped: false,
            },
        );
        assert_eq!(fx.spooler.queue().get(&key).expect("queued").status, JobStatus::Held);
        assert_eq!(fx.spooler.registry().printer(PrinterId(0)).status, PrinterStatus::Idle);

        assert_eq!(ask(&mut fx, "r hydra oscar 1 0 hydra"), "0\n");
        assert_eq!(
            fx.spooler.queue().get(&key).expect("queued").status,
            JobStatus::Printing(PrinterId(0))
        );
    }

    #[test]
    fn hold_and_release_of_waiting_jobs() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        stop(&mut fx, 0);
        announce(&mut fx, "oscar", 1, "");
        assert_eq!(ask(&mut fx, "h hydra oscar 1 0 hydra"), "0\n");
        assert!(ask(&mut fx, "h hydra oscar 1 0 hydra").starts_with("8\n"));
        assert!(ask(&mut fx, "h hydra oscar 9 0 hydra").starts_with("2\n"));
        assert_eq!(ask(&mut fx, "r hydra oscar 1 0 hydra"), "0\n");
        assert!(ask(&mut fx, "r hydra oscar 1 0 hydra").starts_with("8\n"));
    }

    #[test]
    fn cancel_of_printing_job_waits_for_the_driver() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        announce(&mut fx, "oscar", 1, "");
        announce(&mut fx, "oscar", 2, "");
        assert_eq!(ask(&mut fx, "c hydra oscar -1 -1 * 1"), "-1\n2\n");

        let first = local_key(DestId::Printer(PrinterId(0)), 1);
        let second = local_key(DestId::Printer(PrinterId(0)), 2);
        assert_eq!(fx.spooler.queue().get(&first).expect("queued").status, JobStatus::Canceling);
        assert!(fx.spooler.queue().get(&second).is_none());
        assert_eq!(fx.spooler.registry().printer(PrinterId(0)).status, PrinterStatus::Canceling);

        driver_exit(
            &mut fx,
            ExitOutcome::Signaled {
                signal: 15,
                core_dumped: false,
            },
        );
        assert!(fx.spooler.queue().is_empty());
        let codes: Vec<String> = fx
            .launcher
            .spawned()
            .into_iter()
            .filter(|(_, r)| r.program.ends_with("spoolwerk-respond"))
            .map(|(_, r)| r.args[2].clone())
            .collect();
        assert_eq!(codes, vec!["2", "3"]);
    }

    #[test]
    fn cancel_of_missing_job_is_badjob() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        assert!(ask(&mut fx, "c hydra oscar 5 0 hydra 0").starts_with("2\n"));
        assert_eq!(ask(&mut fx, "c hydra all -1 -1 * 0"), "-1\n0\n");
    }

    #[test]
    fn mounting_media_releases_waiting_jobs() {
        let mut fx = fixture(&[("oscar", "Bin: upper\nBin: lower\n")], &[]);
        announce(&mut fx, "oscar", 1, "Media: letter\n");
        let key = local_key(DestId::Printer(PrinterId(0)), 1);
        assert_eq!(
            fx.spooler.queue().get(&key).expect("queued").status,
            JobStatus::WaitingForMedia
        );
        assert!(ask(&mut fx, "M hydra oscar middle letter").starts_with("3\n"));
        assert_eq!(ask(&mut fx, "M hydra oscar lower letter"), "0\n");
        assert_eq!(
            fx.spooler.queue().get(&key).expect("queued").status,
            JobStatus::Printing(PrinterId(0))
        );
        assert_eq!(ask(&mut fx, "f hydra oscar"), "-1\noscar 2\nupper\nlower letter\n");
        let mounted = fx.spooler.config().paths.mounted_dir.join("oscar");
        assert_eq!(std::fs::metadata(mounted).expect("saved").len(), 64);
    }

    #[test]
    fn mounting_on_one_member_releases_group_job() {
        let mut fx = fixture(
            &[("p1", "Bin: upper\n"), ("p2", "Bin: lower\n")],
            &[("duo", "Printer: p1\nPrinter: p2\n")],
        );
        stop(&mut fx, 0);
        announce(&mut fx, "duo", 1, "Media: letter\n");
        let key = local_key(DestId::Group(GroupId(0)), 1);
        let entry = fx.spooler.queue().get(&key).expect("queued");
        assert_eq!(entry.notnow, 0b11);
        assert_eq!(entry.status, JobStatus::WaitingForMedia);

        assert_eq!(ask(&mut fx, "M hydra p2 lower letter"), "0\n");
        let entry = fx.spooler.queue().get(&key).expect("queued");
        assert_eq!(entry.notnow, 0b01);
        assert_eq!(entry.status, JobStatus::Printing(PrinterId(1)));
    }

    #[test]
    fn mounting_other_medium_leaves_group_job_waiting_for_media() {
        let mut fx = fixture(
            &[("p1", "Bin: upper\n"), ("p2", "Bin: lower\n")],
            &[("duo", "Printer: p1\nPrinter: p2\n")],
        );
        stop(&mut fx, 0);
        announce(&mut fx, "duo", 1, "Media: a4\n");
        let key = local_key(DestId::Group(GroupId(0)), 1);

        assert_eq!(ask(&mut fx, "M hydra p2 lower letter"), "0\n");
        let entry = fx.spooler.queue().get(&key).expect("queued");
        assert_eq!(entry.notnow, 0b11);
        assert_eq!(entry.status, JobStatus::WaitingForMedia);
        assert!(fx.launcher.last_pid_of("spoolwerk-driver").is_none());
    }

    #[test]
    fn questioner_exit_finds_moved_job() {
        let mut fx = fixture(&[("oscar", ""), ("papa", "")], &[]);
        stop(&mut fx, 0);
        stop(&mut fx, 1);
        announce(&mut fx, "oscar", 3, "Question: Print 400 pages?\nResponse: write alice -x\n");
        let pid = fx.launcher.last_pid_of("spoolwerk-question").expect("questioner");

        assert_eq!(ask(&mut fx, "m hydra oscar 3 0 hydra hydra papa"), "0\n1 file was moved.\n");
        let moved = local_key(DestId::Printer(PrinterId(1)), 3);
        assert!(fx.spooler.queue().get(&moved).expect("queued").question.asking_now);

        fx.spooler
            .reap(ChildExit {
                pid,
                outcome: ExitOutcome::Code(0),
            })
            .expect("reap");
        let question = &fx.spooler.queue().get(&moved).expect("queued").question;
        assert!(!question.asking_now);
        assert!(question.resend_at.is_some());
    }

    #[test]
    fn accept_reject_and_destination_listing() {
        let mut fx = fixture(&[("p1", "Charge: 0.05\n")], &[("duo", "Printer: p1\n")]);
        assert_eq!(ask(&mut fx, "R hydra duo"), "0\n");
        assert_eq!(ask(&mut fx, "D hydra all"), "-1\np1 0 1 1\nduo 1 0 0\n");
        assert_eq!(ask(&mut fx, "A hydra duo"), "0\n");
        assert!(fx.spooler.registry().group(GroupId(0)).accepting);
    }

    #[test]
    fn move_renames_files_and_logs() {
        let mut fx = fixture(&[("oscar", ""), ("papa", "")], &[]);
        stop(&mut fx, 0);
        stop(&mut fx, 1);
        announce(&mut fx, "papa", 1, "");
        announce(&mut fx, "oscar", 2, "");
        let reply = ask(&mut fx, "m hydra oscar 2 0 hydra hydra papa");
        assert_eq!(reply, "0\n1 file was moved.\n");

        let queue_dir = fx.spooler.config().paths.queue_dir.clone();
        assert!(queue_dir.join("hydra:papa-2.0(hydra)").exists());
        assert!(!queue_dir.join("hydra:oscar-2.0(hydra)").exists());
        let moved = local_key(DestId::Printer(PrinterId(1)), 2);
        assert!(fx.spooler.queue().get(&moved).is_some());
        let log = std::fs::read_to_string(
            fx.spooler.config().paths.data_dir.join("hydra:papa-2.0(hydra)-log"),
        )
        .expect("job log");
        assert_eq!(log, "Job moved from destination \"oscar\" to \"papa\".\n");
        let changes =
            std::fs::read_to_string(&fx.spooler.config().paths.change_log).expect("change log");
        assert!(changes.contains("MOV oscar-2 papa 1\n"));
    }

    #[test]
    fn printing_jobs_are_not_moved() {
        let mut fx = fixture(&[("oscar", ""), ("papa", "")], &[]);
        announce(&mut fx, "oscar", 1, "");
        let reply = ask(&mut fx, "m hydra oscar 1 0 hydra hydra papa");
        assert_eq!(reply, "0\n1 file was not moved because it was being printed.\n");
        assert!(ask(&mut fx, "m hydra oscar 5 0 hydra hydra papa").starts_with("2\n"));
    }

    #[test]
    fn rush_moves_a_job_to_the_head() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        stop(&mut fx, 0);
        announce(&mut fx, "oscar", 1, "");
        announce(&mut fx, "oscar", 2, "");
        assert_eq!(ask(&mut fx, "U hydra oscar 2 0 hydra 0"), "0\n");
        let head = &fx.spooler.queue().entries()[0];
        assert_eq!(head.key.id, 2);
        assert_eq!(head.priority, 0);
        assert!(ask(&mut fx, "U hydra oscar 3 0 hydra 0").starts_with("2\n"));
    }

    #[test]
    fn held_group_starts_nothing_until_released() {
        let mut fx = fixture(&[("p1", "")], &[("duo", "Printer: p1\n")]);
        assert_eq!(ask(&mut fx, "G hydra duo 1"), "0\n");
        announce(&mut fx, "duo", 1, "");
        let key = local_key(DestId::Group(GroupId(0)), 1);
        assert_eq!(fx.spooler.queue().get(&key).expect("queued").status, JobStatus::Waiting);

        assert_eq!(ask(&mut fx, "G hydra duo 0"), "0\n");
        assert_eq!(
            fx.spooler.queue().get(&key).expect("queued").status,
            JobStatus::Printing(PrinterId(0))
        );
        assert!(ask(&mut fx, "G hydra p1 1").starts_with("1\n"));
    }

    #[test]
    fn unknown_request_gets_an_internal_reply() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        assert!(ask(&mut fx, "Z hydra").starts_with("10\n"));
    }
}
