// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The spooler: owner of every table the daemon mutates.
//
// `Spooler` is an arena holding the node table, destination registry, job
// queue, child tables, durable state store and change log.  Only the event
// loop holds it, and every public entry point runs inside `with_lock`, which
// refuses to be entered twice.  Helpers that change job or printer state
// check that the guard is held, so an accidental mutation from outside an
// entry point surfaces as an internal error instead of silent corruption.
//
// The scheduling, command, alert and question logic live in sibling modules
// as further `impl Spooler` blocks.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use chrono::Utc;
use nix::sys::signal::Signal;
use tracing::{debug, info, instrument, warn};

use spoolwerk_core::config::SpoolConfig;
use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::{DestId, GroupId, JobKey, JobStatus, PrinterId, PrinterStatus};

use crate::changelog::ChangeLog;
use crate::media::{self, MediaNames};
use crate::nodeid::NodeTable;
use crate::queue::{
    JobName, JobQueue, Placement, QueueEntry, QueueFileInfo, status_from_mode, unlink_job_files,
    write_status_bits,
};
use crate::registry::{Printer, Registry};
use crate::state::{GroupRecord, PrinterRecord, StateStore};
use crate::supervisor::{ChildTables, Launcher};

/// The daemon's tables and the handles it needs to act on them.
pub struct Spooler {
    pub(crate) config: SpoolConfig,
    pub(crate) nodes: NodeTable,
    pub(crate) registry: Registry,
    pub(crate) media: MediaNames,
    pub(crate) queue: JobQueue,
    pub(crate) children: ChildTables,
    pub(crate) launcher: Box<dyn Launcher>,
    state: StateStore,
    changelog: ChangeLog,
    lock_depth: u32,
    /// Printers with a driver running.
    pub(crate) active_printers: usize,
    /// Printers in the STARVED state.
    pub(crate) starving_printers: usize,
    /// Seconds until the next starvation relief pass.
    pub(crate) hungry_countdown: i32,
    /// Where the last relief pass stopped.
    pub(crate) hungry_cursor: usize,
    /// Ticks until the next priority upgrade.
    pub(crate) upgrade_countdown: u32,
    /// Jobs with a question nobody has answered yet (an upper bound).
    pub(crate) outstanding_questions: usize,
}

impl Spooler {
    /// Open the change log and state store, load every destination and
    /// restore the persisted destination state.  The queue is recovered
    /// separately by [`Spooler::recover_queue`].
    #[instrument(skip_all, fields(node = %config.node_name))]
    pub fn new(config: SpoolConfig, launcher: Box<dyn Launcher>) -> Result<Self> {
        let mut changelog = ChangeLog::open(&config.paths.change_log, config.changelog_max_lines)?;
        changelog.record("STARTUP");

        let nodes = NodeTable::with_local(&config.node_name);
        let registry = Registry::load(&config.paths.printers_dir, &config.paths.groups_dir)?;
        let state = StateStore::open(&config.paths.state_db)?;
        let queue = JobQueue::new(&config.queue);
        let upgrade_countdown = config.scheduling.upgrade_interval_ticks.max(1);

        let mut spooler = Self {
            config,
            nodes,
            registry,
            media: MediaNames::default(),
            queue,
            children: ChildTables::default(),
            launcher,
            state,
            changelog,
            lock_depth: 0,
            active_printers: 0,
            starving_printers: 0,
            hungry_countdown: 0,
            hungry_cursor: 0,
            upgrade_countdown,
            outstanding_questions: 0,
        };
        spooler.restore_destinations();
        Ok(spooler)
    }

    /// Reseed runtime records from the mounted-media files and the state
    /// store.  Unreadable records are logged and skipped.
    fn restore_destinations(&mut self) {
        let printers: Vec<PrinterId> = self.registry.printer_ids().collect();
        for prn in printers {
            self.restore_printer(prn);
        }
        let groups: Vec<GroupId> = self.registry.group_ids().collect();
        for group in groups {
            self.restore_group(group);
        }
    }

    pub(crate) fn restore_printer(&mut self, prn: PrinterId) {
        let printer = self.registry.printer_mut(prn);
        if let Err(e) = media::load_mounted(&self.config.paths.mounted_dir, printer, &mut self.media) {
            warn!(printer = %printer.name, error = %e, "mounted media not restored");
        }
        match self.state.load_printer(&printer.name) {
            Ok(Some(record)) => apply_printer_record(printer, &record),
            Ok(None) => {}
            Err(e) => warn!(printer = %printer.name, error = %e, "printer state not restored"),
        }
    }

    pub(crate) fn restore_group(&mut self, group: GroupId) {
        let group = self.registry.group_mut(group);
        match self.state.load_group(&group.name) {
            Ok(Some(record)) => {
                group.accepting = record.accepting;
                group.held = record.held;
                group.protect = record.protect;
                group.status_changed = record.changed_at;
            }
            Ok(None) => {}
            Err(e) => warn!(group = %group.name, error = %e, "group state not restored"),
        }
    }

    // -----------------------------------------------------------------------
    // Re-entrancy guard
    // -----------------------------------------------------------------------

    /// Run `f` with the tables entered.  Entering twice is an internal error.
    pub fn with_lock<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.lock_depth > 0 {
            return Err(SpoolError::Internal("spooler tables entered re-entrantly".into()));
        }
        self.lock_depth += 1;
        let result = f(self);
        self.lock_depth -= 1;
        result
    }

    pub(crate) fn ensure_locked(&self, operation: &str) -> Result<()> {
        if self.lock_depth == 0 {
            return Err(SpoolError::Internal(format!("{operation}: tables not locked")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read-only views
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &SpoolConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    pub fn media_names(&self) -> &MediaNames {
        &self.media
    }

    pub fn active_printers(&self) -> usize {
        self.active_printers
    }

    // -----------------------------------------------------------------------
    // Names
    // -----------------------------------------------------------------------

    /// The file-system name of a queued job.
    pub fn job_name(&self, key: &JobKey) -> JobName {
        JobName {
            destnode: self.nodes.name(key.destnode).to_string(),
            dest: self.registry.dest_name(key.dest).to_string(),
            id: key.id,
            subid: key.subid,
            homenode: self.nodes.name(key.homenode).to_string(),
        }
    }

    /// The id shown to users and written to the change log.
    pub fn jobid(&self, key: &JobKey) -> String {
        self.job_name(key).display_id(&self.config.node_name)
    }

    pub(crate) fn queue_file(&self, key: &JobKey) -> PathBuf {
        self.job_name(key).queue_file(&self.config.paths.queue_dir)
    }

    pub(crate) fn log_change(&mut self, line: &str) {
        self.changelog.record(line);
    }

    // -----------------------------------------------------------------------
    // Job state
    // -----------------------------------------------------------------------

    /// Change a queued job's status, announce it and keep the durable mode
    /// bits of its queue file in step.
    pub(crate) fn set_job_status(&mut self, key: &JobKey, status: JobStatus) -> Result<()> {
        self.ensure_locked("set_job_status")?;
        let Some(old) = self.queue.get(key).map(|e| e.status) else {
            return Err(SpoolError::Internal(format!(
                "job {} not in queue",
                self.jobid(key)
            )));
        };

        let jobid = self.jobid(key);
        let line = match status {
            JobStatus::Printing(prn) => {
                format!("JST {jobid} printing on {}", self.registry.printer(prn).name)
            }
            other => format!("JST {jobid} {}", other.description()),
        };
        self.changelog.record(&line);

        let durable = |s: JobStatus| {
            matches!(s, JobStatus::Held | JobStatus::Stranded | JobStatus::Arrested)
        };
        if durable(status) || durable(old) {
            let path = self.queue_file(key);
            if let Err(e) = write_status_bits(&path, status) {
                warn!(job = %jobid, error = %e, "queue file mode not updated");
            }
        }

        if let Some(entry) = self.queue.get_mut(key) {
            entry.status = status;
            if status == JobStatus::Arrested {
                entry.arrested_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    /// Insert a job into the queue with its media requirements and initial
    /// wait reason.  The caller has already taken node references for the
    /// key.
    pub(crate) fn enqueue(
        &mut self,
        key: JobKey,
        status: JobStatus,
        info: &QueueFileInfo,
    ) -> Result<Placement> {
        self.ensure_locked("enqueue")?;
        let mut entry = QueueEntry::new(key, info.priority, status);
        entry.media = info.media.iter().map(|m| self.media.intern(m)).collect();
        entry.notnow = media::notnow_mask(&self.registry, key.dest, &entry.media);
        entry.status = media::wait_reason(
            entry.status,
            entry.notnow,
            media::stopped_mask(&self.registry, key.dest),
            self.registry.all_mask(key.dest),
        );
        let has_question = info.question.is_some() && info.response.is_some();
        entry.question.unanswered = has_question;

        let placement = self.queue.insert(entry)?;
        if has_question {
            self.outstanding_questions += 1;
        }
        Ok(placement)
    }

    /// Remove a job's files and then its queue entry.  The files go first
    /// because dropping the entry may release the node names they are
    /// named after.
    pub(crate) fn discard_job(&mut self, key: &JobKey) -> Result<()> {
        let name = self.job_name(key);
        unlink_job_files(&self.config.paths.queue_dir, &self.config.paths.data_dir, &name);
        self.dequeue(key)?;
        Ok(())
    }

    /// Drop a job from the queue and release its node references.
    pub(crate) fn dequeue(&mut self, key: &JobKey) -> Result<Option<QueueEntry>> {
        self.ensure_locked("dequeue")?;
        let line = format!("DEL {}", self.jobid(key));
        let removed = self.queue.remove(key);
        if removed.is_some() {
            self.changelog.record(&line);
            self.nodes.free(key.destnode);
            self.nodes.free(key.homenode);
        }
        Ok(removed)
    }

    /// Rederive a waiting job's visible wait reason.
    pub(crate) fn update_wait_reason(&mut self, key: &JobKey) -> Result<()> {
        let Some(entry) = self.queue.get(key) else {
            return Ok(());
        };
        let next = media::wait_reason(
            entry.status,
            entry.notnow,
            media::stopped_mask(&self.registry, key.dest),
            self.registry.all_mask(key.dest),
        );
        if next != entry.status {
            self.set_job_status(key, next)?;
        }
        Ok(())
    }

    /// Recompute a job's whole notnow mask, then its wait reason.
    pub(crate) fn recompute_notnow(&mut self, key: &JobKey) -> Result<()> {
        let Some(entry) = self.queue.get(key) else {
            return Ok(());
        };
        let notnow = media::notnow_mask(&self.registry, key.dest, &entry.media);
        if let Some(entry) = self.queue.get_mut(key) {
            entry.notnow = notnow;
        }
        self.update_wait_reason(key)
    }

    /// The printer itself and every live group containing it.
    pub(crate) fn dests_served_by(&self, prn: PrinterId) -> Vec<DestId> {
        let mut dests = vec![DestId::Printer(prn)];
        dests.extend(self.registry.groups_containing(prn).into_iter().map(DestId::Group));
        dests
    }

    fn keys_for(&self, dest: DestId) -> Vec<JobKey> {
        self.queue
            .entries()
            .iter()
            .filter(|e| e.key.dest == dest)
            .map(|e| e.key)
            .collect()
    }

    /// Media mounted on `prn` changed: refresh its notnow bit in every job
    /// it might print, then their wait reasons.
    pub(crate) fn printer_media_changed(&mut self, prn: PrinterId) -> Result<()> {
        for dest in self.dests_served_by(prn) {
            let Some(bit) = self.registry.printer_bit(dest, prn) else {
                continue;
            };
            for key in self.keys_for(dest) {
                let Some(entry) = self.queue.get(&key) else {
                    continue;
                };
                let fits = media::has_media(self.registry.printer(prn), &entry.media);
                if let Some(entry) = self.queue.get_mut(&key) {
                    if fits {
                        entry.notnow &= !bit;
                    } else {
                        entry.notnow |= bit;
                    }
                }
                self.update_wait_reason(&key)?;
            }
        }
        Ok(())
    }

    /// `prn` was stopped or started: only wait reasons can change.
    pub(crate) fn printer_stop_state_changed(&mut self, prn: PrinterId) -> Result<()> {
        for dest in self.dests_served_by(prn) {
            for key in self.keys_for(dest) {
                self.update_wait_reason(&key)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Printer and group state
    // -----------------------------------------------------------------------

    /// Move a printer to a new status, announce it and persist it.
    ///
    /// Counters that the announcement reports must be set before calling.
    /// Entering STOPT wakes a requester waiting for the stop.
    pub(crate) fn set_printer_status(&mut self, prn: PrinterId, status: PrinterStatus) -> Result<()> {
        self.ensure_locked("set_printer_status")?;
        let printer = self.registry.printer_mut(prn);
        if printer.deleted {
            warn!(printer = %printer.name, %status, "attempt to change state of deleted printer");
            return Ok(());
        }
        let old = printer.status;
        let waiter = if status == PrinterStatus::Stopt {
            printer.stop_waiter.take()
        } else {
            None
        };
        printer.previous_status = old;
        printer.status = status;
        printer.status_changed = Utc::now();

        match (old == PrinterStatus::Starved, status == PrinterStatus::Starved) {
            (true, false) => self.starving_printers = self.starving_printers.saturating_sub(1),
            (false, true) => self.starving_printers += 1,
            _ => {}
        }

        if let Some(pid) = waiter {
            if let Err(e) = self.launcher.signal(pid, Signal::SIGUSR1) {
                debug!(pid, error = %e, "stop waiter has gone away");
            }
        }

        let line = self.pst_line(prn);
        self.changelog.record(&line);
        debug!(printer = %self.registry.printer(prn).name, from = %old, to = %status, "printer status");
        self.persist_printer(prn);

        if old.is_stopped() != status.is_stopped() {
            self.printer_stop_state_changed(prn)?;
        }
        Ok(())
    }

    /// The `PST` change-log line for a printer's current status.
    pub(crate) fn pst_line(&self, prn: PrinterId) -> String {
        let p = self.registry.printer(prn);
        let job = p
            .job
            .map(|k| self.jobid(&k))
            .unwrap_or_else(|| "?".to_string());
        let detail = match p.status {
            PrinterStatus::Printing => format!("printing {job} {}", p.next_error_retry),
            PrinterStatus::Canceling => format!("canceling {job}"),
            PrinterStatus::Seizing => format!("seizing {job}"),
            PrinterStatus::Fault => format!("fault {} {}", p.next_error_retry, p.countdown),
            PrinterStatus::Engaged => format!("engaged {} {}", p.next_engaged_retry, p.countdown),
            PrinterStatus::Stopping => format!("stopping (printing {job})"),
            PrinterStatus::Halting => format!("halting (printing {job})"),
            other => other.keyword().to_string(),
        };
        format!("PST {} {detail}", p.name)
    }

    pub(crate) fn persist_printer(&self, prn: PrinterId) {
        let p = self.registry.printer(prn);
        if p.deleted {
            return;
        }
        let record = PrinterRecord {
            accepting: p.accepting,
            previous_status: p.previous_status,
            status: p.status,
            next_error_retry: p.next_error_retry,
            next_engaged_retry: p.next_engaged_retry,
            countdown: p.countdown,
            protect: p.protect,
            changed_at: p.status_changed,
        };
        let count = self.queue.count_for(DestId::Printer(prn));
        if let Err(e) = self.state.save_printer(&p.name, &record, count) {
            warn!(printer = %p.name, error = %e, "printer state not saved");
        }
    }

    pub(crate) fn persist_group(&self, group: GroupId) {
        let g = self.registry.group(group);
        if g.deleted {
            return;
        }
        let record = GroupRecord {
            accepting: g.accepting,
            held: g.held,
            protect: g.protect,
            changed_at: g.status_changed,
        };
        let count = self.queue.count_for(DestId::Group(group));
        if let Err(e) = self.state.save_group(&g.name, &record, count) {
            warn!(group = %g.name, error = %e, "group state not saved");
        }
    }

    pub(crate) fn persist_dest(&self, dest: DestId) {
        match dest {
            DestId::Printer(prn) => self.persist_printer(prn),
            DestId::Group(group) => self.persist_group(group),
        }
    }

    /// Write every destination record.
    pub fn persist_all(&self) {
        for prn in self.registry.printer_ids() {
            self.persist_printer(prn);
        }
        for group in self.registry.group_ids() {
            self.persist_group(group);
        }
    }

    /// Final bookkeeping before the daemon exits.
    pub fn shutdown(&mut self) {
        self.persist_all();
        self.changelog.record("SHUTDOWN");
        info!(jobs = self.queue.len(), "spooler state saved");
    }

    // -----------------------------------------------------------------------
    // Queue recovery
    // -----------------------------------------------------------------------

    /// Rebuild the queue from the queue directory and start whatever can
    /// print.  An unreadable queue directory is fatal.
    #[instrument(skip_all, fields(dir = %self.config.paths.queue_dir.display()))]
    pub fn recover_queue(&mut self) -> Result<usize> {
        self.with_lock(|s| s.recover_queue_locked())
    }

    fn recover_queue_locked(&mut self) -> Result<usize> {
        let queue_dir = self.config.paths.queue_dir.clone();
        let data_dir = self.config.paths.data_dir.clone();
        let dir_err = |e: std::io::Error| SpoolError::QueueDir {
            path: queue_dir.display().to_string(),
            reason: e.to_string(),
        };

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&queue_dir).map_err(dir_err)? {
            let entry = entry.map_err(dir_err)?;
            match entry.file_name().into_string() {
                Ok(name) if !name.starts_with('.') => names.push(name),
                _ => {}
            }
        }
        names.sort();

        let mut recovered = 0;
        for file_name in names {
            let name = match JobName::parse(&file_name) {
                Ok(name) => name,
                Err(e) => {
                    warn!(file = %file_name, error = %e, "unparsable queue file name");
                    continue;
                }
            };
            let path = queue_dir.join(&file_name);
            let meta = match std::fs::metadata(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(file = %file_name, error = %e, "cannot stat queue file");
                    continue;
                }
            };
            if meta.len() == 0 {
                warn!(file = %file_name, "queue file was of zero length");
                unlink_job_files(&queue_dir, &data_dir, &name);
                continue;
            }
            let status = status_from_mode(meta.permissions().mode());
            let info = match QueueFileInfo::read(&path) {
                Ok(info) => info,
                Err(e) => {
                    warn!(file = %file_name, error = %e, "cannot read queue file");
                    continue;
                }
            };
            if name.destnode != self.config.node_name {
                warn!(file = %file_name, node = %name.destnode, "job for another node left in place");
                continue;
            }
            let Some(dest) = self.registry.dest_by_name(&name.dest) else {
                warn!(file = %file_name, dest = %name.dest, "destination no longer exists");
                continue;
            };

            let key = JobKey {
                destnode: self.nodes.assign(&name.destnode),
                dest,
                id: name.id,
                subid: name.subid,
                homenode: self.nodes.assign(&name.homenode),
            };
            if let Err(e) = self.enqueue(key, status, &info) {
                warn!(file = %file_name, error = %e, "failed to add job to queue");
                self.nodes.free(key.destnode);
                self.nodes.free(key.homenode);
                continue;
            }
            recovered += 1;
            if self.queue.get(&key).is_some_and(|e| e.status == JobStatus::Waiting) {
                self.try_suitable(&key)?;
            }
        }
        info!(jobs = recovered, "queue recovered");
        Ok(recovered)
    }
}

/// Apply a persisted record.  Stopped states come back as STOPT, a fault
/// keeps its retry counters, and every other state restarts idle because no
/// driver survives a restart.
fn apply_printer_record(printer: &mut Printer, record: &PrinterRecord) {
    printer.accepting = record.accepting;
    printer.protect = record.protect;
    printer.previous_status = record.previous_status;
    printer.status_changed = record.changed_at;
    printer.status = match record.status {
        PrinterStatus::Stopt | PrinterStatus::Stopping | PrinterStatus::Halting => {
            PrinterStatus::Stopt
        }
        PrinterStatus::Fault => {
            printer.next_error_retry = record.next_error_retry;
            printer.countdown = record.countdown;
            PrinterStatus::Fault
        }
        _ => PrinterStatus::Idle,
    };
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
