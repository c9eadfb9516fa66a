// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// FIFO command dispatch.
//
// Each line read from the command FIFO is one command; its first word picks
// the handler.  `j` announces a new job, `n` asks for the operator reminder,
// `NP`/`NG` report a changed destination file, and a line starting with a
// process id is a request for the secondary dispatcher.

use tracing::{debug, info, instrument, warn};

use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::{DestId, GroupId, JobKey, JobStatus, PrinterId, PrinterStatus, ResponseCode};

use crate::queue::{JobName, QueueFileInfo, unlink_job_files};
use crate::registry::ReloadOutcome;
use crate::spooler::Spooler;

fn malformed(line: &str) -> SpoolError {
    SpoolError::MalformedCommand(line.to_string())
}

fn parse_field<T: std::str::FromStr>(value: Option<&str>, line: &str) -> Result<T> {
    value
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| malformed(line))
}

impl Spooler {
    /// Execute one command line from the FIFO.
    pub fn handle_fifo_line(&mut self, line: &str) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        debug!(command = line, "fifo command");
        self.with_lock(|s| s.dispatch(line))
    }

    fn dispatch(&mut self, line: &str) -> Result<()> {
        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            return Ok(());
        };
        match first {
            "j" => self.new_job(words, line),
            "n" => self.remind(),
            "NP" => self.reload_printer(words.next().ok_or_else(|| malformed(line))?),
            "NG" => self.reload_group(words.next().ok_or_else(|| malformed(line))?),
            "N" => match (words.next(), words.next()) {
                (Some("P"), Some(name)) => self.reload_printer(name),
                (Some("G"), Some(name)) => self.reload_group(name),
                _ => Err(malformed(line)),
            },
            word if word.bytes().all(|b| b.is_ascii_digit()) => self.secondary(line),
            _ => Err(malformed(line)),
        }
    }

    // -----------------------------------------------------------------------
    // New jobs
    // -----------------------------------------------------------------------

    /// `j destnode dest id subid homenode priority hold`
    #[instrument(skip_all)]
    fn new_job<'a>(&mut self, mut words: impl Iterator<Item = &'a str>, line: &str) -> Result<()> {
        let name = JobName {
            destnode: words.next().ok_or_else(|| malformed(line))?.to_string(),
            dest: words.next().ok_or_else(|| malformed(line))?.to_string(),
            id: parse_field(words.next(), line)?,
            subid: parse_field(words.next(), line)?,
            homenode: words.next().ok_or_else(|| malformed(line))?.to_string(),
        };
        let priority: i32 = parse_field(words.next(), line)?;
        let hold: i32 = parse_field(words.next(), line)?;

        let dest = if name.destnode == self.config.node_name {
            self.registry.dest_by_name(&name.dest)
        } else {
            None
        };
        let Some(dest) = dest else {
            warn!(job = %name, "job for unknown destination");
            self.refuse_job(&name, ResponseCode::CanceledBadDest);
            return Ok(());
        };
        if !self.registry.is_accepting(dest) {
            info!(job = %name, "destination not accepting jobs");
            self.refuse_job(&name, ResponseCode::CanceledRejecting);
            return Ok(());
        }

        let mut info = match QueueFileInfo::read(&name.queue_file(&self.config.paths.queue_dir)) {
            Ok(info) => info,
            Err(e) => {
                warn!(job = %name, error = %e, "queue file unreadable, using defaults");
                QueueFileInfo::parse("")
            }
        };
        info.priority = priority;

        let key = JobKey {
            destnode: self.nodes.assign(&name.destnode),
            dest,
            id: name.id,
            subid: name.subid,
            homenode: self.nodes.assign(&name.homenode),
        };
        let status = if hold != 0 {
            JobStatus::Held
        } else {
            JobStatus::Waiting
        };
        let placement = match self.enqueue(key, status, &info) {
            Ok(placement) => placement,
            Err(e) => {
                self.nodes.free(key.destnode);
                self.nodes.free(key.homenode);
                return Err(e);
            }
        };
        if status == JobStatus::Held {
            // Held is durable across restarts.
            self.set_job_status(&key, JobStatus::Held)?;
        }
        let line = format!("JOB {} {} {}", self.jobid(&key), placement.rank1, placement.rank2);
        self.log_change(&line);
        info!(job = %self.jobid(&key), priority, "job queued");

        if self.queue.get(&key).is_some_and(|e| e.question.unanswered) {
            self.question_look_for_work()?;
        }
        if self.queue.get(&key).is_some_and(|e| e.status == JobStatus::Waiting) {
            self.try_suitable(&key)?;
        }
        Ok(())
    }

    fn refuse_job(&mut self, name: &JobName, code: ResponseCode) {
        self.respond_named(name, code, None);
        unlink_job_files(&self.config.paths.queue_dir, &self.config.paths.data_dir, name);
    }

    // -----------------------------------------------------------------------
    // Destination reloads
    // -----------------------------------------------------------------------

    fn reload_printer(&mut self, name: &str) -> Result<()> {
        let dir = self.config.paths.printers_dir.clone();
        let queue = &self.queue;
        let outcome = self
            .registry
            .reload_printer(&dir, name, &|dest| queue.count_for(dest) > 0)?;
        match outcome {
            ReloadOutcome::Created(prn) => {
                self.restore_printer(prn);
                self.log_change(&format!("PRNRELOAD {name}"));
                self.persist_printer(prn);
                self.look_for_work(prn)?;
            }
            ReloadOutcome::Reloaded(prn) => {
                self.log_change(&format!("PRNRELOAD {name}"));
                self.printer_reconfigured(prn)?;
            }
            ReloadOutcome::Deleted(prn) => {
                self.log_change(&format!("PRNDELETE {name}"));
                if self.registry.printer(prn).driver.is_some() {
                    info!(printer = name, "deleted printer keeps its driver until it exits");
                }
            }
            ReloadOutcome::Unknown => warn!(printer = name, "reload of unknown printer"),
        }
        Ok(())
    }

    /// A printer's configuration changed: it may now print jobs it was
    /// ruled out for, and its bins may differ.
    fn printer_reconfigured(&mut self, prn: PrinterId) -> Result<()> {
        for dest in self.dests_served_by(prn) {
            let Some(bit) = self.registry.printer_bit(dest, prn) else {
                continue;
            };
            let keys: Vec<JobKey> = self
                .queue
                .entries()
                .iter()
                .filter(|e| e.key.dest == dest)
                .map(|e| e.key)
                .collect();
            for key in keys {
                let stranded = match self.queue.get_mut(&key) {
                    Some(entry) => {
                        entry.never &= !bit;
                        entry.status == JobStatus::Stranded
                    }
                    None => continue,
                };
                if stranded {
                    self.set_job_status(&key, JobStatus::Waiting)?;
                }
                self.recompute_notnow(&key)?;
            }
        }
        if self.registry.printer(prn).status == PrinterStatus::Idle {
            self.look_for_work(prn)?;
        }
        Ok(())
    }

    fn reload_group(&mut self, name: &str) -> Result<()> {
        let dir = self.config.paths.groups_dir.clone();
        let queue = &self.queue;
        let outcome = self
            .registry
            .reload_group(&dir, name, &|dest| queue.count_for(dest) > 0)?;
        match outcome {
            ReloadOutcome::Created(group) => {
                self.restore_group(group);
                self.log_change(&format!("GRPRELOAD {name}"));
                self.persist_group(group);
            }
            ReloadOutcome::Reloaded(group) => {
                self.log_change(&format!("GRPRELOAD {name}"));
                self.group_reconfigured(group)?;
            }
            ReloadOutcome::Deleted(_) => self.log_change(&format!("GRPDELETE {name}")),
            ReloadOutcome::Unknown => warn!(group = name, "reload of unknown group"),
        }
        Ok(())
    }

    /// Member offsets may have moved, so every per-member mask of the
    /// group's jobs is rebuilt.
    fn group_reconfigured(&mut self, group: GroupId) -> Result<()> {
        let dest = DestId::Group(group);
        let keys: Vec<JobKey> = self
            .queue
            .entries()
            .iter()
            .filter(|e| e.key.dest == dest)
            .map(|e| e.key)
            .collect();
        for key in &keys {
            let stranded = match self.queue.get_mut(key) {
                Some(entry) => {
                    entry.never = 0;
                    entry.status == JobStatus::Stranded
                }
                None => continue,
            };
            if stranded {
                self.set_job_status(key, JobStatus::Waiting)?;
            }
            self.recompute_notnow(key)?;
        }
        for key in &keys {
            if self.queue.get(key).is_some_and(|e| e.status == JobStatus::Waiting) {
                self.try_suitable(key)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fixture, local_key, write_job, write_printer};

    fn change_log(fx: &crate::testutil::Fixture) -> String {
        std::fs::read_to_string(&fx.spooler.config().paths.change_log).expect("change log")
    }

    #[test]
    fn new_job_is_logged_with_ranks() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        write_job(fx.spooler.config(), "oscar", 41, "");
        fx.spooler
            .handle_fifo_line("j hydra oscar 41 0 hydra 20 0\n")
            .expect("announce");
        let log = change_log(&fx);
        assert!(log.contains("JOB oscar-41 0 0\n"));
        assert!(log.contains("JST oscar-41 printing on oscar\n"));
    }

    #[test]
    fn repeated_announcement_keeps_one_entry_and_its_files() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        fx.spooler
            .with_lock(|s| s.set_printer_status(PrinterId(0), PrinterStatus::Stopt))
            .expect("stop");
        let name = write_job(fx.spooler.config(), "oscar", 6, "");
        fx.spooler
            .handle_fifo_line("j hydra oscar 6 0 hydra 20 0")
            .expect("announce");
        let err = fx
            .spooler
            .handle_fifo_line("j hydra oscar 6 0 hydra 20 0")
            .expect_err("second announcement");
        assert!(matches!(err, SpoolError::DuplicateJob { id: 6, subid: 0 }));
        assert!(!err.is_fatal());
        assert_eq!(fx.spooler.queue().len(), 1);
        assert!(fx.spooler.config().paths.queue_dir.join(name).exists());
    }

    #[test]
    fn held_job_waits_and_sets_the_held_bit() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        write_job(fx.spooler.config(), "oscar", 2, "");
        fx.spooler
            .handle_fifo_line("j hydra oscar 2 0 hydra 20 1")
            .expect("announce");
        let key = local_key(DestId::Printer(PrinterId(0)), 2);
        assert_eq!(fx.spooler.queue().get(&key).expect("queued").status, JobStatus::Held);
        assert!(fx.launcher.spawned().is_empty());
        let mode = std::os::unix::fs::PermissionsExt::mode(
            &std::fs::metadata(fx.spooler.queue_file(&key)).expect("stat").permissions(),
        );
        assert_eq!(mode & 0o100, 0o100);
    }

    #[test]
    fn unknown_destination_is_refused_and_removed() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        let name = write_job(fx.spooler.config(), "nowhere", 3, "Priority: 20\n");
        fx.spooler
            .handle_fifo_line("j hydra nowhere 3 0 hydra 20 0")
            .expect("announce");
        assert!(fx.spooler.queue().is_empty());
        assert!(!fx.spooler.config().paths.queue_dir.join(name).exists());
        let (_, request) = fx.launcher.spawned().pop().expect("responder");
        assert_eq!(request.args[2], ResponseCode::CanceledBadDest.code().to_string());
    }

    #[test]
    fn rejecting_destination_refuses_jobs() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        fx.spooler.registry.printer_mut(PrinterId(0)).accepting = false;
        write_job(fx.spooler.config(), "oscar", 4, "");
        fx.spooler
            .handle_fifo_line("j hydra oscar 4 0 hydra 20 0")
            .expect("announce");
        assert!(fx.spooler.queue().is_empty());
        let (_, request) = fx.launcher.spawned().pop().expect("responder");
        assert_eq!(request.args[2], "5");
    }

    #[test]
    fn malformed_lines_are_errors_but_not_fatal() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        for line in ["j hydra oscar x 0 hydra 20 0", "zz", "N X oscar"] {
            let err = fx.spooler.handle_fifo_line(line).expect_err(line);
            assert!(matches!(err, SpoolError::MalformedCommand(_)));
            assert!(!err.is_fatal());
        }
    }

    #[test]
    fn printer_reload_clears_never_bits_and_unstrands() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        fx.spooler
            .with_lock(|s| s.set_printer_status(PrinterId(0), PrinterStatus::Stopt))
            .expect("stop");
        write_job(fx.spooler.config(), "oscar", 5, "");
        fx.spooler
            .handle_fifo_line("j hydra oscar 5 0 hydra 20 0")
            .expect("announce");
        let key = local_key(DestId::Printer(PrinterId(0)), 5);
        fx.spooler
            .with_lock(|s| {
                if let Some(entry) = s.queue.get_mut(&key) {
                    entry.never = 1;
                }
                s.set_job_status(&key, JobStatus::Stranded)
            })
            .expect("strand");

        write_printer(fx.spooler.config(), "oscar", "Bin: Tray1\n");
        fx.spooler.handle_fifo_line("NP oscar").expect("reload");
        let entry = fx.spooler.queue().get(&key).expect("queued");
        assert_eq!(entry.never, 0);
        assert_eq!(entry.status, JobStatus::Waiting);
        let printer = fx.spooler.registry().printer(PrinterId(0));
        assert_eq!(printer.status, PrinterStatus::Stopt);
        assert_eq!(printer.bins.len(), 1);
        assert!(change_log(&fx).contains("PRNRELOAD oscar\n"));
    }

    #[test]
    fn vanished_printer_is_marked_deleted() {
        let mut fx = fixture(&[("oscar", ""), ("papa", "")], &[]);
        let dir = fx.spooler.config().paths.printers_dir.clone();
        std::fs::remove_file(dir.join("papa")).expect("rm");
        fx.spooler.handle_fifo_line("N P papa").expect("reload");
        let papa = fx.spooler.registry().printer(PrinterId(1));
        assert!(papa.deleted);
        assert_eq!(papa.status, PrinterStatus::Deleted);
        assert!(change_log(&fx).contains("PRNDELETE papa\n"));
    }

    #[test]
    fn new_group_is_loaded_on_notice() {
        let mut fx = fixture(&[("p1", ""), ("p2", "")], &[]);
        crate::testutil::write_group(fx.spooler.config(), "duo", "Printer: p1\nPrinter: p2\n");
        fx.spooler.handle_fifo_line("NG duo").expect("reload");
        let group = fx.spooler.registry().group_by_name("duo").expect("group");
        assert_eq!(
            fx.spooler.registry().group(group).members,
            vec![PrinterId(0), PrinterId(1)]
        );
        assert!(change_log(&fx).contains("GRPRELOAD duo\n"));
    }
}
