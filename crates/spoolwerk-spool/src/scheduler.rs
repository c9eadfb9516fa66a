// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scheduler: matching idle printers with waiting jobs.
//
// Starting a job spawns a driver for it; the driver's exit decides what
// happens to the job (finished, put back, arrested, stranded) and to the
// printer (idle, fault with retry countdown, engaged, starved).  The
// periodic tick counts retry timers down, ages priorities and releases
// starved printers one at a time.

use nix::sys::signal::Signal;
use tracing::{debug, info, instrument, warn};

use spoolwerk_core::error::Result;
use spoolwerk_core::types::{DestId, DriverExit, JobKey, JobStatus, PrinterId, PrinterStatus, ResponseCode};

use crate::retry::{PrinterDisposition, classify_exit, fault_countdown, printer_disposition};
use crate::spooler::Spooler;
use crate::supervisor::{ChildExit, Claimant, ExitOutcome, SpawnRequest};

/// Result of trying one printer for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// The printer is not idle.
    NotIdle,
    /// The printer can not take this job; another job might suit it.
    Unsuitable,
    /// Too many printers are active; the printer is now starved.
    Starved,
}

impl Spooler {
    // -----------------------------------------------------------------------
    // Starting jobs
    // -----------------------------------------------------------------------

    /// Start `key` on `prn` if the printer is idle and eligible for it.
    pub(crate) fn try_start(&mut self, prn: PrinterId, key: &JobKey) -> Result<StartOutcome> {
        if self.registry.printer(prn).status != PrinterStatus::Idle {
            return Ok(StartOutcome::NotIdle);
        }
        if let DestId::Group(group) = key.dest {
            if self.registry.group(group).held {
                return Ok(StartOutcome::Unsuitable);
            }
        }
        let Some(entry) = self.queue.get(key) else {
            return Ok(StartOutcome::Unsuitable);
        };
        if !entry.status.is_waiting() {
            return Ok(StartOutcome::Unsuitable);
        }
        let Some(bit) = self.registry.printer_bit(key.dest, prn) else {
            return Ok(StartOutcome::Unsuitable);
        };
        if (entry.never | entry.notnow) & bit != 0 {
            return Ok(StartOutcome::Unsuitable);
        }
        self.start_driver(prn, key)
    }

    /// Launch the driver, subject to the ceiling on active printers.
    fn start_driver(&mut self, prn: PrinterId, key: &JobKey) -> Result<StartOutcome> {
        let max = self.config.scheduling.max_active_printers;
        let printer = self.registry.printer(prn);
        // A printer just released from starvation may go ahead; any other
        // gives way while starved printers are waiting.
        let yield_to_starving = printer.previous_status != PrinterStatus::Starved
            && self.active_printers + self.starving_printers >= max;
        if self.active_printers >= max || yield_to_starving {
            debug!(printer = %printer.name, active = self.active_printers, "printer starved");
            self.set_printer_status(prn, PrinterStatus::Starved)?;
            return Ok(StartOutcome::Starved);
        }

        let pass = self.queue.get(key).map(|e| e.pass).unwrap_or(0);
        let request = SpawnRequest::new(&self.config.programs.driver)
            .arg(printer.name.clone())
            .arg(self.job_name(key).to_string())
            .arg(pass.to_string());
        let pid = match self.launcher.spawn(request) {
            Ok(pid) => pid,
            Err(e) => {
                warn!(printer = %printer.name, error = %e, "driver not started");
                let message = format!("Could not start driver: {e}");
                self.alert(prn, true, &message);
                self.set_printer_status(prn, PrinterStatus::Starved)?;
                return Ok(StartOutcome::Starved);
            }
        };

        self.active_printers += 1;
        self.children.add_driver(pid, prn);
        let printer = self.registry.printer_mut(prn);
        printer.driver = Some(pid);
        printer.job = Some(*key);
        if let DestId::Group(group) = key.dest {
            let offset = self.registry.member_offset(group, prn);
            self.registry.group_mut(group).last = offset;
        }
        info!(printer = %self.registry.printer(prn).name, job = %self.jobid(key), pid, "job started");
        self.set_printer_status(prn, PrinterStatus::Printing)?;
        self.set_job_status(key, JobStatus::Printing(prn))?;
        Ok(StartOutcome::Started)
    }

    /// An idle printer looks through the queue for a job it can print.
    pub(crate) fn look_for_work(&mut self, prn: PrinterId) -> Result<()> {
        if self.registry.printer(prn).status != PrinterStatus::Idle {
            return Ok(());
        }
        for key in self.queue.keys() {
            let waiting = self
                .queue
                .get(&key)
                .is_some_and(|e| e.status == JobStatus::Waiting);
            if !waiting || !self.registry.printer_serves(key.dest, prn) {
                continue;
            }
            if self.try_start(prn, &key)? != StartOutcome::Unsuitable {
                break;
            }
        }
        Ok(())
    }

    /// Offer a waiting job to the printers that could print it.  Group
    /// members are tried once each, starting after the member used last
    /// when the group rotates.
    pub(crate) fn try_suitable(&mut self, key: &JobKey) -> Result<()> {
        match key.dest {
            DestId::Printer(prn) => {
                self.try_start(prn, key)?;
            }
            DestId::Group(group) => {
                let group = self.registry.group(group);
                let members = group.members.clone();
                let mut cursor = if group.rotate { group.last } else { None };
                for _ in 0..members.len() {
                    let next = cursor.map_or(0, |i| (i + 1) % members.len());
                    cursor = Some(next);
                    if self.try_start(members[next], key)? == StartOutcome::Started {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Ask a printer's driver to stop.
    pub(crate) fn kill_driver(&mut self, prn: PrinterId) {
        let printer = self.registry.printer(prn);
        let Some(pid) = printer.driver else {
            return;
        };
        let name = printer.name.clone();
        if let Err(e) = self.launcher.signal(pid as i32, Signal::SIGTERM) {
            warn!(printer = %name, pid, error = %e, "cannot signal driver");
        }
    }

    // -----------------------------------------------------------------------
    // Child exits
    // -----------------------------------------------------------------------

    /// Route a terminated child to whoever started it.
    pub fn reap(&mut self, exit: ChildExit) -> Result<()> {
        self.with_lock(|s| match s.children.claim(exit.pid) {
            Some(Claimant::Driver(prn)) => s.driver_exited(prn, exit.outcome),
            Some(Claimant::Question(key)) => s.question_exited(&key, exit.outcome),
            Some(Claimant::Helper(kind)) => {
                if exit.outcome != ExitOutcome::Code(0) {
                    warn!(pid = exit.pid, ?kind, outcome = %exit.outcome, "helper failed");
                }
                Ok(())
            }
            None => {
                debug!(pid = exit.pid, "exit of unknown child");
                Ok(())
            }
        })
    }

    /// Act on a driver's exit: settle the job, then the printer.
    #[instrument(skip_all, fields(printer = %self.registry.printer(prn).name, outcome = %outcome))]
    pub(crate) fn driver_exited(&mut self, prn: PrinterId, outcome: ExitOutcome) -> Result<()> {
        self.active_printers = self.active_printers.saturating_sub(1);
        let printer = self.registry.printer_mut(prn);
        printer.driver = None;
        let running = printer.status;
        let Some(key) = printer.job.take() else {
            warn!("driver exited with no job recorded");
            return self.set_printer_status(prn, PrinterStatus::Idle);
        };

        if let ExitOutcome::Signaled {
            signal,
            core_dumped: true,
        } = outcome
        {
            let message = format!("Driver dumped core after signal {signal}.");
            self.alert(prn, true, &message);
        }

        let exit = classify_exit(outcome);
        let mut printed = false;
        let mut job_status = JobStatus::Waiting;
        let mut new_status = match printer_disposition(exit, running) {
            PrinterDisposition::Idle => {
                match exit {
                    DriverExit::Printed => {
                        printed = true;
                        self.registry.printer_mut(prn).cancel_job = false;
                        self.respond(&key, ResponseCode::Finished, Some(prn));
                        self.printer_recovered(prn);
                    }
                    DriverExit::JobError => {
                        job_status = JobStatus::Arrested;
                        self.respond(&key, ResponseCode::Arrested, Some(prn));
                        self.printer_recovered(prn);
                    }
                    DriverExit::Incapable => {
                        job_status = self.rule_out_printer(prn, &key);
                    }
                    _ => {}
                }
                PrinterStatus::Idle
            }
            PrinterDisposition::Engaged => {
                let retry = self.config.scheduling.engaged_retry;
                let printer = self.registry.printer_mut(prn);
                printer.next_engaged_retry += 1;
                printer.countdown = retry;
                PrinterStatus::Engaged
            }
            PrinterDisposition::Starved => PrinterStatus::Starved,
            PrinterDisposition::PermanentFault => {
                self.alert(prn, true, "Printer placed in fault mode, no auto-retry.");
                let printer = self.registry.printer_mut(prn);
                printer.next_error_retry = 0;
                printer.countdown = 0;
                PrinterStatus::Fault
            }
            PrinterDisposition::RetryFault => {
                if exit == DriverExit::Signal {
                    self.alert(prn, true, "Driver was killed by an unexpected signal.");
                }
                self.alert(prn, true, "Printer placed in auto-retry mode.");
                let printer = self.registry.printer_mut(prn);
                printer.next_error_retry += 1;
                printer.countdown =
                    fault_countdown(&self.config.scheduling, printer.next_error_retry);
                PrinterStatus::Fault
            }
        };

        if new_status == PrinterStatus::Fault {
            self.alert_printer_failed(prn);
        }

        let printer = self.registry.printer_mut(prn);
        if std::mem::take(&mut printer.hold_job) && !printed {
            job_status = JobStatus::Held;
        }
        let canceled = printer.cancel_job;
        if canceled {
            self.respond(&key, ResponseCode::CanceledPrinting, Some(prn));
        }
        if printed || canceled {
            self.discard_job(&key)?;
            self.registry.printer_mut(prn).cancel_job = false;
        } else if self.queue.get(&key).is_some() {
            self.set_job_status(&key, job_status)?;
            if job_status == JobStatus::Waiting {
                self.update_wait_reason(&key)?;
                // This printer still counts as busy, so another one gets it.
                self.try_suitable(&key)?;
            }
        }

        if matches!(
            self.registry.printer(prn).status,
            PrinterStatus::Stopping | PrinterStatus::Halting
        ) {
            new_status = PrinterStatus::Stopt;
        }
        self.set_printer_status(prn, new_status)?;
        if new_status == PrinterStatus::Idle {
            self.look_for_work(prn)?;
        }
        Ok(())
    }

    /// A driver reported the printer can never print this job.  Returns the
    /// job's next status.
    fn rule_out_printer(&mut self, prn: PrinterId, key: &JobKey) -> JobStatus {
        let Some(bit) = self.registry.printer_bit(key.dest, prn) else {
            return JobStatus::Waiting;
        };
        let all = self.registry.all_mask(key.dest);
        let Some(entry) = self.queue.get_mut(key) else {
            return JobStatus::Waiting;
        };
        entry.never |= bit;
        if !key.dest.is_group() {
            self.respond(key, ResponseCode::StrandedPrinterIncapable, Some(prn));
            return JobStatus::Stranded;
        }
        if entry.never != all {
            return JobStatus::Waiting;
        }
        entry.pass += 1;
        if entry.pass > 2 {
            self.respond(key, ResponseCode::StrandedGroupIncapable, None);
            return JobStatus::Stranded;
        }
        entry.never = 0;
        JobStatus::Waiting
    }

    /// A job printed or failed on its own merits, so the printer works.
    fn printer_recovered(&mut self, prn: PrinterId) {
        self.alert_printer_working(prn);
        let printer = self.registry.printer_mut(prn);
        printer.next_error_retry = 0;
        printer.next_engaged_retry = 0;
    }

    // -----------------------------------------------------------------------
    // Periodic tick
    // -----------------------------------------------------------------------

    /// Count down retry timers, age priorities, relieve starvation and
    /// resend due questions.
    pub fn tick(&mut self) -> Result<()> {
        self.with_lock(|s| s.tick_locked())
    }

    fn tick_locked(&mut self) -> Result<()> {
        let step = i32::try_from(self.config.scheduling.tick_interval).unwrap_or(i32::MAX);
        let printers: Vec<PrinterId> = self.registry.printer_ids().collect();
        for prn in printers {
            let printer = self.registry.printer_mut(prn);
            let counting = match printer.status {
                PrinterStatus::Fault => printer.next_error_retry != 0,
                PrinterStatus::Engaged => true,
                _ => false,
            };
            if !counting {
                continue;
            }
            printer.countdown -= step;
            if printer.countdown <= 0 {
                printer.countdown = 0;
                self.set_printer_status(prn, PrinterStatus::Idle)?;
                self.look_for_work(prn)?;
            }
        }

        self.upgrade_countdown = self.upgrade_countdown.saturating_sub(1);
        if self.upgrade_countdown == 0 {
            self.upgrade_countdown = self.config.scheduling.upgrade_interval_ticks.max(1);
            self.queue.age_priorities();
        }

        self.hungry_countdown -= step;
        if self.hungry_countdown <= 0 {
            self.hungry_countdown = self.config.scheduling.starvation_relief_interval;
            self.relieve_starvation()?;
        }

        self.question_tick()
    }

    /// Give starved printers another chance, round robin from where the
    /// last pass stopped.
    fn relieve_starvation(&mut self) -> Result<()> {
        let count = self.registry.printers.len();
        let max = self.config.scheduling.max_active_printers;
        let mut steps = 0;
        while self.starving_printers > 0 && self.active_printers < max && steps < count {
            if self.hungry_cursor >= count {
                self.hungry_cursor = 0;
            }
            let prn = PrinterId(self.hungry_cursor);
            if self.registry.printer(prn).status == PrinterStatus::Starved {
                debug!(printer = %self.registry.printer(prn).name, "starvation relief");
                self.set_printer_status(prn, PrinterStatus::Idle)?;
                self.look_for_work(prn)?;
            }
            self.hungry_cursor += 1;
            steps += 1;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use spoolwerk_core::types::GroupId;

    use super::*;
    use crate::supervisor::ChildInput;
    use crate::testutil::{Fixture, fixture, fixture_with, local_key, write_job};

    /// Announce a job the way a client would.
    fn announce(fx: &mut Fixture, dest: &str, id: i32, text: &str) {
        write_job(fx.spooler.config(), dest, id, text);
        fx.spooler
            .handle_fifo_line(&format!("j hydra {dest} {id} 0 hydra 20 0"))
            .expect("announce");
    }

    fn exit_code(fx: &mut Fixture, pid: u32, code: i32) {
        fx.spooler
            .reap(ChildExit {
                pid,
                outcome: ExitOutcome::Code(code),
            })
            .expect("reap");
    }

    fn driver_pid(fx: &Fixture) -> u32 {
        fx.launcher.last_pid_of("spoolwerk-driver").expect("driver spawned")
    }

    fn mails(fx: &Fixture) -> Vec<String> {
        fx.launcher
            .spawned()
            .into_iter()
            .filter(|(_, r)| r.program.ends_with("sendmail"))
            .map(|(_, r)| match r.stdin {
                ChildInput::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                other => panic!("mail without body: {other:?}"),
            })
            .collect()
    }

    #[test]
    fn printer_without_bins_starts_job_at_once() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        announce(&mut fx, "oscar", 41, "Media: A4\n");

        let key = local_key(DestId::Printer(PrinterId(0)), 41);
        let entry = fx.spooler.queue().get(&key).expect("queued");
        assert_eq!(entry.status, JobStatus::Printing(PrinterId(0)));
        assert_eq!(fx.spooler.registry().printer(PrinterId(0)).status, PrinterStatus::Printing);
        let (_, request) = fx.launcher.spawned().pop().expect("driver");
        assert_eq!(request.args, vec!["oscar", "hydra:oscar-41.0(hydra)", "0"]);
        assert_eq!(fx.spooler.active_printers(), 1);
    }

    #[test]
    fn group_rotation_starts_after_last_member() {
        let mut fx = fixture(
            &[("p1", ""), ("p2", ""), ("p3", "")],
            &[("triogroup", "Printer: p1\nPrinter: p2\nPrinter: p3\n")],
        );
        fx.spooler.registry.group_mut(GroupId(0)).last = Some(1);
        announce(&mut fx, "triogroup", 7, "");

        let (_, request) = fx.launcher.spawned().pop().expect("driver");
        assert_eq!(request.args[0], "p3");
        assert_eq!(fx.spooler.registry().group(GroupId(0)).last, Some(2));
    }

    #[test]
    fn group_without_rotation_always_starts_from_first_member() {
        let mut fx = fixture(
            &[("p1", ""), ("p2", "")],
            &[("duo", "Printer: p1\nPrinter: p2\nRotate: no\n")],
        );
        fx.spooler.registry.group_mut(GroupId(0)).last = Some(0);
        announce(&mut fx, "duo", 1, "");
        let (_, request) = fx.launcher.spawned().pop().expect("driver");
        assert_eq!(request.args[0], "p1");
    }

    #[test]
    fn busy_printer_does_not_look_for_work() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        announce(&mut fx, "oscar", 1, "");
        announce(&mut fx, "oscar", 2, "");
        let spawned = fx.launcher.spawned().len();
        let before = fx.spooler.registry().printer(PrinterId(0)).status_changed;

        fx.spooler
            .with_lock(|s| s.look_for_work(PrinterId(0)))
            .expect("look");
        assert_eq!(fx.launcher.spawned().len(), spawned);
        assert_eq!(fx.spooler.registry().printer(PrinterId(0)).status_changed, before);
        let second = local_key(DestId::Printer(PrinterId(0)), 2);
        assert_eq!(fx.spooler.queue().get(&second).expect("queued").status, JobStatus::Waiting);
    }

    #[test]
    fn finished_job_is_removed_and_printer_takes_the_next() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        announce(&mut fx, "oscar", 1, "");
        announce(&mut fx, "oscar", 2, "");
        let first = driver_pid(&fx);
        exit_code(&mut fx, first, 0);

        let queue_dir = fx.spooler.config().paths.queue_dir.clone();
        assert!(!queue_dir.join("hydra:oscar-1.0(hydra)").exists());
        assert_eq!(fx.spooler.queue().len(), 1);
        let second = local_key(DestId::Printer(PrinterId(0)), 2);
        assert_eq!(
            fx.spooler.queue().get(&second).expect("queued").status,
            JobStatus::Printing(PrinterId(0))
        );
        assert_eq!(
            fx.launcher.spawned_programs(),
            vec!["spoolwerk-driver", "spoolwerk-respond", "spoolwerk-driver"]
        );
    }

    #[test]
    fn job_error_arrests_the_job() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        announce(&mut fx, "oscar", 3, "");
        let pid = driver_pid(&fx);
        exit_code(&mut fx, pid, 3);

        let key = local_key(DestId::Printer(PrinterId(0)), 3);
        let entry = fx.spooler.queue().get(&key).expect("still queued");
        assert_eq!(entry.status, JobStatus::Arrested);
        assert!(entry.arrested_at.is_some());
        assert_eq!(fx.spooler.registry().printer(PrinterId(0)).status, PrinterStatus::Idle);
        let path = fx.spooler.queue_file(&key);
        let mode = std::os::unix::fs::PermissionsExt::mode(
            &std::fs::metadata(path).expect("stat").permissions(),
        );
        assert_eq!(mode & 0o001, 0o001);
    }

    #[test]
    fn incapable_member_is_ruled_out_and_job_moves_on() {
        let mut fx = fixture(
            &[("p1", ""), ("p2", "")],
            &[("duo", "Printer: p1\nPrinter: p2\n")],
        );
        announce(&mut fx, "duo", 5, "");
        let pid = driver_pid(&fx);
        exit_code(&mut fx, pid, 50);

        let key = local_key(DestId::Group(GroupId(0)), 5);
        let entry = fx.spooler.queue().get(&key).expect("queued");
        assert_eq!(entry.never, 0b01);
        assert_eq!(entry.status, JobStatus::Printing(PrinterId(1)));
    }

    #[test]
    fn incapable_direct_printer_strands_the_job() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        announce(&mut fx, "oscar", 6, "");
        let pid = driver_pid(&fx);
        exit_code(&mut fx, pid, 50);

        let key = local_key(DestId::Printer(PrinterId(0)), 6);
        assert_eq!(fx.spooler.queue().get(&key).expect("queued").status, JobStatus::Stranded);
        let (_, respond) = fx.launcher.spawned().pop().expect("responder");
        assert_eq!(respond.args[2], "9");
    }

    #[test]
    fn fault_notices_follow_negative_interval() {
        let mut fx = fixture_with(
            &[("laser1", "Alert: -2 mail ops@example.org\n")],
            &[],
            |config| {
                config.scheduling.retry_multiplier = 1;
                config.scheduling.min_retry_interval = 5;
            },
        );
        announce(&mut fx, "laser1", 1, "");
        for attempt in 1..=3 {
            let pid = driver_pid(&fx);
            exit_code(&mut fx, pid, 1);
            let printer = fx.spooler.registry().printer(PrinterId(0));
            assert_eq!(printer.status, PrinterStatus::Fault);
            assert_eq!(printer.next_error_retry, attempt);
            assert_eq!(printer.countdown, 5);
            let expected = if attempt >= 2 { 1 } else { 0 };
            assert_eq!(mails(&fx).len(), expected, "after failure {attempt}");
            fx.spooler.tick().expect("tick");
            assert_eq!(
                fx.spooler.registry().printer(PrinterId(0)).status,
                PrinterStatus::Printing
            );
        }
        assert!(mails(&fx)[0].contains("Subject: Faults on laser1 (first and final notice)"));

        let pid = driver_pid(&fx);
        exit_code(&mut fx, pid, 0);
        let sent = mails(&fx);
        assert_eq!(sent.len(), 2);
        assert!(sent[1].contains("Subject: Recovery of laser1"));
        assert!(sent[1].contains("it failed 3 times"));
        assert_eq!(fx.spooler.registry().printer(PrinterId(0)).next_error_retry, 0);
    }

    #[test]
    fn engaged_printer_retries_after_fixed_interval() {
        let mut fx = fixture_with(&[("oscar", "")], &[], |config| {
            config.scheduling.engaged_retry = 10;
        });
        announce(&mut fx, "oscar", 1, "");
        let pid = driver_pid(&fx);
        exit_code(&mut fx, pid, 5);
        assert_eq!(fx.spooler.registry().printer(PrinterId(0)).status, PrinterStatus::Engaged);

        fx.spooler.tick().expect("tick");
        assert_eq!(fx.spooler.registry().printer(PrinterId(0)).countdown, 5);
        fx.spooler.tick().expect("tick");
        assert_eq!(fx.spooler.registry().printer(PrinterId(0)).status, PrinterStatus::Printing);
    }

    #[test]
    fn active_ceiling_starves_and_relief_releases() {
        let mut fx = fixture_with(&[("a", ""), ("b", "")], &[], |config| {
            config.scheduling.max_active_printers = 1;
        });
        announce(&mut fx, "a", 1, "");
        announce(&mut fx, "b", 2, "");
        assert_eq!(fx.spooler.registry().printer(PrinterId(1)).status, PrinterStatus::Starved);
        assert_eq!(fx.spooler.starving_printers, 1);

        let pid = driver_pid(&fx);
        exit_code(&mut fx, pid, 0);
        // Printer b waits for the relief pass, not for printer a.
        assert_eq!(fx.spooler.active_printers(), 0);
        assert_eq!(fx.spooler.registry().printer(PrinterId(1)).status, PrinterStatus::Starved);
        fx.spooler.tick().expect("tick");
        assert_eq!(fx.spooler.registry().printer(PrinterId(1)).status, PrinterStatus::Printing);
        assert_eq!(fx.spooler.starving_printers, 0);
    }

    #[test]
    fn halted_driver_leaves_printer_stopped_and_job_waiting() {
        let mut fx = fixture(&[("oscar", "")], &[]);
        announce(&mut fx, "oscar", 1, "");
        let pid = driver_pid(&fx);
        fx.spooler
            .with_lock(|s| s.set_printer_status(PrinterId(0), PrinterStatus::Halting))
            .expect("halting");
        fx.spooler
            .reap(ChildExit {
                pid,
                outcome: ExitOutcome::Signaled {
                    signal: 15,
                    core_dumped: false,
                },
            })
            .expect("reap");

        assert_eq!(fx.spooler.registry().printer(PrinterId(0)).status, PrinterStatus::Stopt);
        let key = local_key(DestId::Printer(PrinterId(0)), 1);
        assert_eq!(fx.spooler.queue().get(&key).expect("queued").status, JobStatus::Waiting);
    }

    #[test]
    fn priorities_age_every_upgrade_interval() {
        let mut fx = fixture_with(&[("oscar", "")], &[], |config| {
            config.scheduling.upgrade_interval_ticks = 2;
        });
        fx.spooler
            .with_lock(|s| s.set_printer_status(PrinterId(0), PrinterStatus::Stopt))
            .expect("stop");
        announce(&mut fx, "oscar", 1, "");
        fx.spooler.tick().expect("tick");
        assert_eq!(fx.spooler.queue().entries()[0].priority, 20);
        fx.spooler.tick().expect("tick");
        assert_eq!(fx.spooler.queue().entries()[0].priority, 19);
    }
}
