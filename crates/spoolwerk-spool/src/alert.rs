// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer fault alerts and operator reminders.
//
// Every fault is appended to the printer's alert log.  Whether a notice is
// mailed depends on the printer's signed alert interval: every Nth fault for
// positive N, only the |N|th fault (and later a recovery notice) for
// negative N, never for zero.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use chrono::Local;
use tracing::{debug, info, warn};

use spoolwerk_core::error::Result;
use spoolwerk_core::types::{PrinterId, PrinterStatus};

use crate::spooler::Spooler;
use crate::supervisor::{ChildInput, HelperKind, SpawnRequest};

/// An alert log untouched for this long is started afresh.
const ALERT_LOG_MAX_AGE: Duration = Duration::from_secs(3600);

/// The only delivery method the spooler implements.
const METHOD_MAIL: &str = "mail";

/// Whether the `attempts`th consecutive fault deserves a notice.  A count of
/// zero marks a fault that will not be retried, which is always reported.
pub fn failure_notice_due(interval: i32, attempts: i32) -> bool {
    if interval == 0 {
        return false;
    }
    attempts == 0
        || (interval < 0 && attempts == -interval)
        || (interval > 0 && attempts % interval == 0)
}

fn mail_header(node: &str, to: &str, subject: &str) -> String {
    format!("From: Spoolwerk Spooler on {node} <spoolwerk>\nTo: {to}\nSubject: {subject}\n\n")
}

/// Fault notice: headers and the printer's alert log.
pub fn failure_message(node: &str, to: &str, printer: &str, interval: i32, log: &str) -> String {
    let subject = if interval < 0 {
        format!("Faults on {printer} (first and final notice)")
    } else {
        format!("Faults on {printer}")
    };
    let mut text = mail_header(node, to, &subject);
    text.push_str(log);
    text
}

/// Recovery notice for a printer that failed `failures` times.
pub fn recovery_message(node: &str, to: &str, printer: &str, failures: i32) -> String {
    let mut text = mail_header(node, to, &format!("Recovery of {printer}"));
    text.push_str(&format!(
        "The printer \"{printer}\" which you were previously notified had\n\
         failed, has successfully printed a job.  Presumably it has recovered.\n\
         If there are further difficulties, you will be informed.\n\n"
    ));
    if failures == 1 {
        text.push_str("By the way, it only failed once before it printed the job.\n");
    } else {
        text.push_str(&format!(
            "By the way, it failed {failures} times before it finally printed the job.\n"
        ));
    }
    text
}

impl Spooler {
    fn alert_log_path(&self, prn: PrinterId) -> PathBuf {
        self.config
            .paths
            .alert_dir
            .join(&self.registry.printer(prn).name)
    }

    /// Append a line to a printer's alert log.  With `stamp`, the line
    /// opens a new alert and is preceded by a blank line and the time.
    pub(crate) fn alert(&mut self, prn: PrinterId, stamp: bool, message: &str) {
        let path = self.alert_log_path(prn);
        if let Err(e) = append_alert(&path, stamp, message) {
            warn!(path = %path.display(), error = %e, "alert log not written");
        }
        debug!(printer = %self.registry.printer(prn).name, message, "alert");
    }

    /// Mail a fault notice if this fault is one the printer wants reported.
    pub(crate) fn alert_printer_failed(&mut self, prn: PrinterId) {
        let printer = self.registry.printer(prn);
        let alert = printer.alert.clone();
        if alert.interval == 0 || !failure_notice_due(alert.interval, printer.next_error_retry) {
            return;
        }
        if alert.method != METHOD_MAIL {
            if alert.method != "none" {
                warn!(printer = %printer.name, method = %alert.method, "unsupported alert method");
            }
            return;
        }
        let log = match std::fs::read_to_string(self.alert_log_path(prn)) {
            Ok(log) => log,
            Err(e) => {
                warn!(printer = %printer.name, error = %e, "alert log unreadable");
                String::new()
            }
        };
        let text = failure_message(
            &self.config.node_name,
            &alert.address,
            &printer.name,
            alert.interval,
            &log,
        );
        if self.send_mail(&alert.address, text) {
            self.registry.printer_mut(prn).fault_notice_sent = true;
        }
    }

    /// A job got through.  Mail a recovery notice when the printer's policy
    /// asks for one and a fault notice went out.
    pub(crate) fn alert_printer_working(&mut self, prn: PrinterId) {
        let printer = self.registry.printer_mut(prn);
        let notified = std::mem::take(&mut printer.fault_notice_sent);
        let alert = printer.alert.clone();
        if alert.interval >= 0 || !notified || alert.method != METHOD_MAIL {
            return;
        }
        let text = recovery_message(
            &self.config.node_name,
            &alert.address,
            &printer.name,
            printer.next_error_retry,
        );
        self.send_mail(&alert.address, text);
    }

    /// Mail the operator a list of printers still in trouble.
    pub fn remind(&mut self) -> Result<()> {
        let scheduling = &self.config.scheduling;
        let mut report = String::new();
        for printer in self.registry.printers.iter().filter(|p| !p.deleted) {
            match printer.status {
                PrinterStatus::Fault => {
                    let limit = printer.alert.interval.abs();
                    if printer.next_error_retry == 0 {
                        report.push_str(&format!(
                            "The printer \"{}\" has suffered a fault from\n\
                             which it can not recover on its own.\n\n",
                            printer.name
                        ));
                    } else if printer.next_error_retry > limit {
                        report.push_str(&format!(
                            "The printer \"{}\" has suffered {} faults.\n\n",
                            printer.name, printer.next_error_retry
                        ));
                    }
                }
                PrinterStatus::Engaged => {
                    let minutes = printer.next_engaged_retry * scheduling.engaged_retry / 60;
                    if minutes > scheduling.engaged_nag_minutes {
                        report.push_str(&format!(
                            "The printer \"{}\" has been otherwise engaged or off line for {} minutes.\n\n",
                            printer.name, minutes
                        ));
                    }
                }
                _ => {}
            }
        }
        if report.is_empty() {
            debug!("no printer problems to report");
            return Ok(());
        }
        let to = self.config.operator_address.clone();
        let mut text = mail_header(&self.config.node_name, &to, "Remaining printer problems");
        text.push_str(&report);
        self.send_mail(&to, text);
        Ok(())
    }

    /// Hand a complete message to the mailer.  Returns whether it started.
    pub(crate) fn send_mail(&mut self, to: &str, text: String) -> bool {
        let request = SpawnRequest::new(&self.config.programs.mailer)
            .arg(to)
            .stdin(ChildInput::Bytes(text.into_bytes()));
        match self.launcher.spawn(request) {
            Ok(pid) => {
                self.children.add_helper(pid, HelperKind::Mailer);
                info!(to, pid, "mail sent");
                true
            }
            Err(e) => {
                warn!(to, error = %e, "mail not sent");
                false
            }
        }
    }
}

fn append_alert(path: &std::path::Path, stamp: bool, message: &str) -> Result<()> {
    let stale = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > ALERT_LOG_MAX_AGE);
    let mut options = OpenOptions::new();
    options.create(true);
    if stale {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    let mut file = options.open(path)?;
    if stamp {
        writeln!(file)?;
        writeln!(file, "{}", Local::now().format("%d %b %Y %H:%M:%S"))?;
    }
    writeln!(file, "{message}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fixture;

    #[test]
    fn notice_policy() {
        assert!(!failure_notice_due(0, 3));
        assert!(failure_notice_due(3, 0));
        assert!(failure_notice_due(3, 6));
        assert!(!failure_notice_due(3, 4));
        assert!(failure_notice_due(-2, 2));
        assert!(!failure_notice_due(-2, 4));
        assert!(failure_notice_due(-2, 0));
    }

    #[test]
    fn recovery_counts_failures() {
        let once = recovery_message("hydra", "ops", "laser1", 1);
        assert!(once.contains("it only failed once"));
        let many = recovery_message("hydra", "ops", "laser1", 4);
        assert!(many.starts_with("From: Spoolwerk Spooler on hydra <spoolwerk>\nTo: ops\n"));
        assert!(many.contains("it failed 4 times before it finally printed the job."));
    }

    #[test]
    fn alert_log_is_appended_and_stamped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("laser1");
        append_alert(&path, true, "Printer placed in auto-retry mode.").expect("append");
        append_alert(&path, false, "paper jam").expect("append");
        let text = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "");
        assert_eq!(lines[2], "Printer placed in auto-retry mode.");
        assert_eq!(lines[3], "paper jam");
    }

    #[test]
    fn reminder_lists_only_real_problems() {
        let mut fx = fixture(
            &[
                ("stuck", "Alert: 2 mail ops\n"),
                ("flaky", "Alert: 5 mail ops\n"),
                ("busy", ""),
                ("fine", ""),
            ],
            &[],
        );
        {
            let reg = &mut fx.spooler.registry;
            let stuck = reg.printer_mut(PrinterId(3));
            stuck.status = PrinterStatus::Fault;
            stuck.next_error_retry = 0;
            let flaky = reg.printer_mut(PrinterId(2));
            flaky.status = PrinterStatus::Fault;
            flaky.next_error_retry = 3;
            let busy = reg.printer_mut(PrinterId(0));
            busy.status = PrinterStatus::Engaged;
            busy.next_engaged_retry = 30;
        }
        fx.spooler.remind().expect("remind");
        let (_, request) = fx.launcher.spawned().pop().expect("mail");
        assert_eq!(request.args, vec!["root"]);
        let ChildInput::Bytes(body) = request.stdin else {
            panic!("mail without body");
        };
        let body = String::from_utf8(body).expect("utf8");
        assert!(body.contains("Subject: Remaining printer problems"));
        assert!(body.contains("\"stuck\" has suffered a fault from"));
        assert!(!body.contains("flaky"));
        assert!(body.contains("\"busy\" has been otherwise engaged or off line for 30 minutes."));
    }

    #[test]
    fn nothing_to_report_sends_nothing() {
        let mut fx = fixture(&[("fine", "")], &[]);
        fx.spooler.remind().expect("remind");
        assert!(fx.launcher.spawned().is_empty());
    }
}
