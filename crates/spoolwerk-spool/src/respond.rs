// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Telling users what became of their jobs.

use tracing::{debug, warn};

use spoolwerk_core::types::{JobKey, PrinterId, ResponseCode};

use crate::queue::JobName;
use crate::registry::Charge;
use crate::spooler::Spooler;
use crate::supervisor::{ChildInput, HelperKind, SpawnRequest};

/// Program name the responder sees as its caller.
const CALLER: &str = "spoolwerkd";

/// Hundredths as a decimal amount.
fn money(hundredths: i32) -> String {
    format!("{}.{:02}", hundredths / 100, hundredths % 100)
}

fn charge_args(charge: Option<Charge>) -> (String, String) {
    match charge {
        Some(c) => (money(c.duplex), money(c.simplex)),
        None => (String::new(), String::new()),
    }
}

impl Spooler {
    /// Run the responder for a queued job.
    pub(crate) fn respond(&mut self, key: &JobKey, code: ResponseCode, prn: Option<PrinterId>) {
        let name = self.job_name(key);
        self.respond_named(&name, code, prn);
    }

    /// Run the responder for a job by file name.  The queue file becomes
    /// its standard input, so this must happen before the file is removed.
    pub(crate) fn respond_named(&mut self, name: &JobName, code: ResponseCode, prn: Option<PrinterId>) {
        let (printer, charge) = match prn {
            Some(prn) => {
                let p = self.registry.printer(prn);
                (p.name.clone(), p.charge)
            }
            None => ("?".to_string(), None),
        };
        let (duplex, simplex) = charge_args(charge);
        let request = SpawnRequest::new(&self.config.programs.responder)
            .arg(CALLER)
            .arg(name.to_string())
            .arg(code.code().to_string())
            .arg(printer)
            .arg(duplex)
            .arg(simplex)
            .stdin(ChildInput::File(name.queue_file(&self.config.paths.queue_dir)));
        match self.launcher.spawn(request) {
            Ok(pid) => {
                self.children.add_helper(pid, HelperKind::Responder);
                debug!(job = %name, ?code, pid, "responder started");
            }
            Err(e) => warn!(job = %name, ?code, error = %e, "responder not started"),
        }
    }
}
