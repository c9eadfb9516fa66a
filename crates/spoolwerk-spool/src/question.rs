// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Questions put to users about their jobs.
//
// A job whose queue file has both `Question:` and `Response:` lines is
// unanswered until the question line goes away.  A bounded number of
// questioner processes run at once, one per job; each exit schedules the
// next time the job is asked.

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use spoolwerk_core::error::Result;
use spoolwerk_core::types::JobKey;

use crate::queue::QueueFileInfo;
use crate::spooler::Spooler;
use crate::supervisor::{ExitOutcome, SpawnRequest};

/// Seconds before asking again after the user was reached.
const RESEND_AFTER_ASKED: i64 = 300;
/// Seconds before asking again after the questioner failed.
const RESEND_AFTER_FAILURE: i64 = 60;

impl Spooler {
    pub(crate) fn question_tick(&mut self) -> Result<()> {
        self.question_look_for_work()
    }

    /// Start questioners for due jobs while slots are free.  A walk that
    /// reaches the end of the queue refreshes the outstanding count.
    pub(crate) fn question_look_for_work(&mut self) -> Result<()> {
        if self.outstanding_questions == 0 {
            return Ok(());
        }
        let max = self.config.max_active_questions;
        let now = Utc::now();
        let mut unanswered = 0;
        let mut walked_all = true;
        for key in self.queue.keys() {
            if self.children.active_questions() >= max {
                walked_all = false;
                break;
            }
            let Some(entry) = self.queue.get(&key) else {
                continue;
            };
            let question = &entry.question;
            if !question.unanswered {
                continue;
            }
            unanswered += 1;
            if question.asking_now || question.resend_at.is_some_and(|at| at > now) {
                continue;
            }
            if !self.launch_question(&key) {
                unanswered -= 1;
            }
        }
        if walked_all {
            self.outstanding_questions = unanswered;
        }
        Ok(())
    }

    /// Ask a job's question.  Returns `false` when the job turned out to
    /// have no question left.
    fn launch_question(&mut self, key: &JobKey) -> bool {
        let name = self.job_name(key);
        let info = match QueueFileInfo::read(&self.queue_file(key)) {
            Ok(info) => info,
            Err(e) => {
                warn!(job = %name, error = %e, "cannot read question");
                self.schedule_question(key, RESEND_AFTER_FAILURE);
                return true;
            }
        };
        let (Some(question), Some(response)) = (info.question, info.response) else {
            if let Some(entry) = self.queue.get_mut(key) {
                entry.question.unanswered = false;
            }
            debug!(job = %name, "question answered");
            return false;
        };

        let request = SpawnRequest::new(&self.config.programs.questioner)
            .arg(response.responder)
            .arg(response.address)
            .arg(response.options)
            .arg(question)
            .arg(name.to_string());
        match self.launcher.spawn(request) {
            Ok(pid) => {
                self.children.add_question(pid, *key);
                if let Some(entry) = self.queue.get_mut(key) {
                    entry.question.asking_now = true;
                }
                debug!(job = %name, pid, "questioner started");
            }
            Err(e) => {
                warn!(job = %name, error = %e, "questioner not started");
                self.schedule_question(key, RESEND_AFTER_FAILURE);
            }
        }
        true
    }

    fn schedule_question(&mut self, key: &JobKey, seconds: i64) {
        if let Some(entry) = self.queue.get_mut(key) {
            entry.question.resend_at = Some(Utc::now() + Duration::seconds(seconds));
        }
    }

    /// A questioner finished; ask again later and fill the freed slot.
    pub(crate) fn question_exited(&mut self, key: &JobKey, outcome: ExitOutcome) -> Result<()> {
        let Some(entry) = self.queue.get_mut(key) else {
            debug!(id = key.id, "questioner exited for a job no longer queued");
            return self.question_look_for_work();
        };
        entry.question.asking_now = false;
        let delay = if outcome == ExitOutcome::Code(0) {
            RESEND_AFTER_ASKED
        } else {
            RESEND_AFTER_FAILURE
        };
        self.schedule_question(key, delay);
        self.question_look_for_work()
    }
}

#[cfg(test)]
mod tests {
    use spoolwerk_core::types::{DestId, PrinterId, PrinterStatus};

    use super::*;
    use crate::supervisor::ChildExit;
    use crate::testutil::{Fixture, fixture_with, local_key, write_job};

    const ASKING: &str = "Question: Print 400 pages?\nResponse: write alice -x\n";

    fn stopped_printer(max_questions: usize) -> Fixture {
        let mut fx = fixture_with(&[("oscar", "")], &[], |config| {
            config.max_active_questions = max_questions;
        });
        fx.spooler
            .with_lock(|s| s.set_printer_status(PrinterId(0), PrinterStatus::Stopt))
            .expect("stop");
        fx
    }

    fn announce(fx: &mut Fixture, id: i32, text: &str) {
        write_job(fx.spooler.config(), "oscar", id, text);
        fx.spooler
            .handle_fifo_line(&format!("j hydra oscar {id} 0 hydra 20 0"))
            .expect("announce");
    }

    #[test]
    fn question_is_asked_and_rescheduled() {
        let mut fx = stopped_printer(10);
        announce(&mut fx, 1, ASKING);
        let (pid, request) = fx.launcher.spawned().pop().expect("questioner");
        assert_eq!(
            request.args,
            vec!["write", "alice", "-x", "Print 400 pages?", "hydra:oscar-1.0(hydra)"]
        );
        let key = local_key(DestId::Printer(PrinterId(0)), 1);
        assert!(fx.spooler.queue().get(&key).expect("queued").question.asking_now);

        fx.spooler
            .reap(ChildExit {
                pid,
                outcome: ExitOutcome::Code(0),
            })
            .expect("reap");
        let question = &fx.spooler.queue().get(&key).expect("queued").question;
        assert!(!question.asking_now);
        let wait = question.resend_at.expect("resend time") - Utc::now();
        assert!(wait > Duration::seconds(290));
        // Not due yet.
        fx.spooler.tick().expect("tick");
        assert_eq!(fx.launcher.spawned().len(), 1);
    }

    #[test]
    fn concurrent_questioners_are_bounded() {
        let mut fx = stopped_printer(1);
        announce(&mut fx, 1, ASKING);
        announce(&mut fx, 2, ASKING);
        assert_eq!(fx.launcher.spawned_programs(), vec!["spoolwerk-question"]);
        assert_eq!(fx.spooler.outstanding_questions, 2);

        let pid = fx.launcher.last_pid_of("spoolwerk-question").expect("pid");
        fx.spooler
            .reap(ChildExit {
                pid,
                outcome: ExitOutcome::Code(1),
            })
            .expect("reap");
        let (_, request) = fx.launcher.spawned().pop().expect("second questioner");
        assert_eq!(request.args[4], "hydra:oscar-2.0(hydra)");
    }

    #[test]
    fn removed_question_counts_as_answered() {
        let mut fx = stopped_printer(10);
        write_job(fx.spooler.config(), "oscar", 1, ASKING);
        fx.spooler.recover_queue().expect("recover");
        let key = local_key(DestId::Printer(PrinterId(0)), 1);
        assert!(fx.spooler.queue().get(&key).expect("queued").question.unanswered);

        write_job(fx.spooler.config(), "oscar", 1, "Priority: 20\n");
        fx.spooler.tick().expect("tick");
        assert!(!fx.spooler.queue().get(&key).expect("queued").question.unanswered);
        assert_eq!(fx.spooler.outstanding_questions, 0);
        assert!(fx.launcher.spawned().is_empty());
    }
}
