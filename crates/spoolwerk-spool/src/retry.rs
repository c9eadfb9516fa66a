// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Driver exit classification and fault backoff.
//
// A driver's exit is classified into what happens to the printer next:
// back to idle, into timed retry after a fault, permanently faulted until an
// operator restarts it, engaged elsewhere, or starved of resources.

use spoolwerk_core::config::{BackoffShape, SchedulingConfig};
use spoolwerk_core::types::{DriverExit, PrinterStatus};

use crate::supervisor::ExitOutcome;

/// What the printer does after its driver exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrinterDisposition {
    /// Ready for the next job.
    Idle,
    /// Faulted; retry automatically after a countdown.
    RetryFault,
    /// Faulted; stays down until started by an operator.
    PermanentFault,
    /// Busy for someone else; retry after a short fixed wait.
    Engaged,
    /// Out of resources; wait for starvation relief.
    Starved,
}

/// Turn a raw process exit into a driver result.
///
/// A core dump means the driver itself is broken, so the printer is not
/// retried.  Any other signal is reported as [`DriverExit::Signal`].
pub fn classify_exit(outcome: ExitOutcome) -> DriverExit {
    match outcome {
        ExitOutcome::Code(code) => DriverExit::from_code(code),
        ExitOutcome::Signaled {
            core_dumped: true, ..
        } => DriverExit::PrinterErrorNoRetry,
        ExitOutcome::Signaled { .. } => DriverExit::Signal,
    }
}

/// Decide the printer's next state.  `status` is the printer status at the
/// time the driver exited.
pub fn printer_disposition(exit: DriverExit, status: PrinterStatus) -> PrinterDisposition {
    match exit {
        DriverExit::Printed | DriverExit::JobError | DriverExit::Incapable => {
            PrinterDisposition::Idle
        }
        // We killed it ourselves.
        DriverExit::Signal
            if matches!(
                status,
                PrinterStatus::Halting | PrinterStatus::Seizing | PrinterStatus::Canceling
            ) =>
        {
            PrinterDisposition::Idle
        }
        DriverExit::Signal => PrinterDisposition::RetryFault,
        DriverExit::Engaged => PrinterDisposition::Engaged,
        DriverExit::Starved => PrinterDisposition::Starved,
        e if e.is_permanent_fault() => PrinterDisposition::PermanentFault,
        _ => PrinterDisposition::RetryFault,
    }
}

/// Seconds to wait before retrying a printer after its `attempts`th fault.
pub fn fault_countdown(config: &SchedulingConfig, attempts: i32) -> i32 {
    let scaled = attempts.saturating_mul(config.retry_multiplier);
    match config.backoff {
        BackoffShape::Floored => scaled.max(config.min_retry_interval),
        BackoffShape::Capped => scaled.min(config.min_retry_interval),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_dump_is_not_retried() {
        let exit = classify_exit(ExitOutcome::Signaled {
            signal: 11,
            core_dumped: true,
        });
        assert_eq!(exit, DriverExit::PrinterErrorNoRetry);
        assert_eq!(
            printer_disposition(exit, PrinterStatus::Printing),
            PrinterDisposition::PermanentFault
        );
    }

    #[test]
    fn signal_during_halt_is_expected() {
        let exit = classify_exit(ExitOutcome::Signaled {
            signal: 15,
            core_dumped: false,
        });
        assert_eq!(exit, DriverExit::Signal);
        assert_eq!(
            printer_disposition(exit, PrinterStatus::Halting),
            PrinterDisposition::Idle
        );
        assert_eq!(
            printer_disposition(exit, PrinterStatus::Printing),
            PrinterDisposition::RetryFault
        );
    }

    #[test]
    fn exit_codes_map_to_dispositions() {
        let cases = [
            (0, PrinterDisposition::Idle),
            (1, PrinterDisposition::RetryFault),
            (2, PrinterDisposition::PermanentFault),
            (3, PrinterDisposition::Idle),
            (5, PrinterDisposition::Engaged),
            (6, PrinterDisposition::Starved),
            (7, PrinterDisposition::PermanentFault),
            (8, PrinterDisposition::RetryFault),
            (11, PrinterDisposition::PermanentFault),
            (50, PrinterDisposition::Idle),
            (77, PrinterDisposition::RetryFault),
        ];
        for (code, expected) in cases {
            let exit = classify_exit(ExitOutcome::Code(code));
            assert_eq!(
                printer_disposition(exit, PrinterStatus::Printing),
                expected,
                "exit code {code}"
            );
        }
    }

    #[test]
    fn floored_backoff_never_drops_below_minimum() {
        let config = SchedulingConfig::default();
        assert_eq!(fault_countdown(&config, 1), 600);
        assert_eq!(fault_countdown(&config, 20), 600);
        assert_eq!(fault_countdown(&config, 25), 750);
    }

    #[test]
    fn capped_backoff_grows_to_the_cap() {
        let config = SchedulingConfig {
            backoff: BackoffShape::Capped,
            ..SchedulingConfig::default()
        };
        assert_eq!(fault_countdown(&config, 1), 30);
        assert_eq!(fault_countdown(&config, 3), 90);
        assert_eq!(fault_countdown(&config, 40), 600);
    }
}
