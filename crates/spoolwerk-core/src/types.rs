// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Spoolwerk print spooler.
//
// Entities live in arenas owned by the spooler and are addressed by small
// integer handles.  The numeric codes attached to the status enums are the
// ones written to reply files, state records and the change log, so they
// are part of the wire format and must not be renumbered.

use serde::{Deserialize, Serialize};

/// Handle into the node-name table.  The local node is always id 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    /// The node this spooler runs on.
    pub const LOCAL: NodeId = NodeId(0);
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle into the printer arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrinterId(pub usize);

impl std::fmt::Display for PrinterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle into the group arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub usize);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A destination a job can be addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestId {
    Printer(PrinterId),
    Group(GroupId),
}

impl DestId {
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }
}

/// Identity of a queued job.
///
/// Two entries never share a key.  `subid` is zero for ordinary jobs and
/// positive for the parts of a split job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub destnode: NodeId,
    pub dest: DestId,
    pub id: i32,
    pub subid: i32,
    pub homenode: NodeId,
}

/// Status of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting for a printer to become free.
    Waiting,
    /// Put on hold by an operator.
    Held,
    /// No candidate printer has the required media mounted.
    WaitingForMedia,
    /// Held automatically after a job error.
    Arrested,
    /// Cancel requested while printing; waiting for the driver to exit.
    Canceling,
    /// Hold requested while printing; waiting for the driver to exit.
    Seizing,
    /// No printer can ever print it.
    Stranded,
    /// Being printed on the given printer.
    Printing(PrinterId),
}

impl JobStatus {
    /// Numeric code used in listings: non-negative means printing on that
    /// printer, negative values name the other states.
    pub fn code(&self) -> i32 {
        match self {
            Self::Waiting => -1,
            Self::Held => -2,
            Self::WaitingForMedia => -3,
            Self::Arrested => -4,
            Self::Canceling => -5,
            Self::Seizing => -6,
            Self::Stranded => -7,
            Self::Printing(prn) => prn.0 as i32,
        }
    }

    /// Text used in `JST` change-log lines for non-printing states.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting for printer",
            Self::Held => "held",
            Self::WaitingForMedia => "waiting for media",
            Self::Arrested => "arrested",
            Self::Canceling => "being canceled",
            Self::Seizing => "being seized",
            Self::Stranded => "stranded",
            Self::Printing(_) => "printing",
        }
    }

    pub fn printer(&self) -> Option<PrinterId> {
        match self {
            Self::Printing(prn) => Some(*prn),
            _ => None,
        }
    }

    /// Waiting in either of its two visible forms.
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting | Self::WaitingForMedia)
    }
}

/// Runtime status of a printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrinterStatus {
    Idle,
    Printing,
    Canceling,
    Seizing,
    /// Waiting for automatic retry after a fault.
    Fault,
    /// Busy printing for somebody else.
    Engaged,
    /// Held back because too many printers are active.
    Starved,
    /// Stopped by an operator.
    Stopt,
    /// Will stop when the current job ends.
    Stopping,
    /// Driver being killed, will stop.
    Halting,
    Deleted,
}

impl PrinterStatus {
    pub fn code(&self) -> i32 {
        match self {
            Self::Idle => 0,
            Self::Printing => 1,
            Self::Canceling => 2,
            Self::Seizing => 3,
            Self::Fault => 4,
            Self::Engaged => 5,
            Self::Starved => 6,
            Self::Stopt => 7,
            Self::Stopping => 8,
            Self::Halting => 9,
            Self::Deleted => 10,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Idle,
            1 => Self::Printing,
            2 => Self::Canceling,
            3 => Self::Seizing,
            4 => Self::Fault,
            5 => Self::Engaged,
            6 => Self::Starved,
            7 => Self::Stopt,
            8 => Self::Stopping,
            9 => Self::Halting,
            10 => Self::Deleted,
            _ => return None,
        })
    }

    /// Administratively down (or on the way down).
    pub fn is_stopped(&self) -> bool {
        self.code() >= Self::Stopt.code()
    }

    /// A driver process is running for this printer.
    pub fn has_driver(&self) -> bool {
        matches!(
            self,
            Self::Printing | Self::Canceling | Self::Seizing | Self::Stopping | Self::Halting
        )
    }

    /// Keyword used in change-log lines.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Printing => "printing",
            Self::Canceling => "canceling",
            Self::Seizing => "seizing",
            Self::Fault => "fault",
            Self::Engaged => "engaged",
            Self::Starved => "starved",
            Self::Stopt => "stopt",
            Self::Stopping => "stopping",
            Self::Halting => "halting",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for PrinterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Result reported by a print driver through its exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverExit {
    Printed,
    PrinterError,
    PrinterErrorNoRetry,
    JobError,
    Signal,
    Engaged,
    Starved,
    NoRetryAccessDenied,
    NotResponding,
    NoRetryBadSettings,
    NoSuchAddress,
    NoRetryNoSuchAddress,
    Incapable,
}

impl DriverExit {
    /// Map a driver exit code.  Unknown codes are treated as printer errors.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Printed,
            1 => Self::PrinterError,
            2 => Self::PrinterErrorNoRetry,
            3 => Self::JobError,
            4 => Self::Signal,
            5 => Self::Engaged,
            6 => Self::Starved,
            7 => Self::NoRetryAccessDenied,
            8 => Self::NotResponding,
            9 => Self::NoRetryBadSettings,
            10 => Self::NoSuchAddress,
            11 => Self::NoRetryNoSuchAddress,
            50 => Self::Incapable,
            _ => Self::PrinterError,
        }
    }

    /// Fault that puts the printer into automatic retry.
    pub fn is_retryable_fault(&self) -> bool {
        matches!(
            self,
            Self::PrinterError | Self::NotResponding | Self::NoSuchAddress
        )
    }

    /// Fault that leaves the printer down until an operator intervenes.
    pub fn is_permanent_fault(&self) -> bool {
        matches!(
            self,
            Self::PrinterErrorNoRetry
                | Self::NoRetryAccessDenied
                | Self::NoRetryBadSettings
                | Self::NoRetryNoSuchAddress
        )
    }
}

/// Outcome code passed to the responder to tell a user what happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Finished,
    Arrested,
    Canceled,
    CanceledPrinting,
    CanceledBadDest,
    CanceledRejecting,
    StrandedPrinterIncapable,
    StrandedGroupIncapable,
}

impl ResponseCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::Finished => 0,
            Self::Arrested => 1,
            Self::Canceled => 2,
            Self::CanceledPrinting => 3,
            Self::CanceledBadDest => 4,
            Self::CanceledRejecting => 5,
            Self::StrandedPrinterIncapable => 9,
            Self::StrandedGroupIncapable => 10,
        }
    }
}

/// First line of every secondary-command reply file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    OkData,
    Ok,
    BadDest,
    BadJob,
    BadBin,
    PrinterOnly,
    CantWait,
    Already,
    Internal,
    NotPossible,
}

impl ReplyCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::OkData => -1,
            Self::Ok => 0,
            Self::BadDest => 1,
            Self::BadJob => 2,
            Self::BadBin => 3,
            Self::PrinterOnly => 6,
            Self::CantWait => 7,
            Self::Already => 8,
            Self::Internal => 10,
            Self::NotPossible => 22,
        }
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printing_status_code_is_printer_id() {
        assert_eq!(JobStatus::Printing(PrinterId(3)).code(), 3);
        assert_eq!(JobStatus::Waiting.code(), -1);
        assert_eq!(JobStatus::Stranded.code(), -7);
    }

    #[test]
    fn printer_status_codes_round_trip() {
        for code in 0..=10 {
            let status = PrinterStatus::from_code(code).expect("known code");
            assert_eq!(status.code(), code);
        }
        assert!(PrinterStatus::from_code(11).is_none());
    }

    #[test]
    fn stopped_covers_stopt_stopping_halting() {
        assert!(PrinterStatus::Stopt.is_stopped());
        assert!(PrinterStatus::Stopping.is_stopped());
        assert!(PrinterStatus::Halting.is_stopped());
        assert!(!PrinterStatus::Fault.is_stopped());
        assert!(!PrinterStatus::Starved.is_stopped());
    }

    #[test]
    fn unknown_driver_exit_is_printer_error() {
        assert_eq!(DriverExit::from_code(99), DriverExit::PrinterError);
        assert_eq!(DriverExit::from_code(50), DriverExit::Incapable);
        assert!(DriverExit::NotResponding.is_retryable_fault());
        assert!(DriverExit::NoRetryBadSettings.is_permanent_fault());
    }
}
