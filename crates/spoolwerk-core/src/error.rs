// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Spoolwerk.

use thiserror::Error;

/// Top-level error type for all Spoolwerk operations.
#[derive(Debug, Error)]
pub enum SpoolError {
    // -- Startup errors --
    #[error("startup failed: {0}")]
    Startup(String),

    #[error("spooler already running (pid {0})")]
    AlreadyRunning(i32),

    #[error("cannot read destination directory {path}: {reason}")]
    DestinationDir { path: String, reason: String },

    #[error("cannot read queue directory {path}: {reason}")]
    QueueDir { path: String, reason: String },

    // -- Destination errors --
    #[error("no such destination: {0}")]
    UnknownDestination(String),

    #[error("bad configuration in {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("too many {kind} (limit {limit})")]
    TooMany { kind: &'static str, limit: usize },

    // -- Queue errors --
    #[error("queue array overflow at {0} entries")]
    QueueOverflow(usize),

    #[error("job {id}.{subid} is already queued")]
    DuplicateJob { id: i32, subid: i32 },

    #[error("malformed queue file name: {0}")]
    BadJobName(String),

    // -- Process supervision --
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("failed to signal process {pid}: {reason}")]
    Signal { pid: i32, reason: String },

    // -- Protocol errors --
    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("IPP request failed: {0}")]
    Ipp(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Internal consistency --
    #[error("internal consistency failure: {0}")]
    Internal(String),
}

impl SpoolError {
    /// Whether this error must bring the daemon down.
    ///
    /// Malformed commands, one bad destination file and transient I/O on a
    /// single job are contained by their callers; the variants listed here
    /// mean the engine can no longer trust its own tables or never got them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Startup(_)
                | Self::AlreadyRunning(_)
                | Self::DestinationDir { .. }
                | Self::QueueDir { .. }
                | Self::Internal(_)
        )
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SpoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_and_startup_errors_are_fatal() {
        assert!(SpoolError::Internal("lock".into()).is_fatal());
        assert!(SpoolError::AlreadyRunning(42).is_fatal());
        assert!(
            SpoolError::DestinationDir {
                path: "/x".into(),
                reason: "gone".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn command_and_job_errors_are_contained() {
        assert!(!SpoolError::MalformedCommand("zz".into()).is_fatal());
        assert!(!SpoolError::QueueOverflow(10000).is_fatal());
        assert!(!SpoolError::DuplicateJob { id: 7, subid: 0 }.is_fatal());
        assert!(!SpoolError::UnknownDestination("nope".into()).is_fatal());
    }

    #[test]
    fn messages_carry_detail() {
        let err = SpoolError::TooMany {
            kind: "printers",
            limit: 250,
        };
        assert_eq!(err.to_string(), "too many printers (limit 250)");
    }
}
