// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Capped change log for queue viewers.
//
// Every state transition is appended as one line.  The file starts with a
// `SERIAL n` line; once `max_lines` entries have been written the file is
// marked stale (other-execute bit), removed and recreated with the next
// serial, and readers reopen when they see the mark or the serial change.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use spoolwerk_core::error::Result;

/// Mode of a live change log.
const LIVE_MODE: u32 = 0o644;
/// Mode given to a full log just before it is removed.
const STALE_MODE: u32 = LIVE_MODE | 0o001;

/// Append-only change log with rotation.
#[derive(Debug)]
pub struct ChangeLog {
    path: PathBuf,
    file: File,
    serial: u64,
    remaining: usize,
    max_lines: usize,
}

/// Serial of an existing log, or 0.
fn previous_serial(path: &Path) -> u64 {
    let Ok(file) = File::open(path) else {
        return 0;
    };
    let mut first = String::new();
    if BufReader::new(file).read_line(&mut first).is_err() {
        return 0;
    }
    first
        .strip_prefix("SERIAL ")
        .and_then(|n| n.trim().parse().ok())
        .unwrap_or(0)
}

fn start_file(path: &Path, serial: u64) -> Result<File> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .mode(LIVE_MODE)
        .open(path)?;
    writeln!(file, "SERIAL {serial}")?;
    Ok(file)
}

impl ChangeLog {
    /// Start a fresh log whose serial follows the one already on disk.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, max_lines: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let serial = previous_serial(&path) + 1;
        let file = start_file(&path, serial)?;
        debug!(serial, "change log started");
        Ok(Self {
            path,
            file,
            serial,
            remaining: max_lines.max(1),
            max_lines: max_lines.max(1),
        })
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Append one line.  Write failures are logged, never propagated.
    pub fn record(&mut self, line: &str) {
        if self.remaining == 0 {
            if let Err(e) = self.rotate() {
                warn!(error = %e, "change log rotation failed");
                return;
            }
        }
        if let Err(e) = writeln!(self.file, "{line}") {
            warn!(error = %e, line, "change log write failed");
            return;
        }
        self.remaining -= 1;
    }

    fn rotate(&mut self) -> Result<()> {
        let _ = self
            .file
            .set_permissions(std::fs::Permissions::from_mode(STALE_MODE));
        self.serial += 1;
        self.file = start_file(&self.path, self.serial)?;
        self.remaining = self.max_lines;
        debug!(serial = self.serial, "change log rotated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_log_continues_the_previous_serial() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state_update");
        std::fs::write(&path, "SERIAL 41\nSTARTUP\n").expect("write");

        let mut log = ChangeLog::open(&path, 10).expect("open");
        assert_eq!(log.serial(), 42);
        log.record("STARTUP");
        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text, "SERIAL 42\nSTARTUP\n");
    }

    #[test]
    fn log_is_recreated_after_the_line_cap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state_update");
        let mut log = ChangeLog::open(&path, 2).expect("open");
        log.record("PST a idle");
        log.record("PST b idle");
        log.record("PST c idle");

        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text, "SERIAL 2\nPST c idle\n");
        let mode = std::fs::metadata(&path).expect("stat").permissions().mode();
        assert_eq!(mode & 0o001, 0);
    }
}
