// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The daemon lock file: an exclusive `flock` plus the daemon's pid.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use spoolwerk_core::error::{Result, SpoolError};

/// How often `stop_daemon` looks for the lock file to go away.
const STOP_POLL: Duration = Duration::from_millis(250);

/// Held for the life of the daemon.  Dropping it releases the lock but
/// leaves the file; [`LockFile::release`] removes it.
pub struct LockFile {
    path: PathBuf,
    file: Flock<File>,
}

impl LockFile {
    /// Take the lock and record our pid.  A lock held by another process
    /// means a daemon is already running.
    pub fn acquire(path: &Path) -> Result<Self> {
        let startup = |reason: String| SpoolError::Startup(format!("lock file {}: {reason}", path.display()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| startup(e.to_string()))?;

        let mut file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((mut file, Errno::EAGAIN)) => {
                let pid = read_pid_from(&mut file).unwrap_or(0);
                return Err(SpoolError::AlreadyRunning(pid));
            }
            Err((_, errno)) => return Err(startup(errno.to_string())),
        };

        file.set_len(0)?;
        file.rewind()?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;
        debug!(path = %path.display(), "lock file taken");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Remove the lock file on clean shutdown.
    pub fn release(self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "lock file not removed");
        }
        drop(self.file);
    }
}

fn read_pid_from(file: &mut File) -> Option<i32> {
    let mut text = String::new();
    file.read_to_string(&mut text).ok()?;
    text.trim().parse().ok().filter(|pid| *pid > 0)
}

/// The pid recorded in a lock file, if it names one.
pub fn read_pid(path: &Path) -> Result<Option<i32>> {
    match File::open(path) {
        Ok(mut file) => Ok(read_pid_from(&mut file)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Ask a running daemon to stop and wait up to `wait` for its lock file to
/// disappear.
pub fn stop_daemon(path: &Path, wait: Duration) -> Result<()> {
    let pid = read_pid(path)?.ok_or_else(|| SpoolError::Startup(format!("spooler not running ({} absent)", path.display())))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(|e| SpoolError::Signal {
        pid,
        reason: e.to_string(),
    })?;
    info!(pid, "stop requested");

    let deadline = Instant::now() + wait;
    while path.exists() {
        if Instant::now() >= deadline {
            return Err(SpoolError::Startup(format!(
                "spooler (pid {pid}) did not shut down within {} s",
                wait.as_secs()
            )));
        }
        std::thread::sleep(STOP_POLL);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_reports_the_holder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("spoolwerkd.lock");
        let lock = LockFile::acquire(&path).expect("first lock");
        let me = i32::try_from(std::process::id()).expect("pid fits");
        assert_eq!(read_pid(&path).expect("read"), Some(me));

        match LockFile::acquire(&path) {
            Err(SpoolError::AlreadyRunning(pid)) => assert_eq!(pid, me),
            Err(e) => panic!("expected AlreadyRunning, got {e}"),
            Ok(_) => panic!("second lock granted"),
        }

        lock.release();
        assert!(!path.exists());
        LockFile::acquire(&path).expect("lock after release").release();
    }

    #[test]
    fn stale_file_is_taken_over() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("spoolwerkd.lock");
        std::fs::write(&path, "99999999\nleftover\n").expect("stale");
        let lock = LockFile::acquire(&path).expect("lock");
        assert_eq!(
            read_pid(&path).expect("read"),
            Some(i32::try_from(std::process::id()).expect("pid fits"))
        );
        lock.release();
    }

    #[test]
    fn stop_without_daemon_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("spoolwerkd.lock");
        assert_eq!(read_pid(&path).expect("read"), None);
        assert!(stop_daemon(&path, Duration::from_millis(10)).is_err());
    }
}
