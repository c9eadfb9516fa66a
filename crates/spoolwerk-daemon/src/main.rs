// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// spoolwerkd: the Spoolwerk print spooler daemon.
//
// Loads the configuration, rotates the log, detaches from the terminal
// unless told to stay in the foreground, then runs the event loop on a
// current-thread Tokio runtime until SIGTERM or SIGINT.  `--stop` asks a
// running daemon to shut down and waits for it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use spoolwerk_core::config::SpoolConfig;
use spoolwerk_core::error::SpoolError;

/// Configuration file read when `--config` is not given.
const DEFAULT_CONFIG: &str = "/etc/spoolwerk/spoolwerk.json";

/// How long `--stop` waits for the lock file to disappear.
const STOP_WAIT: Duration = Duration::from_secs(60);

/// Spooler daemon command line.
#[derive(Parser, Debug)]
#[command(name = "spoolwerkd", version)]
#[command(about = "Spoolwerk print spooler daemon")]
struct Args {
    /// Stay attached to the terminal and log to standard error
    #[arg(long)]
    foreground: bool,

    /// Configuration file (JSON); a missing file means defaults
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Stop the running daemon and wait for it to exit
    #[arg(long)]
    stop: bool,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Log to the configured file through a background writer.  The guard
/// flushes on drop and must outlive the daemon.
fn init_file_logging(log_file: &Path) -> Option<WorkerGuard> {
    let dir = log_file.parent().unwrap_or_else(|| Path::new("."));
    let name = log_file.file_name()?;
    let appender = tracing_appender::rolling::never(dir, name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}

/// Keep one previous log as `<log>.old`.
fn rotate_log(log_file: &Path) {
    let mut old = log_file.as_os_str().to_owned();
    old.push(".old");
    match std::fs::rename(log_file, &old) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => eprintln!("spoolwerkd: cannot rotate {}: {e}", log_file.display()),
    }
}

fn stop(config: &SpoolConfig) -> ExitCode {
    init_stderr_logging();
    match spoolwerk_spool::stop_daemon(&config.paths.lock_file, STOP_WAIT) {
        Ok(()) => {
            info!("spooler stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "stop failed");
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match SpoolConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("spoolwerkd: {}: {e}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    if args.stop {
        return stop(&config);
    }

    rotate_log(&config.paths.log_file);

    // Detach before the runtime exists: its threads would not survive the fork.
    let _guard = if args.foreground {
        init_stderr_logging();
        None
    } else {
        if let Err(e) = nix::unistd::daemon(true, false) {
            eprintln!("spoolwerkd: cannot detach: {e}");
            return ExitCode::FAILURE;
        }
        init_file_logging(&config.paths.log_file)
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        node = %config.node_name,
        "spoolwerkd starting"
    );

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "cannot build runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(spoolwerk_spool::run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(SpoolError::AlreadyRunning(pid)) => {
            warn!(pid, "spooler already running");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "spooler exiting");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_defaults() {
        let args = Args::parse_from(["spoolwerkd"]);
        assert!(!args.foreground);
        assert!(!args.stop);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG));

        let args = Args::parse_from(["spoolwerkd", "--foreground", "--config", "/tmp/s.json"]);
        assert!(args.foreground);
        assert_eq!(args.config, PathBuf::from("/tmp/s.json"));
    }

    #[test]
    fn rotation_keeps_one_old_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("spoolwerkd.log");
        std::fs::write(&log, "first run\n").expect("log");
        rotate_log(&log);
        assert!(!log.exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("spoolwerkd.log.old")).expect("old log"),
            "first run\n"
        );
        rotate_log(&log);
        assert!(dir.path().join("spoolwerkd.log.old").exists());
    }
}
