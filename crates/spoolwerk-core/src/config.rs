// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Daemon configuration.
//
// Loaded once at startup from a JSON file.  Every field has a default, so a
// file only needs to name what it changes and a missing file means "all
// defaults".

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/spoolwerk/spoolwerk.json";

/// Top-level daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    /// Name of this spooler node.  Jobs addressed to other nodes are refused.
    pub node_name: String,
    pub paths: SpoolPaths,
    pub programs: HelperPrograms,
    /// Comma separated `[address]:port` list for network listeners.
    pub listen: Option<String>,
    /// Where the `n` reminder command sends its mail.
    pub operator_address: String,
    pub scheduling: SchedulingConfig,
    pub queue: QueueConfig,
    /// Ceiling on concurrently running questioners.
    pub max_active_questions: usize,
    /// Lines written to the change log before it is recreated.
    pub changelog_max_lines: usize,
    /// Ceiling on configured network listeners.
    pub max_listeners: usize,
}

/// Files and directories used by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolPaths {
    pub printers_dir: PathBuf,
    pub groups_dir: PathBuf,
    pub queue_dir: PathBuf,
    pub data_dir: PathBuf,
    pub alert_dir: PathBuf,
    pub status_dir: PathBuf,
    pub mounted_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub fifo: PathBuf,
    pub control_socket: PathBuf,
    pub lock_file: PathBuf,
    pub log_file: PathBuf,
    pub state_db: PathBuf,
    pub change_log: PathBuf,
}

/// External helper programs the daemon spawns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperPrograms {
    pub driver: PathBuf,
    pub responder: PathBuf,
    pub questioner: PathBuf,
    pub mailer: PathBuf,
    pub listener: PathBuf,
}

/// How the fault retry countdown grows with the attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffShape {
    /// `max(minimum, attempts × multiplier)`.
    Floored,
    /// `min(minimum, attempts × multiplier)`, the minimum acting as a cap.
    Capped,
}

/// Timing constants for the scheduler.  All durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub tick_interval: u64,
    /// Ticks between priority upgrades of every queued job.
    pub upgrade_interval_ticks: u32,
    pub retry_multiplier: i32,
    pub min_retry_interval: i32,
    pub backoff: BackoffShape,
    pub engaged_retry: i32,
    pub max_active_printers: usize,
    pub starvation_relief_interval: i32,
    /// Minutes a printer may stay engaged before the reminder mentions it.
    pub engaged_nag_minutes: i32,
}

/// Sizing of the in-memory job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub initial_capacity: usize,
    pub grow_by: usize,
    pub ceiling: usize,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            tick_interval: 5,
            upgrade_interval_ticks: 20,
            retry_multiplier: 30,
            min_retry_interval: 600,
            backoff: BackoffShape::Floored,
            engaged_retry: 60,
            max_active_printers: 15,
            starvation_relief_interval: 5,
            engaged_nag_minutes: 20,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 200,
            grow_by: 50,
            ceiling: 10_000,
        }
    }
}

impl Default for SpoolPaths {
    fn default() -> Self {
        let spool = Path::new("/var/spool/spoolwerk");
        let conf = Path::new("/etc/spoolwerk");
        Self {
            printers_dir: conf.join("printers"),
            groups_dir: conf.join("groups"),
            queue_dir: spool.join("queue"),
            data_dir: spool.join("jobs"),
            alert_dir: spool.join("alerts"),
            status_dir: spool.join("status"),
            mounted_dir: spool.join("mounted"),
            temp_dir: PathBuf::from("/tmp"),
            fifo: spool.join("FIFO"),
            control_socket: spool.join("control.sock"),
            lock_file: spool.join("spoolwerkd.lock"),
            log_file: Path::new("/var/log/spoolwerk").join("spoolwerkd.log"),
            state_db: spool.join("state.db"),
            change_log: spool.join("state_update"),
        }
    }
}

impl Default for HelperPrograms {
    fn default() -> Self {
        let lib = Path::new("/usr/lib/spoolwerk");
        Self {
            driver: lib.join("spoolwerk-driver"),
            responder: lib.join("spoolwerk-respond"),
            questioner: lib.join("spoolwerk-question"),
            mailer: PathBuf::from("/usr/sbin/sendmail"),
            listener: lib.join("spoolwerk-listen"),
        }
    }
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            node_name: "localhost".into(),
            paths: SpoolPaths::default(),
            programs: HelperPrograms::default(),
            listen: None,
            operator_address: "root".into(),
            scheduling: SchedulingConfig::default(),
            queue: QueueConfig::default(),
            max_active_questions: 10,
            changelog_max_lines: 1000,
            max_listeners: 10,
        }
    }
}

impl SpoolConfig {
    /// Load the configuration file, falling back to defaults if it is absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// A configuration whose every path lives under `root`.
    pub fn rooted(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let paths = SpoolPaths {
            printers_dir: root.join("printers"),
            groups_dir: root.join("groups"),
            queue_dir: root.join("queue"),
            data_dir: root.join("jobs"),
            alert_dir: root.join("alerts"),
            status_dir: root.join("status"),
            mounted_dir: root.join("mounted"),
            temp_dir: root.join("tmp"),
            fifo: root.join("FIFO"),
            control_socket: root.join("control.sock"),
            lock_file: root.join("spoolwerkd.lock"),
            log_file: root.join("spoolwerkd.log"),
            state_db: root.join("state.db"),
            change_log: root.join("state_update"),
        };
        Self {
            paths,
            ..Self::default()
        }
    }

    /// Create every work directory the daemon writes into.
    pub fn ensure_directories(&self) -> Result<()> {
        let p = &self.paths;
        for dir in [
            &p.printers_dir,
            &p.groups_dir,
            &p.queue_dir,
            &p.data_dir,
            &p.alert_dir,
            &p.status_dir,
            &p.mounted_dir,
            &p.temp_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        for file in [&p.lock_file, &p.log_file, &p.state_db, &p.change_log] {
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = SpoolConfig::load(dir.path().join("absent.json")).expect("load");
        assert_eq!(cfg.scheduling.tick_interval, 5);
        assert_eq!(cfg.queue.initial_capacity, 200);
        assert_eq!(cfg.scheduling.backoff, BackoffShape::Floored);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("spoolwerk.json");
        std::fs::write(
            &path,
            r#"{ "node_name": "hydra", "scheduling": { "backoff": "capped", "engaged_retry": 90 } }"#,
        )
        .expect("write");

        let cfg = SpoolConfig::load(&path).expect("load");
        assert_eq!(cfg.node_name, "hydra");
        assert_eq!(cfg.scheduling.backoff, BackoffShape::Capped);
        assert_eq!(cfg.scheduling.engaged_retry, 90);
        assert_eq!(cfg.scheduling.retry_multiplier, 30);
        assert_eq!(cfg.changelog_max_lines, 1000);
    }

    #[test]
    fn rooted_config_creates_its_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = SpoolConfig::rooted(dir.path());
        cfg.ensure_directories().expect("ensure");
        assert!(cfg.paths.queue_dir.is_dir());
        assert!(cfg.paths.mounted_dir.is_dir());
        assert!(cfg.paths.lock_file.starts_with(dir.path()));
    }
}
