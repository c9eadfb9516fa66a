// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scratch spool trees for unit tests.

use std::path::Path;

use spoolwerk_core::config::SpoolConfig;
use spoolwerk_core::types::{DestId, JobKey, NodeId};

use crate::spooler::Spooler;
use crate::supervisor::RecordingLauncher;

/// Node name every fixture runs as.
pub(crate) const NODE: &str = "hydra";

pub(crate) struct Fixture {
    pub root: tempfile::TempDir,
    pub spooler: Spooler,
    pub launcher: RecordingLauncher,
}

/// A rooted configuration with its directories created.
pub(crate) fn config_in(root: &Path) -> SpoolConfig {
    let mut config = SpoolConfig::rooted(root);
    config.node_name = NODE.into();
    config.ensure_directories().expect("create spool tree");
    config
}

pub(crate) fn write_printer(config: &SpoolConfig, name: &str, text: &str) {
    std::fs::write(config.paths.printers_dir.join(name), text).expect("write printer");
}

pub(crate) fn write_group(config: &SpoolConfig, name: &str, text: &str) {
    std::fs::write(config.paths.groups_dir.join(name), text).expect("write group");
}

/// Drop a queue file for `dest-id.0` into the queue directory.
pub(crate) fn write_job(config: &SpoolConfig, dest: &str, id: i32, text: &str) -> String {
    let name = format!("{NODE}:{dest}-{id}.0({NODE})");
    std::fs::write(config.paths.queue_dir.join(&name), text).expect("write queue file");
    name
}

/// Build a spooler over a fresh tree with the given destinations.
pub(crate) fn fixture(printers: &[(&str, &str)], groups: &[(&str, &str)]) -> Fixture {
    fixture_with(printers, groups, |_| {})
}

/// Like [`fixture`], with a hook to adjust the configuration or seed files
/// before the spooler starts.
pub(crate) fn fixture_with(
    printers: &[(&str, &str)],
    groups: &[(&str, &str)],
    prepare: impl FnOnce(&mut SpoolConfig),
) -> Fixture {
    let root = tempfile::tempdir().expect("tempdir");
    let mut config = config_in(root.path());
    for (name, text) in printers {
        write_printer(&config, name, text);
    }
    for (name, text) in groups {
        write_group(&config, name, text);
    }
    prepare(&mut config);
    let launcher = RecordingLauncher::default();
    let spooler = Spooler::new(config, Box::new(launcher.clone())).expect("spooler");
    Fixture {
        root,
        spooler,
        launcher,
    }
}

/// Key of a local job with subid 0.
pub(crate) fn local_key(dest: DestId, id: i32) -> JobKey {
    JobKey {
        destnode: NodeId::LOCAL,
        dest,
        id,
        subid: 0,
        homenode: NodeId::LOCAL,
    }
}
