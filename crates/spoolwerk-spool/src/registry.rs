// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Destination registry: printers and groups of printers.
//
// Destinations are read from one configuration file each, found by scanning
// the printer and group configuration directories.  Both live in arenas
// addressed by `PrinterId` / `GroupId`.  A destination whose file vanishes is
// marked deleted rather than removed, so every id a queued job holds stays
// valid; a later destination reuses the deleted slot.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::{DestId, GroupId, JobKey, PrinterId, PrinterStatus};

use crate::media::MediumId;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

pub const MAX_PRINTERS: usize = 250;
pub const MAX_GROUPS: usize = 150;
pub const MAX_BINS: usize = 10;
pub const MAX_GROUP_SIZE: usize = 8;

/// Bin name that makes a printer pick media by itself.
pub const AUTOSELECT_BIN: &str = "AutoSelect";

// ---------------------------------------------------------------------------
// Destination records
// ---------------------------------------------------------------------------

/// Fault notification settings for a printer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertConfig {
    /// Positive N: every Nth fault.  Negative N: the |N|th fault only, plus
    /// a recovery notice.  Zero: never.
    pub interval: i32,
    pub method: String,
    pub address: String,
}

impl AlertConfig {
    pub fn is_disabled(&self) -> bool {
        self.interval == 0 || self.method.is_empty() || self.method == "none"
    }
}

/// Per-page charges, in hundredths of the currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charge {
    pub duplex: i32,
    pub simplex: i32,
}

/// An input bin and whatever is currently mounted in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    pub name: String,
    pub mounted: Option<MediumId>,
}

/// A printer: configuration plus runtime state.
#[derive(Debug, Clone)]
pub struct Printer {
    pub name: String,
    pub deleted: bool,
    pub accepting: bool,
    pub protect: bool,
    pub charge: Option<Charge>,
    pub alert: AlertConfig,
    pub bins: Vec<Bin>,
    pub autoselect: bool,

    pub status: PrinterStatus,
    pub previous_status: PrinterStatus,
    /// Consecutive faults since the last successful job.
    pub next_error_retry: i32,
    /// Consecutive "engaged" exits since the last successful job.
    pub next_engaged_retry: i32,
    /// Seconds until a faulted or engaged printer is tried again.
    pub countdown: i32,
    /// Process id of the running driver.
    pub driver: Option<u32>,
    /// Job the driver is printing.
    pub job: Option<JobKey>,
    /// Put the job on hold when the driver exits.
    pub hold_job: bool,
    /// Cancel the job when the driver exits.
    pub cancel_job: bool,
    /// Process waiting to hear that this printer has stopped.
    pub stop_waiter: Option<i32>,
    /// A fault notice went out, so a recovery notice is owed.
    pub fault_notice_sent: bool,
    pub status_changed: DateTime<Utc>,
}

/// A named group of printers.
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub deleted: bool,
    pub accepting: bool,
    pub held: bool,
    pub protect: bool,
    pub rotate: bool,
    /// Member printers.  A member's bit in job masks is its offset here.
    pub members: Vec<PrinterId>,
    /// Offset of the member most recently started.  Not persisted.
    pub last: Option<usize>,
    pub status_changed: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Configuration file parsing
// ---------------------------------------------------------------------------

/// The parts of a printer configuration file the spooler cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrinterConfig {
    pub alert: AlertConfig,
    pub bins: Vec<String>,
    pub charge: Option<Charge>,
}

/// The parts of a group configuration file the spooler cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    pub members: Vec<String>,
    pub rotate: bool,
    pub held: bool,
}

/// Iterate over `(keyword, value)` pairs, skipping comments and blanks.
fn config_lines(text: &str) -> impl Iterator<Item = (&str, &str)> {
    text.lines().filter_map(|line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            return None;
        }
        let (key, value) = line.split_once(':')?;
        Some((key.trim(), value.trim()))
    })
}

fn parse_yes_no(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Some(true),
        "no" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a money amount such as `0.10` into hundredths.
fn parse_money(text: &str) -> Option<i32> {
    let value: f64 = text.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * 100.0).round() as i32)
}

impl PrinterConfig {
    pub fn parse(name: &str, text: &str) -> Self {
        let mut config = Self::default();
        for (key, value) in config_lines(text) {
            match key {
                "Alert" => {
                    let mut parts = value.split_whitespace();
                    let interval = parts.next().and_then(|v| v.parse().ok());
                    match (interval, parts.next(), parts.next()) {
                        (Some(interval), Some(method), Some(address)) => {
                            config.alert = AlertConfig {
                                interval,
                                method: method.to_string(),
                                address: address.to_string(),
                            };
                        }
                        _ => warn!(printer = name, line = value, "bad Alert line ignored"),
                    }
                }
                "Bin" => {
                    if value.is_empty() {
                        continue;
                    }
                    if config.bins.len() >= MAX_BINS {
                        warn!(printer = name, bin = value, "too many bins, extra bin ignored");
                        continue;
                    }
                    config.bins.push(value.to_string());
                }
                "Charge" => {
                    let mut parts = value.split_whitespace();
                    let duplex = parts.next().and_then(parse_money);
                    let simplex = parts.next().and_then(parse_money);
                    match duplex {
                        Some(duplex) => {
                            config.charge = Some(Charge {
                                duplex,
                                simplex: simplex.unwrap_or(duplex),
                            })
                        }
                        None => warn!(printer = name, line = value, "bad Charge line ignored"),
                    }
                }
                _ => {}
            }
        }
        config
    }
}

impl GroupConfig {
    pub fn parse(name: &str, text: &str) -> Self {
        let mut config = Self {
            members: Vec::new(),
            rotate: true,
            held: false,
        };
        for (key, value) in config_lines(text) {
            match key {
                "Printer" => {
                    if config.members.len() >= MAX_GROUP_SIZE {
                        warn!(group = name, printer = value, "too many members, extra member ignored");
                        continue;
                    }
                    config.members.push(value.to_string());
                }
                "Rotate" => match parse_yes_no(value) {
                    Some(flag) => config.rotate = flag,
                    None => warn!(group = name, line = value, "bad Rotate line ignored"),
                },
                "Held" => match parse_yes_no(value) {
                    Some(flag) => config.held = flag,
                    None => warn!(group = name, line = value, "bad Held line ignored"),
                },
                _ => {}
            }
        }
        config
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// What a single-destination reload did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome<Id> {
    Created(Id),
    Reloaded(Id),
    Deleted(Id),
    /// Neither a configuration file nor a live record exists.
    Unknown,
}

/// The arenas of printers and groups.
#[derive(Debug, Default)]
pub struct Registry {
    pub printers: Vec<Printer>,
    pub groups: Vec<Group>,
}

/// Names of the destination files in `dir`, sorted.
fn scan_dir(dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| SpoolError::DestinationDir {
        path: dir.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') || name.ends_with('~') {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Read a destination file; `None` when it does not exist.
fn read_config(dir: &Path, name: &str) -> Result<Option<String>> {
    let path: PathBuf = dir.join(name);
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SpoolError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

impl Printer {
    fn new(name: &str, config: PrinterConfig) -> Self {
        let mut printer = Self {
            name: name.to_string(),
            deleted: false,
            accepting: true,
            protect: false,
            charge: None,
            alert: AlertConfig::default(),
            bins: Vec::new(),
            autoselect: false,
            status: PrinterStatus::Idle,
            previous_status: PrinterStatus::Idle,
            next_error_retry: 0,
            next_engaged_retry: 0,
            countdown: 0,
            driver: None,
            job: None,
            hold_job: false,
            cancel_job: false,
            stop_waiter: None,
            fault_notice_sent: false,
            status_changed: Utc::now(),
        };
        printer.apply_config(config);
        printer
    }

    /// Replace the configured attributes, keeping runtime state and any
    /// medium still mounted in a bin that survives.
    fn apply_config(&mut self, config: PrinterConfig) {
        let old_bins = std::mem::take(&mut self.bins);
        self.bins = config
            .bins
            .into_iter()
            .map(|name| {
                let mounted = old_bins
                    .iter()
                    .find(|b| b.name == name)
                    .and_then(|b| b.mounted);
                Bin { name, mounted }
            })
            .collect();
        self.autoselect = self.bins.iter().any(|b| b.name == AUTOSELECT_BIN);
        self.alert = config.alert;
        self.protect = config.charge.is_some();
        self.charge = config.charge;
    }
}

impl Group {
    fn new(name: &str, members: Vec<PrinterId>, config: &GroupConfig) -> Self {
        Self {
            name: name.to_string(),
            deleted: false,
            accepting: true,
            held: config.held,
            protect: false,
            rotate: config.rotate,
            members,
            last: None,
            status_changed: Utc::now(),
        }
    }
}

impl Registry {
    /// Load every printer and then every group.  Either directory being
    /// unreadable is fatal.
    #[instrument(skip_all, fields(printers = %printers_dir.display(), groups = %groups_dir.display()))]
    pub fn load(printers_dir: &Path, groups_dir: &Path) -> Result<Self> {
        let mut registry = Self::default();
        for name in scan_dir(printers_dir)? {
            if let Err(e) = registry.reload_printer(printers_dir, &name, &|_| false) {
                warn!(printer = %name, error = %e, "printer not loaded");
            }
        }
        for name in scan_dir(groups_dir)? {
            if let Err(e) = registry.reload_group(groups_dir, &name, &|_| false) {
                warn!(group = %name, error = %e, "group not loaded");
            }
        }
        info!(
            printers = registry.printers.len(),
            groups = registry.groups.len(),
            "destinations loaded"
        );
        Ok(registry)
    }

    /// Reparse one printer.  A vanished file marks the printer deleted.
    ///
    /// `in_use` tells whether any queued job still references a destination;
    /// such a deleted slot is never handed to a new printer.
    pub fn reload_printer(
        &mut self,
        dir: &Path,
        name: &str,
        in_use: &dyn Fn(DestId) -> bool,
    ) -> Result<ReloadOutcome<PrinterId>> {
        let existing = self.printer_by_name(name);
        let Some(text) = read_config(dir, name)? else {
            return Ok(match existing {
                Some(id) => {
                    let printer = &mut self.printers[id.0];
                    printer.deleted = true;
                    printer.status = PrinterStatus::Deleted;
                    info!(printer = name, "printer deleted");
                    ReloadOutcome::Deleted(id)
                }
                None => ReloadOutcome::Unknown,
            });
        };
        let config = PrinterConfig::parse(name, &text);

        if let Some(id) = existing {
            let printer = &mut self.printers[id.0];
            printer.apply_config(config);
            debug!(printer = name, "printer reloaded");
            return Ok(ReloadOutcome::Reloaded(id));
        }

        let printer = Printer::new(name, config);
        let reusable = |i: usize, p: &Printer| {
            p.deleted && p.driver.is_none() && !in_use(DestId::Printer(PrinterId(i)))
        };
        // A slot still listed by a live group only goes back to its own name.
        let slot = self
            .printers
            .iter()
            .enumerate()
            .position(|(i, p)| p.name == name && reusable(i, p))
            .or_else(|| {
                self.printers.iter().enumerate().position(|(i, p)| {
                    reusable(i, p) && self.groups_containing(PrinterId(i)).is_empty()
                })
            });
        let id = match slot {
            Some(slot) => {
                self.printers[slot] = printer;
                PrinterId(slot)
            }
            None if self.printers.len() >= MAX_PRINTERS => {
                return Err(SpoolError::TooMany {
                    kind: "printers",
                    limit: MAX_PRINTERS,
                });
            }
            None => {
                self.printers.push(printer);
                PrinterId(self.printers.len() - 1)
            }
        };
        debug!(printer = name, id = id.0, "printer created");
        Ok(ReloadOutcome::Created(id))
    }

    /// Reparse one group.  A vanished file marks the group deleted.
    pub fn reload_group(
        &mut self,
        dir: &Path,
        name: &str,
        in_use: &dyn Fn(DestId) -> bool,
    ) -> Result<ReloadOutcome<GroupId>> {
        let existing = self.group_by_name(name);
        let Some(text) = read_config(dir, name)? else {
            return Ok(match existing {
                Some(id) => {
                    self.groups[id.0].deleted = true;
                    info!(group = name, "group deleted");
                    ReloadOutcome::Deleted(id)
                }
                None => ReloadOutcome::Unknown,
            });
        };
        let config = GroupConfig::parse(name, &text);

        let mut members = Vec::with_capacity(config.members.len());
        for member in &config.members {
            match self.printer_by_name(member) {
                Some(id) => members.push(id),
                None => warn!(group = name, printer = %member, "group member does not exist"),
            }
        }
        let protect = members.iter().any(|m| self.printers[m.0].protect);

        if let Some(id) = existing {
            let group = &mut self.groups[id.0];
            if group.members != members {
                group.last = None;
            }
            group.members = members;
            group.rotate = config.rotate;
            group.protect = protect;
            debug!(group = name, "group reloaded");
            return Ok(ReloadOutcome::Reloaded(id));
        }

        let mut group = Group::new(name, members, &config);
        group.protect = protect;
        let reusable = |i: usize, g: &Group| g.deleted && !in_use(DestId::Group(GroupId(i)));
        let slot = self
            .groups
            .iter()
            .enumerate()
            .position(|(i, g)| g.name == name && reusable(i, g))
            .or_else(|| self.groups.iter().enumerate().position(|(i, g)| reusable(i, g)));
        let id = match slot {
            Some(slot) => {
                self.groups[slot] = group;
                GroupId(slot)
            }
            None if self.groups.len() >= MAX_GROUPS => {
                return Err(SpoolError::TooMany {
                    kind: "groups",
                    limit: MAX_GROUPS,
                });
            }
            None => {
                self.groups.push(group);
                GroupId(self.groups.len() - 1)
            }
        };
        debug!(group = name, id = id.0, "group created");
        Ok(ReloadOutcome::Created(id))
    }

    // -- Lookups --

    pub fn printer(&self, id: PrinterId) -> &Printer {
        &self.printers[id.0]
    }

    pub fn printer_mut(&mut self, id: PrinterId) -> &mut Printer {
        &mut self.printers[id.0]
    }

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.0]
    }

    pub fn group_mut(&mut self, id: GroupId) -> &mut Group {
        &mut self.groups[id.0]
    }

    pub fn printer_ids(&self) -> impl Iterator<Item = PrinterId> + '_ {
        (0..self.printers.len()).map(PrinterId)
    }

    pub fn group_ids(&self) -> impl Iterator<Item = GroupId> + '_ {
        (0..self.groups.len()).map(GroupId)
    }

    pub fn printer_by_name(&self, name: &str) -> Option<PrinterId> {
        self.printers
            .iter()
            .position(|p| !p.deleted && p.name == name)
            .map(PrinterId)
    }

    pub fn group_by_name(&self, name: &str) -> Option<GroupId> {
        self.groups
            .iter()
            .position(|g| !g.deleted && g.name == name)
            .map(GroupId)
    }

    /// Resolve a destination name; a group wins a name clash.
    pub fn dest_by_name(&self, name: &str) -> Option<DestId> {
        self.group_by_name(name)
            .map(DestId::Group)
            .or_else(|| self.printer_by_name(name).map(DestId::Printer))
    }

    /// Resolve a destination name; a printer wins a name clash.
    pub fn dest_by_name_reversed(&self, name: &str) -> Option<DestId> {
        self.printer_by_name(name)
            .map(DestId::Printer)
            .or_else(|| self.group_by_name(name).map(DestId::Group))
    }

    pub fn dest_name(&self, dest: DestId) -> &str {
        match dest {
            DestId::Printer(p) => &self.printers[p.0].name,
            DestId::Group(g) => &self.groups[g.0].name,
        }
    }

    pub fn dest_is_live(&self, dest: DestId) -> bool {
        match dest {
            DestId::Printer(p) => self.printers.get(p.0).is_some_and(|p| !p.deleted),
            DestId::Group(g) => self.groups.get(g.0).is_some_and(|g| !g.deleted),
        }
    }

    pub fn is_accepting(&self, dest: DestId) -> bool {
        match dest {
            DestId::Printer(p) => self.printers[p.0].accepting,
            DestId::Group(g) => self.groups[g.0].accepting,
        }
    }

    pub fn is_protected(&self, dest: DestId) -> bool {
        match dest {
            DestId::Printer(p) => self.printers[p.0].protect,
            DestId::Group(g) => self.groups[g.0].protect,
        }
    }

    /// Printers that could print a job sent to `dest`, in bit order.
    pub fn candidates(&self, dest: DestId) -> Vec<PrinterId> {
        match dest {
            DestId::Printer(p) => vec![p],
            DestId::Group(g) => self.groups[g.0].members.clone(),
        }
    }

    /// Offset of `prn` in the member list of `group`.
    pub fn member_offset(&self, group: GroupId, prn: PrinterId) -> Option<usize> {
        self.groups[group.0].members.iter().position(|m| *m == prn)
    }

    /// The bit standing for `prn` in the never/notnow masks of a job sent to
    /// `dest`, or `None` if `prn` cannot print for that destination.
    pub fn printer_bit(&self, dest: DestId, prn: PrinterId) -> Option<u32> {
        match dest {
            DestId::Printer(p) if p == prn => Some(1),
            DestId::Printer(_) => None,
            DestId::Group(g) => self.member_offset(g, prn).map(|offset| 1 << offset),
        }
    }

    /// A mask with one bit set per candidate printer.
    pub fn all_mask(&self, dest: DestId) -> u32 {
        match dest {
            DestId::Printer(_) => 1,
            DestId::Group(g) => (1u32 << self.groups[g.0].members.len()) - 1,
        }
    }

    /// Live groups that have `prn` as a member.
    pub fn groups_containing(&self, prn: PrinterId) -> Vec<GroupId> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| !g.deleted && g.members.contains(&prn))
            .map(|(i, _)| GroupId(i))
            .collect()
    }

    /// Whether a job for `dest` is one `prn` might print.
    pub fn printer_serves(&self, dest: DestId, prn: PrinterId) -> bool {
        self.printer_bit(dest, prn).is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
