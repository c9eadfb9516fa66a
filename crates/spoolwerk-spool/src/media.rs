// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Media eligibility.
//
// Medium names are interned so bins and jobs compare small ids.  A job's
// `notnow` mask has a bit set for every candidate printer that lacks one of
// the job's required media; stop state is kept out of that mask and only
// mixed in when the visible wait reason is derived.

use std::io::Write;
use std::path::Path;

use tracing::{debug, warn};

use spoolwerk_core::error::Result;
use spoolwerk_core::types::{DestId, JobStatus};

use crate::registry::{Printer, Registry};

/// Width of each field in a mounted-media record.
pub const MOUNTED_FIELD_WIDTH: usize = 16;

/// Most media a job can ask for.
pub const MAX_DOC_MEDIA: usize = 4;

/// Handle for an interned medium name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediumId(pub usize);

/// Interner for medium names.
#[derive(Debug, Default)]
pub struct MediaNames {
    names: Vec<String>,
}

impl MediaNames {
    pub fn intern(&mut self, name: &str) -> MediumId {
        if let Some(id) = self.lookup(name) {
            return id;
        }
        self.names.push(name.to_string());
        MediumId(self.names.len() - 1)
    }

    pub fn lookup(&self, name: &str) -> Option<MediumId> {
        self.names.iter().position(|n| n == name).map(MediumId)
    }

    pub fn name(&self, id: MediumId) -> &str {
        self.names.get(id.0).map(String::as_str).unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

/// Whether `printer` can satisfy every medium in `required` right now.
///
/// Printers without bins, or with an auto-select bin, take anything.
pub fn has_media(printer: &Printer, required: &[MediumId]) -> bool {
    if printer.bins.is_empty() || printer.autoselect {
        return true;
    }
    required
        .iter()
        .all(|medium| printer.bins.iter().any(|b| b.mounted == Some(*medium)))
}

/// Bits of the candidate printers of `dest` that lack required media.
pub fn notnow_mask(registry: &Registry, dest: DestId, required: &[MediumId]) -> u32 {
    registry
        .candidates(dest)
        .iter()
        .enumerate()
        .filter(|(_, prn)| !has_media(registry.printer(**prn), required))
        .fold(0, |mask, (offset, _)| mask | (1 << offset))
}

/// Bits of the candidate printers of `dest` that are administratively down.
pub fn stopped_mask(registry: &Registry, dest: DestId) -> u32 {
    registry
        .candidates(dest)
        .iter()
        .enumerate()
        .filter(|(_, prn)| registry.printer(**prn).status.is_stopped())
        .fold(0, |mask, (offset, _)| mask | (1 << offset))
}

/// The visible status of a waiting job.
///
/// A job waits for media when no unstopped candidate has its media and at
/// least one candidate is not stopped.  If every candidate is stopped it is
/// simply waiting.  Jobs in any other state keep their status.
pub fn wait_reason(current: JobStatus, notnow: u32, stopped: u32, all: u32) -> JobStatus {
    if !current.is_waiting() {
        return current;
    }
    let blocked = (notnow | stopped) & all;
    if blocked == all && stopped & all != all {
        JobStatus::WaitingForMedia
    } else {
        JobStatus::Waiting
    }
}

// ---------------------------------------------------------------------------
// Mounted media file
// ---------------------------------------------------------------------------

fn padded(text: &str) -> [u8; MOUNTED_FIELD_WIDTH] {
    let mut field = [b' '; MOUNTED_FIELD_WIDTH];
    for (slot, byte) in field.iter_mut().zip(text.bytes()) {
        *slot = byte;
    }
    field
}

fn unpadded(field: &[u8]) -> String {
    String::from_utf8_lossy(field).trim_end().to_string()
}

/// Write the bin/medium pairs of `printer` as fixed-width records.
pub fn save_mounted(dir: &Path, printer: &Printer, names: &MediaNames) -> Result<()> {
    let mut records = Vec::with_capacity(printer.bins.len() * MOUNTED_FIELD_WIDTH * 2);
    for bin in &printer.bins {
        records.extend_from_slice(&padded(&bin.name));
        let medium = bin.mounted.map(|m| names.name(m)).unwrap_or("");
        records.extend_from_slice(&padded(medium));
    }
    let mut file = std::fs::File::create(dir.join(&printer.name))?;
    file.write_all(&records)?;
    debug!(printer = %printer.name, bins = printer.bins.len(), "mounted media saved");
    Ok(())
}

/// Restore mounted media for `printer`.  Records for bins the printer no
/// longer has are ignored, as is a missing file.
pub fn load_mounted(dir: &Path, printer: &mut Printer, names: &mut MediaNames) -> Result<()> {
    let data = match std::fs::read(dir.join(&printer.name)) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if data.len() % (MOUNTED_FIELD_WIDTH * 2) != 0 {
        warn!(printer = %printer.name, len = data.len(), "mounted file has a partial record");
    }
    for record in data.chunks_exact(MOUNTED_FIELD_WIDTH * 2) {
        let bin_name = unpadded(&record[..MOUNTED_FIELD_WIDTH]);
        let medium = unpadded(&record[MOUNTED_FIELD_WIDTH..]);
        let Some(bin) = printer.bins.iter_mut().find(|b| b.name == bin_name) else {
            debug!(printer = %printer.name, bin = %bin_name, "mounted record for unknown bin");
            continue;
        };
        bin.mounted = if medium.is_empty() {
            None
        } else {
            Some(names.intern(&medium))
        };
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
