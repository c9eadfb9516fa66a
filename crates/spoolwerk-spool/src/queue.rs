// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory job queue and the on-disk queue file format.
//
// The queue holds one entry per spooled job, ordered by priority (lower
// number prints sooner) and, within a priority, by arrival.  The durable
// copy of a job is its queue file in the queue directory plus data files in
// the data directory; the in-memory array is rebuilt from those files at
// startup.  The array grows in fixed steps up to a hard ceiling.

use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use spoolwerk_core::config::QueueConfig;
use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::{DestId, JobKey, JobStatus};

use crate::media::{MAX_DOC_MEDIA, MediumId};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Priority given to jobs whose queue file names none.
pub const DEFAULT_PRIORITY: i32 = 20;

/// Suffixes of the data files that belong to a job.
pub const DATA_SUFFIXES: [&str; 6] = ["comments", "pages", "text", "log", "infile", "barbar"];

/// Execute bits recording durable job states on the queue file.
const MODE_HELD: u32 = 0o100;
const MODE_STRANDED: u32 = 0o010;
const MODE_ARRESTED: u32 = 0o001;
const MODE_STATUS_MASK: u32 = MODE_HELD | MODE_STRANDED | MODE_ARRESTED;

// ---------------------------------------------------------------------------
// Queue entries
// ---------------------------------------------------------------------------

/// Outstanding-question bookkeeping for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionState {
    /// The job has a question nobody has answered yet.
    pub unanswered: bool,
    /// A questioner is running for it right now.
    pub asking_now: bool,
    /// Do not ask again before this time.
    pub resend_at: Option<DateTime<Utc>>,
}

/// One spooled job.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub key: JobKey,
    pub priority: i32,
    pub status: JobStatus,
    /// Printers that can never print this job (driver said incapable).
    pub never: u32,
    /// Printers that cannot print it now (required media not mounted).
    pub notnow: u32,
    /// Which pass over a group's members this is.
    pub pass: i32,
    pub media: Vec<MediumId>,
    pub question: QuestionState,
    /// When the job was last arrested.
    pub arrested_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(key: JobKey, priority: i32, status: JobStatus) -> Self {
        Self {
            key,
            priority,
            status,
            never: 0,
            notnow: 0,
            pass: if key.dest.is_group() { 1 } else { 0 },
            media: Vec::new(),
            question: QuestionState::default(),
            arrested_at: None,
        }
    }
}

/// Where an entry landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Position in the whole queue.
    pub rank1: usize,
    /// Position among jobs for the same destination.
    pub rank2: usize,
}

/// Priority-ordered array of queue entries.
#[derive(Debug)]
pub struct JobQueue {
    entries: Vec<QueueEntry>,
    capacity: usize,
    grow_by: usize,
    ceiling: usize,
}

impl JobQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            entries: Vec::with_capacity(config.initial_capacity),
            capacity: config.initial_capacity,
            grow_by: config.grow_by,
            ceiling: config.ceiling,
        }
    }

    /// Insert before the first entry with a numerically larger priority.
    ///
    /// A full array grows by `grow_by`; if that would pass the ceiling the
    /// entry is rejected with [`SpoolError::QueueOverflow`].  A key already
    /// queued is rejected with [`SpoolError::DuplicateJob`].
    pub fn insert(&mut self, entry: QueueEntry) -> Result<Placement> {
        if self.find(&entry.key).is_some() {
            warn!(id = entry.key.id, subid = entry.key.subid, "job already queued");
            return Err(SpoolError::DuplicateJob {
                id: entry.key.id,
                subid: entry.key.subid,
            });
        }
        if self.entries.len() >= self.capacity {
            let grown = self.capacity + self.grow_by;
            if self.grow_by == 0 || grown > self.ceiling {
                warn!(entries = self.entries.len(), "queue array overflow");
                return Err(SpoolError::QueueOverflow(self.entries.len()));
            }
            self.entries.reserve(grown - self.entries.len());
            self.capacity = grown;
            debug!(capacity = grown, "queue array grown");
        }

        let rank1 = self
            .entries
            .iter()
            .position(|e| e.priority > entry.priority)
            .unwrap_or(self.entries.len());
        let rank2 = self.entries[..rank1]
            .iter()
            .filter(|e| e.key.dest == entry.key.dest)
            .count();
        self.entries.insert(rank1, entry);
        Ok(Placement { rank1, rank2 })
    }

    pub fn remove(&mut self, key: &JobKey) -> Option<QueueEntry> {
        let index = self.find(key)?;
        Some(self.entries.remove(index))
    }

    pub fn find(&self, key: &JobKey) -> Option<usize> {
        self.entries.iter().position(|e| e.key == *key)
    }

    pub fn get(&self, key: &JobKey) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.key == *key)
    }

    pub fn get_mut(&mut self, key: &JobKey) -> Option<&mut QueueEntry> {
        self.entries.iter_mut().find(|e| e.key == *key)
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [QueueEntry] {
        &mut self.entries
    }

    /// Keys in queue order, for passes that mutate while walking.
    pub fn keys(&self) -> Vec<JobKey> {
        self.entries.iter().map(|e| e.key).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current logical capacity of the array.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries addressed to `dest`.
    pub fn count_for(&self, dest: DestId) -> usize {
        self.entries.iter().filter(|e| e.key.dest == dest).count()
    }

    /// Move a job to the head of the queue with top priority, or to its
    /// tail.  Returns `false` if the job is not queued.
    pub fn rush(&mut self, key: &JobKey, to_front: bool) -> bool {
        let Some(index) = self.find(key) else {
            return false;
        };
        let mut entry = self.entries.remove(index);
        if to_front {
            entry.priority = 0;
            self.entries.insert(0, entry);
        } else {
            self.entries.push(entry);
        }
        true
    }

    /// Raise every job one priority step.
    pub fn age_priorities(&mut self) {
        for entry in &mut self.entries {
            if entry.priority > 0 {
                entry.priority -= 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Queue file names
// ---------------------------------------------------------------------------

/// Textual identity of a job, as used for queue and data file names:
/// `destnode:dest-id.subid(homenode)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobName {
    pub destnode: String,
    pub dest: String,
    pub id: i32,
    pub subid: i32,
    pub homenode: String,
}

impl JobName {
    /// Parse a queue file name.
    pub fn parse(name: &str) -> Result<Self> {
        let bad = || SpoolError::BadJobName(name.to_string());
        let (destnode, rest) = name.split_once(':').ok_or_else(bad)?;
        let rest = rest.strip_suffix(')').ok_or_else(bad)?;
        let (rest, homenode) = rest.rsplit_once('(').ok_or_else(bad)?;
        let (rest, subid) = rest.rsplit_once('.').ok_or_else(bad)?;
        let (dest, id) = rest.rsplit_once('-').ok_or_else(bad)?;
        if destnode.is_empty() || dest.is_empty() || homenode.is_empty() {
            return Err(bad());
        }
        Ok(Self {
            destnode: destnode.to_string(),
            dest: dest.to_string(),
            id: id.parse().map_err(|_| bad())?,
            subid: subid.parse().map_err(|_| bad())?,
            homenode: homenode.to_string(),
        })
    }

    /// The id shown to users: `dest-id`, `.subid` when non-zero, and
    /// `(node)` when the job comes from another node.
    pub fn display_id(&self, local_node: &str) -> String {
        let mut text = format!("{}-{}", self.dest, self.id);
        if self.subid > 0 {
            text.push_str(&format!(".{}", self.subid));
        }
        if self.homenode != local_node && self.homenode != "*" {
            text.push_str(&format!("({})", self.homenode));
        }
        text
    }

    pub fn queue_file(&self, queue_dir: &Path) -> PathBuf {
        queue_dir.join(self.to_string())
    }

    pub fn data_file(&self, data_dir: &Path, suffix: &str) -> PathBuf {
        data_dir.join(format!("{self}-{suffix}"))
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}.{}({})",
            self.destnode, self.dest, self.id, self.subid, self.homenode
        )
    }
}

/// Remove a job's queue file and all of its data files.  Missing files are
/// not an error.
pub fn unlink_job_files(queue_dir: &Path, data_dir: &Path, name: &JobName) {
    let mut paths = vec![name.queue_file(queue_dir)];
    paths.extend(DATA_SUFFIXES.iter().map(|s| name.data_file(data_dir, s)));
    for path in paths {
        match std::fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), error = %e, "cannot remove job file");
            }
            _ => {}
        }
    }
}

/// Rename a job's queue and data files to a new name.
pub fn rename_job_files(queue_dir: &Path, data_dir: &Path, from: &JobName, to: &JobName) {
    let mut pairs = vec![(from.queue_file(queue_dir), to.queue_file(queue_dir))];
    pairs.extend(
        DATA_SUFFIXES
            .iter()
            .map(|s| (from.data_file(data_dir, s), to.data_file(data_dir, s))),
    );
    for (old, new) in pairs {
        match std::fs::rename(&old, &new) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                warn!(from = %old.display(), error = %e, "cannot rename job file");
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Queue file contents
// ---------------------------------------------------------------------------

/// How a user wants to be told about the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub responder: String,
    pub address: String,
    pub options: String,
}

/// The header lines of a queue file the spooler acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFileInfo {
    pub priority: i32,
    pub media: Vec<String>,
    pub question: Option<String>,
    pub response: Option<ResponseLine>,
    pub title: Option<String>,
    pub for_user: Option<String>,
}

impl QueueFileInfo {
    pub fn parse(text: &str) -> Self {
        let mut info = Self {
            priority: DEFAULT_PRIORITY,
            media: Vec::new(),
            question: None,
            response: None,
            title: None,
            for_user: None,
        };
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key {
                "Priority" => {
                    if let Ok(priority) = value.parse() {
                        info.priority = priority;
                    }
                }
                "Media" => {
                    match value.split_whitespace().next() {
                        Some(name) if info.media.len() < MAX_DOC_MEDIA => {
                            info.media.push(name.to_string())
                        }
                        _ => {}
                    }
                }
                "Question" if !value.is_empty() => info.question = Some(value.to_string()),
                "Response" => {
                    let mut parts = value.splitn(3, char::is_whitespace);
                    if let (Some(responder), Some(address)) = (parts.next(), parts.next()) {
                        info.response = Some(ResponseLine {
                            responder: responder.to_string(),
                            address: address.to_string(),
                            options: parts.next().unwrap_or("").trim().to_string(),
                        });
                    }
                }
                "Title" => info.title = Some(value.to_string()),
                "For" => info.for_user = Some(value.to_string()),
                _ => {}
            }
        }
        info
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }
}

// ---------------------------------------------------------------------------
// Durable status bits
// ---------------------------------------------------------------------------

/// Recover a job's status from the execute bits of its queue file.
pub fn status_from_mode(mode: u32) -> JobStatus {
    if mode & MODE_ARRESTED != 0 {
        JobStatus::Arrested
    } else if mode & MODE_STRANDED != 0 {
        JobStatus::Stranded
    } else if mode & MODE_HELD != 0 {
        JobStatus::Held
    } else {
        JobStatus::Waiting
    }
}

/// Record a job's durable status in the execute bits of its queue file.
pub fn write_status_bits(path: &Path, status: JobStatus) -> Result<()> {
    let bits = match status {
        JobStatus::Held => MODE_HELD,
        JobStatus::Stranded => MODE_STRANDED,
        JobStatus::Arrested => MODE_ARRESTED,
        _ => 0,
    };
    let mut perms = std::fs::metadata(path)?.permissions();
    let mode = (perms.mode() & !MODE_STATUS_MASK) | bits;
    if mode != perms.mode() {
        perms.set_mode(mode);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
