// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Durable per-destination status records backed by SQLite.
//
// One row per printer and one per group, rewritten after every status
// change so a restart keeps accepting, stopped, held and protected flags.
// Job counts are stored for external readers only; on load they are never
// returned, because the queue directory is the only trustworthy count.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, info, instrument};

use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::PrinterStatus;

/// Version stamped into `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS printer_state (
        name TEXT PRIMARY KEY,
        accepting INTEGER NOT NULL,
        previous_status INTEGER NOT NULL,
        status INTEGER NOT NULL,
        next_error_retry INTEGER NOT NULL DEFAULT 0,
        next_engaged_retry INTEGER NOT NULL DEFAULT 0,
        countdown INTEGER NOT NULL DEFAULT 0,
        protect INTEGER NOT NULL DEFAULT 0,
        job_count INTEGER NOT NULL DEFAULT 0,
        changed_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS group_state (
        name TEXT PRIMARY KEY,
        accepting INTEGER NOT NULL,
        held INTEGER NOT NULL,
        protect INTEGER NOT NULL DEFAULT 0,
        job_count INTEGER NOT NULL DEFAULT 0,
        changed_at TEXT NOT NULL
    );
"#;

/// What survives a restart for a printer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterRecord {
    pub accepting: bool,
    pub previous_status: PrinterStatus,
    pub status: PrinterStatus,
    pub next_error_retry: i32,
    pub next_engaged_retry: i32,
    pub countdown: i32,
    pub protect: bool,
    pub changed_at: DateTime<Utc>,
}

/// What survives a restart for a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub accepting: bool,
    pub held: bool,
    pub protect: bool,
    pub changed_at: DateTime<Utc>,
}

/// SQLite store of destination status records.
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    /// Open (or create) the state database.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| SpoolError::Database(format!("open: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| SpoolError::Database(format!("WAL pragma: {e}")))?;
        Self::prepare_schema(&conn)?;
        info!("state database opened");
        Ok(Self { conn })
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SpoolError::Database(format!("open in-memory: {e}")))?;
        Self::prepare_schema(&conn)?;
        debug!("in-memory state database opened");
        Ok(Self { conn })
    }

    fn prepare_schema(conn: &Connection) -> Result<()> {
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| SpoolError::Database(format!("read user_version: {e}")))?;
        if version > SCHEMA_VERSION {
            return Err(SpoolError::Database(format!(
                "schema version {version} is newer than supported {SCHEMA_VERSION}"
            )));
        }
        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| SpoolError::Database(format!("create tables: {e}")))?;
        if version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(|e| SpoolError::Database(format!("write user_version: {e}")))?;
        }
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i32> {
        self.conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| SpoolError::Database(format!("read user_version: {e}")))
    }

    // -- Printers --

    #[instrument(skip(self, record), fields(status = %record.status))]
    pub fn save_printer(&self, name: &str, record: &PrinterRecord, job_count: usize) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO printer_state (name, accepting, previous_status, status,
                 next_error_retry, next_engaged_retry, countdown, protect, job_count, changed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(name) DO UPDATE SET
                    accepting = excluded.accepting,
                    previous_status = excluded.previous_status,
                    status = excluded.status,
                    next_error_retry = excluded.next_error_retry,
                    next_engaged_retry = excluded.next_engaged_retry,
                    countdown = excluded.countdown,
                    protect = excluded.protect,
                    job_count = excluded.job_count,
                    changed_at = excluded.changed_at",
                params![
                    name,
                    record.accepting,
                    record.previous_status.code(),
                    record.status.code(),
                    record.next_error_retry,
                    record.next_engaged_retry,
                    record.countdown,
                    record.protect,
                    job_count as i64,
                    record.changed_at.to_rfc3339(),
                ],
            )
            .map_err(|e| SpoolError::Database(format!("save printer: {e}")))?;
        Ok(())
    }

    /// The stored record for `name`, if any.
    pub fn load_printer(&self, name: &str) -> Result<Option<PrinterRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT accepting, previous_status, status, next_error_retry,
                        next_engaged_retry, countdown, protect, changed_at
                 FROM printer_state WHERE name = ?1",
            )
            .map_err(|e| SpoolError::Database(format!("prepare load_printer: {e}")))?;
        let mut rows = stmt
            .query_map(params![name], row_to_printer_record)
            .map_err(|e| SpoolError::Database(format!("query load_printer: {e}")))?;
        match rows.next() {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(SpoolError::Database(format!("row parse: {e}"))),
            None => Ok(None),
        }
    }

    // -- Groups --

    #[instrument(skip(self, record))]
    pub fn save_group(&self, name: &str, record: &GroupRecord, job_count: usize) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO group_state (name, accepting, held, protect, job_count, changed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(name) DO UPDATE SET
                    accepting = excluded.accepting,
                    held = excluded.held,
                    protect = excluded.protect,
                    job_count = excluded.job_count,
                    changed_at = excluded.changed_at",
                params![
                    name,
                    record.accepting,
                    record.held,
                    record.protect,
                    job_count as i64,
                    record.changed_at.to_rfc3339(),
                ],
            )
            .map_err(|e| SpoolError::Database(format!("save group: {e}")))?;
        Ok(())
    }

    pub fn load_group(&self, name: &str) -> Result<Option<GroupRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT accepting, held, protect, changed_at
                 FROM group_state WHERE name = ?1",
            )
            .map_err(|e| SpoolError::Database(format!("prepare load_group: {e}")))?;
        let mut rows = stmt
            .query_map(params![name], row_to_group_record)
            .map_err(|e| SpoolError::Database(format!("query load_group: {e}")))?;
        match rows.next() {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(SpoolError::Database(format!("row parse: {e}"))),
            None => Ok(None),
        }
    }

    /// The job count last written for a printer.  Only external tools read
    /// this; the daemon recounts from the queue.
    pub fn stored_printer_job_count(&self, name: &str) -> Result<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT job_count FROM printer_state WHERE name = ?1")
            .map_err(|e| SpoolError::Database(format!("prepare job_count: {e}")))?;
        let mut rows = stmt
            .query_map(params![name], |row| row.get::<_, i64>(0))
            .map_err(|e| SpoolError::Database(format!("query job_count: {e}")))?;
        match rows.next() {
            Some(Ok(count)) => Ok(Some(count)),
            Some(Err(e)) => Err(SpoolError::Database(format!("row parse: {e}"))),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn status_column(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<PrinterStatus> {
    let code: i32 = row.get(index)?;
    PrinterStatus::from_code(code).ok_or(rusqlite::Error::IntegralValueOutOfRange(
        index,
        i64::from(code),
    ))
}

fn time_column(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Column order must match the SELECT in `load_printer`.
fn row_to_printer_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrinterRecord> {
    Ok(PrinterRecord {
        accepting: row.get(0)?,
        previous_status: status_column(row, 1)?,
        status: status_column(row, 2)?,
        next_error_retry: row.get(3)?,
        next_engaged_retry: row.get(4)?,
        countdown: row.get(5)?,
        protect: row.get(6)?,
        changed_at: time_column(row, 7)?,
    })
}

fn row_to_group_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupRecord> {
    Ok(GroupRecord {
        accepting: row.get(0)?,
        held: row.get(1)?,
        protect: row.get(2)?,
        changed_at: time_column(row, 3)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn printer_record() -> PrinterRecord {
        PrinterRecord {
            accepting: false,
            previous_status: PrinterStatus::Printing,
            status: PrinterStatus::Fault,
            next_error_retry: 3,
            next_engaged_retry: 0,
            countdown: 600,
            protect: true,
            changed_at: DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
                .expect("time")
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn printer_record_round_trips() {
        let store = StateStore::open_in_memory().expect("open");
        let record = printer_record();
        store.save_printer("laser1", &record, 7).expect("save");
        assert_eq!(store.load_printer("laser1").expect("load"), Some(record));
        assert_eq!(store.load_printer("nobody").expect("load"), None);
    }

    #[test]
    fn saving_twice_overwrites() {
        let store = StateStore::open_in_memory().expect("open");
        let mut record = printer_record();
        store.save_printer("laser1", &record, 1).expect("save");
        record.status = PrinterStatus::Stopt;
        record.accepting = true;
        store.save_printer("laser1", &record, 2).expect("save");
        let loaded = store.load_printer("laser1").expect("load").expect("row");
        assert_eq!(loaded.status, PrinterStatus::Stopt);
        assert!(loaded.accepting);
        assert_eq!(store.stored_printer_job_count("laser1").expect("count"), Some(2));
    }

    #[test]
    fn group_flags_round_trip() {
        let store = StateStore::open_in_memory().expect("open");
        let record = GroupRecord {
            accepting: true,
            held: true,
            protect: false,
            changed_at: Utc::now(),
        };
        store.save_group("triogroup", &record, 3).expect("save");
        let loaded = store.load_group("triogroup").expect("load").expect("row");
        assert!(loaded.held);
        assert!(loaded.accepting);
        assert!(!loaded.protect);
    }

    #[test]
    fn file_database_is_versioned_and_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.db");
        {
            let store = StateStore::open(&path).expect("open");
            assert_eq!(store.schema_version().expect("version"), SCHEMA_VERSION);
            store.save_printer("oscar", &printer_record(), 0).expect("save");
        }
        let store = StateStore::open(&path).expect("reopen");
        assert!(store.load_printer("oscar").expect("load").is_some());
    }

    #[test]
    fn newer_schema_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.db");
        {
            let conn = Connection::open(&path).expect("open");
            conn.pragma_update(None, "user_version", 99).expect("pragma");
        }
        assert!(matches!(StateStore::open(&path), Err(SpoolError::Database(_))));
    }
}
