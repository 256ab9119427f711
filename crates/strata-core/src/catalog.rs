//! SQLite-backed entity store shared by every worker in the fleet.
//!
//! Each worker opens its own [`Catalog`]; the file is opened in WAL mode with a
//! busy timeout so concurrent readers and a single writer coexist. Multi-statement
//! writes go through [`Catalog::write_tx`], which takes the write lock up front
//! (`BEGIN IMMEDIATE`) so a read-then-write never fails on a stale snapshot.
//!
//! Timestamps are stored as milliseconds since the Unix epoch; enums and uuids
//! are stored as their text form.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, StrataError};
use crate::filesystem::Filesystem;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS filesystem (
    key             TEXT PRIMARY KEY,
    description     TEXT NOT NULL DEFAULT '',
    path            TEXT NOT NULL,
    tier            TEXT NOT NULL,
    enabled         INTEGER NOT NULL,
    read_only       INTEGER NOT NULL,
    write_only      INTEGER NOT NULL,
    high_watermark  REAL NOT NULL,
    low_watermark   REAL NOT NULL,
    percent_full    REAL
);

CREATE TABLE IF NOT EXISTS study_storage (
    study_key       TEXT PRIMARY KEY,
    filesystem_key  TEXT NOT NULL,
    size_bytes      INTEGER NOT NULL,
    attributes      TEXT NOT NULL,
    created_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS study_storage_filesystem ON study_storage (filesystem_key, study_key);

CREATE TABLE IF NOT EXISTS service_lock (
    key              TEXT PRIMARY KEY,
    lock_type        TEXT NOT NULL,
    filesystem_key   TEXT,
    enabled          INTEGER NOT NULL,
    state            TEXT NOT NULL,
    scheduled_time   INTEGER NOT NULL,
    last_run         INTEGER,
    last_outcome     TEXT,
    owner            TEXT,
    claim_expires_at INTEGER
);

CREATE TABLE IF NOT EXISTS work_queue (
    id              TEXT PRIMARY KEY,
    queue_type      TEXT NOT NULL,
    study_key       TEXT,
    filesystem_key  TEXT,
    scheduled_time  INTEGER NOT NULL,
    status          TEXT NOT NULL,
    failure_reason  TEXT,
    retry_count     INTEGER NOT NULL DEFAULT 0,
    data            TEXT,
    claimed_by      TEXT,
    created_at      INTEGER NOT NULL,
    updated_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS work_queue_due ON work_queue (status, queue_type, scheduled_time);
CREATE INDEX IF NOT EXISTS work_queue_study ON work_queue (study_key);
";

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Open (or create) the catalog at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::init(conn)
    }

    /// Private in-memory catalog, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside an immediate write transaction. Commits on `Ok`, rolls back on `Err`.
    ///
    /// Called while a transaction is already open, `f` runs in a savepoint
    /// instead: an `Err` undoes only its own writes and the outer transaction
    /// decides whether anything becomes visible.
    pub fn write_tx<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        if !self.conn.is_autocommit() {
            return self.savepoint(f);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = f(&self.conn).and_then(|value| {
            self.conn.execute_batch("COMMIT")?;
            Ok(value)
        });
        if result.is_err() && !self.conn.is_autocommit() {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
        result
    }

    fn savepoint<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.conn.execute_batch("SAVEPOINT nested")?;
        match f(&self.conn) {
            Ok(value) => {
                self.conn.execute_batch("RELEASE nested")?;
                Ok(value)
            }
            Err(e) => {
                let _ = self
                    .conn
                    .execute_batch("ROLLBACK TO nested; RELEASE nested");
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Filesystems
    // -----------------------------------------------------------------------

    pub fn insert_filesystem(&self, fs: &Filesystem) -> Result<()> {
        self.conn.execute(
            "INSERT INTO filesystem
                 (key, description, path, tier, enabled, read_only, write_only,
                  high_watermark, low_watermark)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                fs.key,
                fs.description,
                fs.path.to_string_lossy().into_owned(),
                fs.tier.as_str(),
                fs.enabled,
                fs.read_only,
                fs.write_only,
                fs.high_watermark,
                fs.low_watermark,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the administrator-controlled fields of an existing filesystem.
    pub fn update_filesystem(&self, fs: &Filesystem) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE filesystem
             SET description = ?2, path = ?3, tier = ?4, enabled = ?5, read_only = ?6,
                 write_only = ?7, high_watermark = ?8, low_watermark = ?9
             WHERE key = ?1",
            params![
                fs.key,
                fs.description,
                fs.path.to_string_lossy().into_owned(),
                fs.tier.as_str(),
                fs.enabled,
                fs.read_only,
                fs.write_only,
                fs.high_watermark,
                fs.low_watermark,
            ],
        )?;
        if changed == 0 {
            return Err(StrataError::FilesystemNotFound(fs.key.clone()));
        }
        Ok(())
    }

    /// Store the usage observed by the delete pass so listings work without polling.
    pub fn record_filesystem_usage(&self, key: &str, percent_full: f64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE filesystem SET percent_full = ?2 WHERE key = ?1",
            params![key, percent_full],
        )?;
        if changed == 0 {
            return Err(StrataError::FilesystemNotFound(key.to_string()));
        }
        Ok(())
    }

    pub fn load_filesystem(&self, key: &str) -> Result<Filesystem> {
        self.conn
            .query_row(
                &format!("SELECT {FILESYSTEM_COLUMNS} FROM filesystem WHERE key = ?1"),
                [key],
                filesystem_from_row,
            )
            .optional()?
            .ok_or_else(|| StrataError::FilesystemNotFound(key.to_string()))
    }

    /// All filesystems ordered by key.
    pub fn list_filesystems(&self) -> Result<Vec<Filesystem>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {FILESYSTEM_COLUMNS} FROM filesystem ORDER BY key"))?;
        let rows = stmt.query_map([], filesystem_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

const FILESYSTEM_COLUMNS: &str =
    "key, description, path, tier, enabled, read_only, write_only, high_watermark, low_watermark,
     percent_full";

fn filesystem_from_row(row: &Row<'_>) -> rusqlite::Result<Filesystem> {
    Ok(Filesystem {
        key: row.get(0)?,
        description: row.get(1)?,
        path: row.get::<_, String>(2)?.into(),
        tier: parse_column(row, 3)?,
        enabled: row.get(4)?,
        read_only: row.get(5)?,
        write_only: row.get(6)?,
        high_watermark: row.get(7)?,
        low_watermark: row.get(8)?,
        percent_full: row.get(9)?,
    })
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Read a text column through `FromStr`, surfacing parse failures as conversion errors.
pub(crate) fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
