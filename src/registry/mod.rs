pub mod env;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use backon::{BlockingRetryable, ExponentialBuilder};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub use env::{flatten_env, parse_env};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS processes (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT    NOT NULL,
    pid         INTEGER NOT NULL,
    command     TEXT    NOT NULL,
    workdir     TEXT    NOT NULL,
    env         TEXT    NOT NULL DEFAULT '',
    config_path TEXT    NOT NULL DEFAULT '',
    stdout_path TEXT    NOT NULL,
    stderr_path TEXT    NOT NULL,
    timestamp   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_processes_name ON processes(name, timestamp);
"#;

const COLUMNS: &str =
    "id, name, pid, command, workdir, env, config_path, stdout_path, stderr_path, timestamp";

/// One managed process as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: i64,
    pub name: String,
    /// `0` means intentionally stopped.
    pub pid: u32,
    pub command: String,
    pub workdir: PathBuf,
    pub env: String,
    pub config_path: String,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

impl ProcessRecord {
    pub fn is_stopped(&self) -> bool {
        self.pid == 0
    }

    pub fn env_map(&self) -> BTreeMap<String, String> {
        parse_env(&self.env)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let pid: i64 = row.get(2)?;
        let workdir: String = row.get(4)?;
        let stdout_path: String = row.get(7)?;
        let stderr_path: String = row.get(8)?;
        let millis: i64 = row.get(9)?;
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            pid: u32::try_from(pid).unwrap_or(0),
            command: row.get(3)?,
            workdir: PathBuf::from(workdir),
            env: row.get(5)?,
            config_path: row.get(6)?,
            stdout_path: PathBuf::from(stdout_path),
            stderr_path: PathBuf::from(stderr_path),
            timestamp: Utc
                .timestamp_millis_opt(millis)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

/// Fields for a new registry row; the timestamp is assigned on insert.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub name: String,
    pub pid: u32,
    pub command: String,
    pub workdir: PathBuf,
    pub env: String,
    pub config_path: String,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

/// How mutations back off when another writer holds the store.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
    /// SQLite's own wait before reporting `SQLITE_BUSY`.
    pub busy_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(100),
            busy_timeout: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_factor(2.0)
            .with_max_times(self.attempts.saturating_sub(1))
    }
}

/// SQLite-backed store of managed-process records.
///
/// Several rows may exist for one name; the most recent by timestamp is
/// authoritative. Writers (CLI and dashboard) may race, so every mutation
/// retries on busy; reads never do.
pub struct Registry {
    conn: Mutex<Connection>,
    retry: RetryPolicy,
    path: Option<PathBuf>,
}

impl Registry {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, RetryPolicy::default())
    }

    pub fn open_with(path: &Path, retry: RetryPolicy) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn, retry, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, RetryPolicy::default(), None)
    }

    fn init(conn: Connection, retry: RetryPolicy, path: Option<PathBuf>) -> Result<Self> {
        conn.busy_timeout(retry.busy_timeout)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retry,
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a mutation, retrying with exponential backoff while the store is busy.
    fn mutate<T>(&self, what: &str, mut op: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        let result = (|| {
            let conn = self.conn();
            op(&conn)
        })
        .retry(self.retry.backoff())
        .sleep(std::thread::sleep)
        .when(|e: &Error| e.is_busy())
        .notify(|e: &Error, dur: Duration| {
            debug!(op = what, "registry busy: {}, retrying in {:?}", e, dur);
        })
        .call();
        if let Err(e) = &result {
            if e.is_busy() {
                warn!(op = what, attempts = self.retry.attempts, "registry still busy, giving up");
            }
        }
        result
    }

    /// The authoritative record for `name`, if any.
    pub fn get(&self, name: &str) -> Result<Option<ProcessRecord>> {
        let conn = self.conn();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM processes WHERE name = ?1 \
                     ORDER BY timestamp DESC, id DESC LIMIT 1"
                ),
                params![name],
                ProcessRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// One authoritative record per name, ordered by name.
    pub fn get_all(&self) -> Result<Vec<ProcessRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM processes p WHERE p.id = (\
                SELECT q.id FROM processes q WHERE q.name = p.name \
                ORDER BY q.timestamp DESC, q.id DESC LIMIT 1) \
             ORDER BY p.name"
        ))?;
        let rows = stmt.query_map([], ProcessRecord::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn names(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT DISTINCT name FROM processes ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Number of rows (historical included) stored for `name`.
    pub fn count_by_name(&self, name: &str) -> Result<usize> {
        let conn = self.conn();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM processes WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn insert(&self, record: NewRecord) -> Result<ProcessRecord> {
        let timestamp = Utc::now();
        let id = self.mutate("insert", |conn| {
            conn.execute(
                "INSERT INTO processes \
                 (name, pid, command, workdir, env, config_path, stdout_path, stderr_path, timestamp) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.name,
                    i64::from(record.pid),
                    record.command,
                    record.workdir.to_string_lossy(),
                    record.env,
                    record.config_path,
                    record.stdout_path.to_string_lossy(),
                    record.stderr_path.to_string_lossy(),
                    timestamp.timestamp_millis(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        Ok(ProcessRecord {
            id,
            name: record.name,
            pid: record.pid,
            command: record.command,
            workdir: record.workdir,
            env: record.env,
            config_path: record.config_path,
            stdout_path: record.stdout_path,
            stderr_path: record.stderr_path,
            timestamp: Utc
                .timestamp_millis_opt(timestamp.timestamp_millis())
                .single()
                .unwrap_or(timestamp),
        })
    }

    /// Update the PID of the authoritative row for `name`.
    /// Returns false when no row exists.
    pub fn set_pid(&self, name: &str, pid: u32) -> Result<bool> {
        let changed = self.mutate("set_pid", |conn| {
            Ok(conn.execute(
                "UPDATE processes SET pid = ?2 WHERE id = (\
                    SELECT id FROM processes WHERE name = ?1 \
                    ORDER BY timestamp DESC, id DESC LIMIT 1)",
                params![name, i64::from(pid)],
            )?)
        })?;
        Ok(changed > 0)
    }

    pub fn remove_by_name(&self, name: &str) -> Result<usize> {
        self.mutate("remove_by_name", |conn| {
            Ok(conn.execute("DELETE FROM processes WHERE name = ?1", params![name])?)
        })
    }

    pub fn remove_by_pid(&self, pid: u32) -> Result<usize> {
        self.mutate("remove_by_pid", |conn| {
            Ok(conn.execute(
                "DELETE FROM processes WHERE pid = ?1",
                params![i64::from(pid)],
            )?)
        })
    }

    pub fn remove_all(&self) -> Result<usize> {
        self.mutate("remove_all", |conn| {
            Ok(conn.execute("DELETE FROM processes", [])?)
        })
    }
}
