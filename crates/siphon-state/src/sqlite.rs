//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use rusqlite::Connection;
use siphon_types::common::CommonType;
use siphon_types::state::{CursorState, PipelineId, RunStats, RunStatus, StreamName};

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS stream_checkpoints (
    pipeline TEXT NOT NULL,
    stream TEXT NOT NULL,
    cursor_field TEXT NOT NULL,
    field_type TEXT NOT NULL,
    cursor_value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (pipeline, stream)
);

CREATE TABLE IF NOT EXISTS read_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    stream TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    records_read INTEGER DEFAULT 0,
    checkpoints_emitted INTEGER DEFAULT 0,
    error_message TEXT
);
";

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests and throwaway reads.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Context`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(StateError::context("open"))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory `SQLite` backend.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Context`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StateError::context("open"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(StateError::context("create tables"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Convert a `SQLite` datetime string to ISO-8601.
    fn sqlite_to_iso8601(raw: &str) -> String {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT).map_or_else(
            |_| raw.to_string(),
            |ndt| format!("{}Z", ndt.format("%Y-%m-%dT%H:%M:%S")),
        )
    }

    /// Convert an ISO-8601 string to `SQLite` datetime format.
    fn iso8601_to_sqlite(iso: &str) -> String {
        chrono::DateTime::parse_from_rfc3339(iso).map_or_else(
            |_| Utc::now().format(SQLITE_DATETIME_FMT).to_string(),
            |dt| dt.format(SQLITE_DATETIME_FMT).to_string(),
        )
    }

    #[cfg(test)]
    fn get_run_row(
        &self,
        run_id: i64,
    ) -> error::Result<(String, i64, i64, Option<String>, Option<String>)> {
        let conn = self.lock_conn()?;
        Ok(conn.query_row(
            "SELECT status, records_read, checkpoints_emitted, finished_at, error_message \
             FROM read_runs WHERE id = ?1",
            [run_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?)
    }
}

impl StateBackend for SqliteStateBackend {
    fn load_checkpoint(
        &self,
        pipeline: &PipelineId,
        stream: &StreamName,
    ) -> error::Result<Option<CursorState>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT cursor_field, field_type, cursor_value, updated_at \
                 FROM stream_checkpoints WHERE pipeline = ?1 AND stream = ?2",
            )
            .map_err(StateError::context("load_checkpoint"))?;

        let result = stmt.query_row(
            rusqlite::params![pipeline.as_str(), stream.as_str()],
            |row| {
                let cursor_field: String = row.get(0)?;
                let field_type: String = row.get(1)?;
                let cursor_value: String = row.get(2)?;
                let updated_at: String = row.get(3)?;
                Ok((cursor_field, field_type, cursor_value, updated_at))
            },
        );

        match result {
            Ok((cursor_field, field_type, cursor_value, updated_at)) => {
                let field_type = CommonType::parse(&field_type).ok_or_else(|| {
                    StateError::Corrupt(format!(
                        "unknown field type '{field_type}' for stream '{stream}'"
                    ))
                })?;
                Ok(Some(CursorState {
                    cursor_field,
                    field_type,
                    cursor_value,
                    updated_at: Self::sqlite_to_iso8601(&updated_at),
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StateError::context("load_checkpoint")(e)),
        }
    }

    fn save_checkpoint(
        &self,
        pipeline: &PipelineId,
        stream: &StreamName,
        cursor: &CursorState,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let updated_at = Self::iso8601_to_sqlite(&cursor.updated_at);
        conn.execute(
            "INSERT INTO stream_checkpoints \
             (pipeline, stream, cursor_field, field_type, cursor_value, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(pipeline, stream) \
             DO UPDATE SET cursor_field = ?3, field_type = ?4, cursor_value = ?5, updated_at = ?6",
            rusqlite::params![
                pipeline.as_str(),
                stream.as_str(),
                cursor.cursor_field,
                cursor.field_type.as_str(),
                cursor.cursor_value,
                updated_at,
            ],
        )
        .map_err(StateError::context("save_checkpoint"))?;
        Ok(())
    }

    fn start_run(&self, pipeline: &PipelineId, stream: &StreamName) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO read_runs (pipeline, stream, status) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                pipeline.as_str(),
                stream.as_str(),
                RunStatus::Running.as_str()
            ],
        )
        .map_err(StateError::context("start_run"))?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE read_runs SET status = ?1, finished_at = datetime('now'), \
             records_read = ?2, checkpoints_emitted = ?3, error_message = ?4 \
             WHERE id = ?5",
            rusqlite::params![
                status.as_str(),
                stats.records_read as i64,
                stats.checkpoints_emitted as i64,
                stats.error_message,
                run_id,
            ],
        )
        .map_err(StateError::context("complete_run"))?;
        Ok(())
    }
}
