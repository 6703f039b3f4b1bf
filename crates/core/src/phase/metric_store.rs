//! Storage for phase metric records.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use thiserror::Error;

use super::types::{PhaseMetricRecord, PhaseName};
use crate::db::{self, format_ts, parse_ts};

/// Error message written into records closed by a newer execution.
pub const ABANDONED: &str = "abandoned";

#[derive(Debug, Error)]
pub enum PhaseMetricError {
    #[error("Database error: {0}")]
    Database(String),
}

/// Append-only log of phase executions.
pub trait PhaseMetricStore: Send + Sync {
    /// Open a record for `phase`, closing any still-open record for the same
    /// application as abandoned. Returns the new record id.
    fn open(
        &self,
        application_id: &str,
        phase: PhaseName,
        started_at: DateTime<Utc>,
    ) -> Result<i64, PhaseMetricError>;

    /// Close an open record. Records that are already closed are left alone.
    fn close(
        &self,
        record_id: i64,
        completed_at: DateTime<Utc>,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<(), PhaseMetricError>;

    /// All records for an application, oldest first.
    fn list_for_application(
        &self,
        application_id: &str,
    ) -> Result<Vec<PhaseMetricRecord>, PhaseMetricError>;

    /// Delete records started before `cutoff`. Returns the number removed.
    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, PhaseMetricError>;
}

/// SQLite-backed phase metric store.
pub struct SqlitePhaseMetricStore {
    conn: Mutex<Connection>,
}

impl SqlitePhaseMetricStore {
    pub fn new(path: &Path) -> Result<Self, PhaseMetricError> {
        let conn = db::open(path).map_err(|e| PhaseMetricError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, PhaseMetricError> {
        let conn =
            Connection::open_in_memory().map_err(|e| PhaseMetricError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), PhaseMetricError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS phase_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                application_id TEXT NOT NULL,
                phase TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                duration_ms INTEGER,
                success INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_phase_metrics_application ON phase_metrics(application_id, started_at);
            CREATE INDEX IF NOT EXISTS idx_phase_metrics_started_at ON phase_metrics(started_at);
            "#,
        )
        .map_err(|e| PhaseMetricError::Database(e.to_string()))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<PhaseMetricRecord> {
        let phase: String = row.get(2)?;
        let started_at: String = row.get(3)?;
        let completed_at: Option<String> = row.get(4)?;

        Ok(PhaseMetricRecord {
            id: row.get(0)?,
            application_id: row.get(1)?,
            phase: phase.parse().unwrap_or(PhaseName::Geocode),
            started_at: parse_ts(&started_at).unwrap_or_else(Utc::now),
            completed_at: completed_at.as_deref().and_then(parse_ts),
            duration_ms: row.get(5)?,
            success: row.get(6)?,
            error_message: row.get(7)?,
        })
    }
}

impl PhaseMetricStore for SqlitePhaseMetricStore {
    fn open(
        &self,
        application_id: &str,
        phase: PhaseName,
        started_at: DateTime<Utc>,
    ) -> Result<i64, PhaseMetricError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| PhaseMetricError::Database(e.to_string()))?;

        let now = format_ts(started_at);
        tx.execute(
            "UPDATE phase_metrics SET completed_at = ?, success = 0, error_message = ?, \
             duration_ms = CAST((julianday(?) - julianday(started_at)) * 86400000 AS INTEGER) \
             WHERE application_id = ? AND completed_at IS NULL",
            params![now, ABANDONED, now, application_id],
        )
        .map_err(|e| PhaseMetricError::Database(e.to_string()))?;

        tx.execute(
            "INSERT INTO phase_metrics (application_id, phase, started_at) VALUES (?, ?, ?)",
            params![application_id, phase.as_str(), now],
        )
        .map_err(|e| PhaseMetricError::Database(e.to_string()))?;
        let id = tx.last_insert_rowid();

        tx.commit()
            .map_err(|e| PhaseMetricError::Database(e.to_string()))?;
        Ok(id)
    }

    fn close(
        &self,
        record_id: i64,
        completed_at: DateTime<Utc>,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<(), PhaseMetricError> {
        let conn = self.conn.lock().unwrap();

        let started_at: Option<String> = conn
            .query_row(
                "SELECT started_at FROM phase_metrics WHERE id = ? AND completed_at IS NULL",
                params![record_id],
                |row| row.get(0),
            )
            .ok();
        let Some(started_at) = started_at.as_deref().and_then(parse_ts) else {
            return Ok(());
        };

        let duration_ms = (completed_at - started_at).num_milliseconds().max(0);
        conn.execute(
            "UPDATE phase_metrics SET completed_at = ?, duration_ms = ?, success = ?, error_message = ? \
             WHERE id = ? AND completed_at IS NULL",
            params![
                format_ts(completed_at),
                duration_ms,
                success,
                error_message,
                record_id
            ],
        )
        .map_err(|e| PhaseMetricError::Database(e.to_string()))?;

        Ok(())
    }

    fn list_for_application(
        &self,
        application_id: &str,
    ) -> Result<Vec<PhaseMetricRecord>, PhaseMetricError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT id, application_id, phase, started_at, completed_at, duration_ms, success, error_message \
                 FROM phase_metrics WHERE application_id = ? ORDER BY started_at ASC, id ASC",
            )
            .map_err(|e| PhaseMetricError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![application_id], Self::row_to_record)
            .map_err(|e| PhaseMetricError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row_result in rows {
            records.push(row_result.map_err(|e| PhaseMetricError::Database(e.to_string()))?);
        }
        Ok(records)
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, PhaseMetricError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM phase_metrics WHERE started_at < ?",
            params![format_ts(cutoff)],
        )
        .map_err(|e| PhaseMetricError::Database(e.to_string()))
    }
}
