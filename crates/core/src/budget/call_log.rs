//! API call log: one row per external call attributed to an application.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, Connection};
use thiserror::Error;

use crate::db::{self, format_ts};

#[derive(Debug, Error)]
pub enum CallLogError {
    #[error("Database error: {0}")]
    Database(String),
}

/// Append-only sink for external API calls.
pub trait ApiCallLog: Send + Sync {
    fn record(
        &self,
        application_id: &str,
        source: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<(), CallLogError>;

    /// Calls per application with `timestamp >= since`, in one grouped query.
    /// Ids without calls are absent from the map.
    fn count_since(
        &self,
        application_ids: &[String],
        since: DateTime<Utc>,
    ) -> Result<HashMap<String, u64>, CallLogError>;

    /// Delete entries older than `cutoff`. Returns the number removed.
    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, CallLogError>;
}

/// SQLite-backed call log (`api_call_log` table).
pub struct SqliteApiCallLog {
    conn: Mutex<Connection>,
}

impl SqliteApiCallLog {
    pub fn new(path: &Path) -> Result<Self, CallLogError> {
        let conn = db::open(path).map_err(|e| CallLogError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, CallLogError> {
        let conn =
            Connection::open_in_memory().map_err(|e| CallLogError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CallLogError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS api_call_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                application_id TEXT NOT NULL,
                source TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                success INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_api_call_log_application ON api_call_log(application_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_api_call_log_timestamp ON api_call_log(timestamp);
            "#,
        )
        .map_err(|e| CallLogError::Database(e.to_string()))
    }
}

impl ApiCallLog for SqliteApiCallLog {
    fn record(
        &self,
        application_id: &str,
        source: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<(), CallLogError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO api_call_log (application_id, source, timestamp, success) VALUES (?, ?, ?, ?)",
            rusqlite::params![application_id, source, format_ts(at), success],
        )
        .map_err(|e| CallLogError::Database(e.to_string()))?;
        Ok(())
    }

    fn count_since(
        &self,
        application_ids: &[String],
        since: DateTime<Utc>,
    ) -> Result<HashMap<String, u64>, CallLogError> {
        if application_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.conn.lock().unwrap();

        let placeholders = vec!["?"; application_ids.len()].join(", ");
        let sql = format!(
            "SELECT application_id, COUNT(*) FROM api_call_log \
             WHERE timestamp >= ? AND application_id IN ({}) GROUP BY application_id",
            placeholders
        );

        let since = format_ts(since);
        let mut values: Vec<&str> = Vec::with_capacity(application_ids.len() + 1);
        values.push(since.as_str());
        values.extend(application_ids.iter().map(String::as_str));

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CallLogError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| CallLogError::Database(e.to_string()))?;

        let mut counts = HashMap::new();
        for row_result in rows {
            let (id, count) = row_result.map_err(|e| CallLogError::Database(e.to_string()))?;
            counts.insert(id, count.max(0) as u64);
        }
        Ok(counts)
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, CallLogError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM api_call_log WHERE timestamp < ?",
            rusqlite::params![format_ts(cutoff)],
        )
        .map_err(|e| CallLogError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_count_since_groups_by_application() {
        let log = SqliteApiCallLog::in_memory().unwrap();
        let now = Utc::now();

        log.record("a", "geocoder", true, now).unwrap();
        log.record("a", "census", false, now).unwrap();
        log.record("b", "geocoder", true, now).unwrap();
        log.record("c", "geocoder", true, now).unwrap();

        let ids = vec!["a".to_string(), "b".to_string(), "z".to_string()];
        let counts = log.count_since(&ids, now - Duration::hours(1)).unwrap();
        assert_eq!(counts.get("a"), Some(&2));
        assert_eq!(counts.get("b"), Some(&1));
        assert_eq!(counts.get("c"), None);
        assert_eq!(counts.get("z"), None);
    }

    #[test]
    fn test_count_since_window_edge_is_inclusive() {
        let log = SqliteApiCallLog::in_memory().unwrap();
        let now = Utc::now();
        let since = now - Duration::hours(24);

        log.record("a", "ai", true, since).unwrap();
        log.record("a", "ai", true, since - Duration::microseconds(1))
            .unwrap();

        let counts = log.count_since(&["a".to_string()], since).unwrap();
        assert_eq!(counts.get("a"), Some(&1));
    }

    #[test]
    fn test_empty_id_set() {
        let log = SqliteApiCallLog::in_memory().unwrap();
        assert!(log.count_since(&[], Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_purge_before() {
        let log = SqliteApiCallLog::in_memory().unwrap();
        let now = Utc::now();
        log.record("a", "ai", true, now - Duration::days(31)).unwrap();
        log.record("a", "ai", true, now).unwrap();

        assert_eq!(log.purge_before(now - Duration::days(30)).unwrap(), 1);
        let counts = log
            .count_since(&["a".to_string()], now - Duration::days(365))
            .unwrap();
        assert_eq!(counts.get("a"), Some(&1));
    }
}
