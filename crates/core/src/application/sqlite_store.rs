//! SQLite-backed application store implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    Application, ApplicationFilter, ApplicationStatus, ApplicationStore, CreateApplicationRequest,
    PhaseContent, StalledFilter, StoreError,
};
use crate::db::{self, format_ts, parse_ts};

const COLUMNS: &str = "id, address, payment_confirmed, status, status_revision, attempts, \
     orchestration_lock_at, next_run_at, error_code, error_message, data_flags, content, \
     created_at, updated_at";

/// SQLite-backed application store.
pub struct SqliteApplicationStore {
    conn: Mutex<Connection>,
}

impl SqliteApplicationStore {
    /// Open (or create) the store at `path`.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = db::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS applications (
                id TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                payment_confirmed INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                status_revision INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                orchestration_lock_at TEXT,
                next_run_at TEXT NOT NULL,
                error_code TEXT,
                error_message TEXT,
                data_flags TEXT NOT NULL DEFAULT '[]',
                content TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_applications_due ON applications(status, next_run_at);
            CREATE INDEX IF NOT EXISTS idx_applications_stalled ON applications(status, updated_at);
            CREATE INDEX IF NOT EXISTS idx_applications_created_at ON applications(created_at);
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn build_where_clause(filter: &ApplicationFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn status_list(statuses: &[ApplicationStatus]) -> String {
        statuses
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<Application> {
        let status_str: String = row.get(3)?;
        let status: ApplicationStatus = status_str
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

        let revision: i64 = row.get(4)?;
        let attempts: i64 = row.get(5)?;
        let lock_at: Option<String> = row.get(6)?;
        let next_run_at: String = row.get(7)?;
        let flags_json: String = row.get(10)?;
        let content_json: String = row.get(11)?;
        let created_at: String = row.get(12)?;
        let updated_at: String = row.get(13)?;

        let data_flags: Vec<String> = serde_json::from_str(&flags_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;
        let content: PhaseContent = serde_json::from_str(&content_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(11, Type::Text, Box::new(e)))?;

        let created_at = parse_ts(&created_at).unwrap_or_else(Utc::now);

        Ok(Application {
            id: row.get(0)?,
            address: row.get(1)?,
            payment_confirmed: row.get(2)?,
            status,
            status_revision: revision.max(0) as u64,
            attempts: attempts.max(0) as u32,
            orchestration_lock_at: lock_at.as_deref().and_then(parse_ts),
            next_run_at: parse_ts(&next_run_at).unwrap_or(created_at),
            error_code: row.get(8)?,
            error_message: row.get(9)?,
            data_flags,
            content,
            created_at,
            updated_at: parse_ts(&updated_at).unwrap_or(created_at),
        })
    }

    fn get_locked(conn: &Connection, id: &str) -> Result<Option<Application>, StoreError> {
        conn.query_row(
            &format!("SELECT {} FROM applications WHERE id = ?", COLUMNS),
            params![id],
            Self::row_to_application,
        )
        .optional()
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn query_all(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Application>, StoreError> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params, Self::row_to_application)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut applications = Vec::new();
        for row_result in rows {
            applications.push(row_result.map_err(|e| StoreError::Database(e.to_string()))?);
        }
        Ok(applications)
    }

    /// Conditional write shared by every mutating operation.
    fn write_cas(
        conn: &Connection,
        application: &Application,
        expected_revision: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<Application>, StoreError> {
        let new_revision = expected_revision + 1;

        let flags_json = serde_json::to_string(&application.data_flags)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let content_json = serde_json::to_string(&application.content)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let changed = conn
            .execute(
                "UPDATE applications SET status = ?, status_revision = ?, attempts = ?, \
                 orchestration_lock_at = ?, next_run_at = ?, error_code = ?, error_message = ?, \
                 data_flags = ?, content = ?, payment_confirmed = ?, updated_at = ? \
                 WHERE id = ? AND status_revision = ?",
                params![
                    application.status.as_str(),
                    new_revision as i64,
                    application.attempts as i64,
                    application.orchestration_lock_at.map(format_ts),
                    format_ts(application.next_run_at),
                    application.error_code,
                    application.error_message,
                    flags_json,
                    content_json,
                    application.payment_confirmed,
                    format_ts(now),
                    application.id,
                    expected_revision as i64,
                ],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if changed == 0 {
            return Ok(None);
        }

        Ok(Some(Application {
            status_revision: new_revision,
            updated_at: now,
            ..application.clone()
        }))
    }
}

impl ApplicationStore for SqliteApplicationStore {
    fn create(&self, request: CreateApplicationRequest) -> Result<Application, StoreError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let application = Application {
            id,
            address: request.address,
            payment_confirmed: request.payment_confirmed,
            status: ApplicationStatus::Queued,
            status_revision: 0,
            attempts: 0,
            orchestration_lock_at: None,
            next_run_at: now,
            error_code: None,
            error_message: None,
            data_flags: Vec::new(),
            content: PhaseContent::default(),
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            &format!(
                "INSERT INTO applications ({}) VALUES (?, ?, ?, ?, 0, 0, NULL, ?, NULL, NULL, '[]', '{{}}', ?, ?)",
                COLUMNS
            ),
            params![
                application.id,
                application.address,
                application.payment_confirmed,
                application.status.as_str(),
                format_ts(now),
                format_ts(now),
                format_ts(now),
            ],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(application)
    }

    fn get(&self, id: &str) -> Result<Option<Application>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::get_locked(&conn, id)
    }

    fn list(&self, filter: &ApplicationFilter) -> Result<Vec<Application>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM applications {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
            COLUMNS, where_clause
        );

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        Self::query_all(&conn, &sql, param_refs.as_slice())
    }

    fn count(&self, filter: &ApplicationFilter) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM applications {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn count_by_status(&self) -> Result<HashMap<ApplicationStatus, i64>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM applications GROUP BY status")
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut counts = HashMap::new();
        for row_result in rows {
            let (status, count) = row_result.map_err(|e| StoreError::Database(e.to_string()))?;
            if let Ok(status) = status.parse::<ApplicationStatus>() {
                counts.insert(status, count);
            }
        }
        Ok(counts)
    }

    fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Application>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let sql = format!(
            "SELECT {} FROM applications WHERE status IN ({}) AND next_run_at <= ? \
             ORDER BY next_run_at ASC, created_at ASC LIMIT ?",
            COLUMNS,
            Self::status_list(&ApplicationStatus::ACTIVE)
        );

        Self::query_all(&conn, &sql, params![format_ts(now), limit])
    }

    fn list_stalled(&self, filter: &StalledFilter) -> Result<Vec<Application>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let attempts_op = if filter.exhausted { ">=" } else { "<" };
        let payment_clause = if filter.require_payment {
            " AND payment_confirmed = 1"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {} FROM applications WHERE status IN ({}) AND updated_at < ? \
             AND attempts {} ?{} ORDER BY updated_at ASC LIMIT ?",
            COLUMNS,
            Self::status_list(&ApplicationStatus::PROCESSING),
            attempts_op,
            payment_clause
        );

        Self::query_all(
            &conn,
            &sql,
            params![
                format_ts(filter.cutoff),
                filter.max_attempts as i64,
                filter.limit
            ],
        )
    }

    fn compare_and_swap_at(
        &self,
        application: &Application,
        expected_revision: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<Application>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::write_cas(&conn, application, expected_revision, now)
    }

    fn fail_active(
        &self,
        id: &str,
        code: &str,
        message: &str,
        flag: &str,
    ) -> Result<Option<Application>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let Some(mut application) = Self::get_locked(&conn, id)? else {
            return Ok(None);
        };
        if application.status.is_terminal() {
            return Ok(None);
        }

        let expected = application.status_revision;
        application.status = ApplicationStatus::Error;
        application.error_code = Some(code.to_string());
        application.error_message = Some(message.to_string());
        application.orchestration_lock_at = None;
        application.add_flag(flag);

        Self::write_cas(&conn, &application, expected, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> SqliteApplicationStore {
        SqliteApplicationStore::in_memory().unwrap()
    }

    fn create_test_request() -> CreateApplicationRequest {
        CreateApplicationRequest::new("221B Baker Street, London")
    }

    #[test]
    fn test_create_application() {
        let store = create_test_store();
        let app = store.create(create_test_request()).unwrap();

        assert!(!app.id.is_empty());
        assert_eq!(app.status, ApplicationStatus::Queued);
        assert_eq!(app.status_revision, 0);
        assert_eq!(app.attempts, 0);
        assert!(app.orchestration_lock_at.is_none());
        assert!(app.data_flags.is_empty());
    }

    #[test]
    fn test_get_application() {
        let store = create_test_store();
        let created = store.create(create_test_request()).unwrap();

        let fetched = store.get(&created.id).unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.address, created.address);
        assert_eq!(fetched.status, ApplicationStatus::Queued);
        assert_eq!(
            fetched.next_run_at.timestamp_micros(),
            created.next_run_at.timestamp_micros()
        );
    }

    #[test]
    fn test_get_nonexistent_application() {
        let store = create_test_store();
        assert!(store.get("nonexistent-id").unwrap().is_none());
    }

    #[test]
    fn test_compare_and_swap_bumps_revision() {
        let store = create_test_store();
        let mut app = store.create(create_test_request()).unwrap();

        app.status = ApplicationStatus::Enriching;
        app.add_flag("census_api_error");
        let written = store.compare_and_swap(&app, 0).unwrap().unwrap();
        assert_eq!(written.status_revision, 1);

        let fetched = store.get(&app.id).unwrap().unwrap();
        assert_eq!(fetched.status, ApplicationStatus::Enriching);
        assert_eq!(fetched.status_revision, 1);
        assert_eq!(fetched.data_flags, vec!["census_api_error".to_string()]);
    }

    #[test]
    fn test_compare_and_swap_at_stamps_given_instant() {
        use chrono::TimeZone;

        let store = create_test_store();
        let mut app = store.create(create_test_request()).unwrap();
        let now = Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap();

        app.next_run_at = now;
        let written = store.compare_and_swap_at(&app, 0, now).unwrap().unwrap();
        assert_eq!(written.updated_at, now);

        let fetched = store.get(&app.id).unwrap().unwrap();
        assert_eq!(fetched.updated_at, now);
        assert_eq!(fetched.next_run_at, fetched.updated_at);
    }

    #[test]
    fn test_compare_and_swap_rejects_stale_revision() {
        let store = create_test_store();
        let mut app = store.create(create_test_request()).unwrap();

        app.status = ApplicationStatus::Enriching;
        store.compare_and_swap(&app, 0).unwrap().unwrap();

        app.status = ApplicationStatus::Error;
        assert!(store.compare_and_swap(&app, 0).unwrap().is_none());

        let fetched = store.get(&app.id).unwrap().unwrap();
        assert_eq!(fetched.status, ApplicationStatus::Enriching);
        assert_eq!(fetched.status_revision, 1);
    }

    #[test]
    fn test_list_with_status_filter() {
        let store = create_test_store();
        store.create(create_test_request()).unwrap();
        let mut second = store.create(create_test_request()).unwrap();
        second.status = ApplicationStatus::Ai;
        store.compare_and_swap(&second, 0).unwrap().unwrap();

        let queued = store
            .list(&ApplicationFilter::new().with_status(ApplicationStatus::Queued))
            .unwrap();
        assert_eq!(queued.len(), 1);

        let ai = store
            .list(&ApplicationFilter::new().with_status(ApplicationStatus::Ai))
            .unwrap();
        assert_eq!(ai.len(), 1);
        assert_eq!(ai[0].id, second.id);

        assert_eq!(store.count(&ApplicationFilter::new()).unwrap(), 2);
    }

    #[test]
    fn test_list_pagination() {
        let store = create_test_store();
        for _ in 0..5 {
            store.create(create_test_request()).unwrap();
        }

        let page = store
            .list(&ApplicationFilter::new().with_limit(2).with_offset(4))
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn test_count_by_status() {
        let store = create_test_store();
        store.create(create_test_request()).unwrap();
        store.create(create_test_request()).unwrap();
        let mut done = store.create(create_test_request()).unwrap();
        done.status = ApplicationStatus::Complete;
        store.compare_and_swap(&done, 0).unwrap().unwrap();

        let counts = store.count_by_status().unwrap();
        assert_eq!(counts.get(&ApplicationStatus::Queued), Some(&2));
        assert_eq!(counts.get(&ApplicationStatus::Complete), Some(&1));
        assert_eq!(counts.get(&ApplicationStatus::Error), None);
    }

    #[test]
    fn test_list_due_orders_and_excludes() {
        let store = create_test_store();
        let now = Utc::now();

        let mut later = store.create(create_test_request()).unwrap();
        later.next_run_at = now - chrono::Duration::seconds(10);
        store.compare_and_swap(&later, 0).unwrap().unwrap();

        let mut earlier = store.create(create_test_request()).unwrap();
        earlier.next_run_at = now - chrono::Duration::seconds(60);
        store.compare_and_swap(&earlier, 0).unwrap().unwrap();

        let mut future = store.create(create_test_request()).unwrap();
        future.next_run_at = now + chrono::Duration::minutes(5);
        store.compare_and_swap(&future, 0).unwrap().unwrap();

        let mut terminal = store.create(create_test_request()).unwrap();
        terminal.status = ApplicationStatus::Complete;
        terminal.next_run_at = now - chrono::Duration::minutes(5);
        store.compare_and_swap(&terminal, 0).unwrap().unwrap();

        let due = store.list_due(now, 20).unwrap();
        let ids: Vec<&str> = due.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec![earlier.id.as_str(), later.id.as_str()]);

        assert_eq!(store.list_due(now, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_list_stalled_filters() {
        let store = create_test_store();

        let mut stalled = store.create(create_test_request()).unwrap();
        stalled.status = ApplicationStatus::Ai;
        store.compare_and_swap(&stalled, 0).unwrap().unwrap();

        let mut exhausted = store.create(create_test_request()).unwrap();
        exhausted.status = ApplicationStatus::Rendering;
        exhausted.attempts = 3;
        store.compare_and_swap(&exhausted, 0).unwrap().unwrap();

        let mut unpaid = store.create(CreateApplicationRequest {
            address: "1 Unpaid Rd".to_string(),
            payment_confirmed: false,
        })
        .unwrap();
        unpaid.status = ApplicationStatus::Enriching;
        store.compare_and_swap(&unpaid, 0).unwrap().unwrap();

        // Queued rows are never stalled.
        store.create(create_test_request()).unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let filter = StalledFilter {
            cutoff,
            max_attempts: 3,
            require_payment: true,
            exhausted: false,
            limit: 10,
        };

        let recoverable = store.list_stalled(&filter).unwrap();
        assert_eq!(recoverable.len(), 1);
        assert_eq!(recoverable[0].id, stalled.id);

        let without_payment = store
            .list_stalled(&StalledFilter {
                require_payment: false,
                ..filter.clone()
            })
            .unwrap();
        assert_eq!(without_payment.len(), 2);

        let exhausted_rows = store
            .list_stalled(&StalledFilter {
                exhausted: true,
                ..filter.clone()
            })
            .unwrap();
        assert_eq!(exhausted_rows.len(), 1);
        assert_eq!(exhausted_rows[0].id, exhausted.id);

        let too_recent = store
            .list_stalled(&StalledFilter {
                cutoff: Utc::now() - chrono::Duration::minutes(30),
                ..filter
            })
            .unwrap();
        assert!(too_recent.is_empty());
    }

    #[test]
    fn test_fail_active() {
        let store = create_test_store();
        let mut app = store.create(create_test_request()).unwrap();
        app.status = ApplicationStatus::Enriching;
        app.orchestration_lock_at = Some(Utc::now());
        store.compare_and_swap(&app, 0).unwrap().unwrap();

        let failed = store
            .fail_active(&app.id, "API_BUDGET_EXCEEDED", "too many calls", "api_budget_exceeded")
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, ApplicationStatus::Error);
        assert_eq!(failed.status_revision, 2);
        assert!(failed.orchestration_lock_at.is_none());

        let fetched = store.get(&app.id).unwrap().unwrap();
        assert_eq!(fetched.error_code.as_deref(), Some("API_BUDGET_EXCEEDED"));
        assert_eq!(fetched.data_flags, vec!["api_budget_exceeded".to_string()]);

        // Already terminal: no-op.
        assert!(store
            .fail_active(&app.id, "X", "y", "z")
            .unwrap()
            .is_none());
        assert!(store.fail_active("missing", "X", "y", "z").unwrap().is_none());
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.db");

        let id = {
            let store = SqliteApplicationStore::new(&path).unwrap();
            store.create(create_test_request()).unwrap().id
        };

        let reopened = SqliteApplicationStore::new(&path).unwrap();
        assert!(reopened.get(&id).unwrap().is_some());
    }
}
