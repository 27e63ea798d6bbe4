use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use harness_core::state::{
    ClientStatus, ErrorRemediationStatus, RemediationStatus, RunStatus, TransitionError,
};
use harness_core::types::{
    ClientSession, ErrorContext, ErrorId, RemediationRequest, RemediationRequestId, Run, RunConfig,
    RunId,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("sqlite error: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },
    #[error("json serialization error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("timestamp parse error for value '{value}': {source}")]
    TimestampParse {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("stored status is invalid: {source}")]
    Status {
        #[from]
        source: TransitionError,
    },
    #[error("store connection lock poisoned")]
    Poisoned,
}

/// Rows removed by [`SqliteStore::purge_runs_older_than`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub runs: usize,
    pub sessions: usize,
    pub errors: usize,
}

impl PurgeReport {
    pub fn total(&self) -> usize {
        self.runs + self.sessions + self.errors
    }
}

/// Harness-owned state: runs, client sessions, errors and remediation requests.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::Poisoned)
    }

    pub fn migrate(&self) -> Result<(), PersistenceError> {
        self.conn()?.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS test_runs (
    run_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    clients_spawned INTEGER NOT NULL DEFAULT 0,
    clients_completed INTEGER NOT NULL DEFAULT 0,
    clients_failed INTEGER NOT NULL DEFAULT 0,
    cleaned_up_at TEXT,
    config_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_test_runs_started ON test_runs(started_at);

CREATE TABLE IF NOT EXISTS test_client_sessions (
    client_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    scenario_id TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    payload_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_run ON test_client_sessions(run_id, started_at);

CREATE TABLE IF NOT EXISTS test_errors (
    error_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    client_id TEXT NOT NULL,
    error_type TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    remediation_status TEXT NOT NULL,
    remediation_request_id TEXT,
    payload_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_errors_run ON test_errors(run_id, occurred_at);
CREATE INDEX IF NOT EXISTS idx_errors_request ON test_errors(remediation_request_id);

CREATE TABLE IF NOT EXISTS remediation_requests (
    request_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    payload_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_remediation_created ON remediation_requests(created_at);
CREATE INDEX IF NOT EXISTS idx_remediation_status ON remediation_requests(status);
"#,
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    pub fn upsert_run(&self, run: &Run) -> Result<(), PersistenceError> {
        let config = serde_json::to_string(&run.config)?;
        self.conn()?.execute(
            r#"
INSERT INTO test_runs (
    run_id, status, started_at, completed_at,
    clients_spawned, clients_completed, clients_failed, cleaned_up_at, config_json
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT(run_id) DO UPDATE SET
  status = excluded.status,
  completed_at = excluded.completed_at,
  clients_spawned = excluded.clients_spawned,
  clients_completed = excluded.clients_completed,
  clients_failed = excluded.clients_failed,
  cleaned_up_at = excluded.cleaned_up_at,
  config_json = excluded.config_json
"#,
            params![
                run.id.0,
                run.status.as_str(),
                run.started_at.to_rfc3339(),
                run.completed_at.map(|at| at.to_rfc3339()),
                run.clients_spawned,
                run.clients_completed,
                run.clients_failed,
                run.cleaned_up_at.map(|at| at.to_rfc3339()),
                config,
            ],
        )?;
        Ok(())
    }

    pub fn load_run(&self, run_id: &RunId) -> Result<Option<Run>, PersistenceError> {
        let row: Option<RunRow> = self
            .conn()?
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM test_runs WHERE run_id = ?1"),
                params![run_id.0],
                RunRow::from_row,
            )
            .optional()?;
        row.map(RunRow::into_run).transpose()
    }

    pub fn list_runs(&self, limit: usize) -> Result<Vec<Run>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM test_runs ORDER BY started_at DESC, run_id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], RunRow::from_row)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?.into_run()?);
        }
        Ok(runs)
    }

    pub fn increment_clients_spawned(&self, run_id: &RunId) -> Result<(), PersistenceError> {
        self.conn()?.execute(
            "UPDATE test_runs SET clients_spawned = clients_spawned + 1 WHERE run_id = ?1",
            params![run_id.0],
        )?;
        Ok(())
    }

    /// Counts one finished client. Cancelled clients count towards neither total.
    pub fn record_client_outcome(
        &self,
        run_id: &RunId,
        status: ClientStatus,
    ) -> Result<(), PersistenceError> {
        let sql = match status {
            ClientStatus::Completed => {
                "UPDATE test_runs SET clients_completed = clients_completed + 1 WHERE run_id = ?1"
            }
            ClientStatus::Failed => {
                "UPDATE test_runs SET clients_failed = clients_failed + 1 WHERE run_id = ?1"
            }
            _ => return Ok(()),
        };
        self.conn()?.execute(sql, params![run_id.0])?;
        Ok(())
    }

    /// Moves a non-terminal run to `status`. Returns false when the run was
    /// already terminal (or missing), leaving it untouched.
    pub fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, PersistenceError> {
        let changed = self.conn()?.execute(
            r#"
UPDATE test_runs SET status = ?2, completed_at = ?3
WHERE run_id = ?1 AND status IN ('pending', 'running')
"#,
            params![run_id.0, status.as_str(), at.to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    pub fn mark_run_cleaned(
        &self,
        run_id: &RunId,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.conn()?.execute(
            "UPDATE test_runs SET cleaned_up_at = ?2 WHERE run_id = ?1",
            params![run_id.0, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Removes harness rows of terminal runs started before `cutoff`,
    /// errors and sessions before their run.
    pub fn purge_runs_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<PurgeReport, PersistenceError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let cutoff = cutoff.to_rfc3339();
        let doomed = r#"
SELECT run_id FROM test_runs
WHERE started_at < ?1 AND status IN ('completed', 'failed', 'cancelled')
"#;
        let errors = tx.execute(
            &format!("DELETE FROM test_errors WHERE run_id IN ({doomed})"),
            params![cutoff],
        )?;
        let sessions = tx.execute(
            &format!("DELETE FROM test_client_sessions WHERE run_id IN ({doomed})"),
            params![cutoff],
        )?;
        let runs = tx.execute(
            r#"
DELETE FROM test_runs
WHERE started_at < ?1 AND status IN ('completed', 'failed', 'cancelled')
"#,
            params![cutoff],
        )?;
        tx.commit()?;
        Ok(PurgeReport {
            runs,
            sessions,
            errors,
        })
    }

    // -----------------------------------------------------------------------
    // Client sessions
    // -----------------------------------------------------------------------

    pub fn upsert_client_session(&self, session: &ClientSession) -> Result<(), PersistenceError> {
        let payload = serde_json::to_string(session)?;
        self.conn()?.execute(
            r#"
INSERT INTO test_client_sessions (client_id, run_id, scenario_id, status, started_at, payload_json)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(client_id) DO UPDATE SET
  status = excluded.status,
  payload_json = excluded.payload_json
"#,
            params![
                session.client_id.0,
                session.run_id.0,
                session.scenario_id,
                session.status.as_str(),
                session.started_at.to_rfc3339(),
                payload,
            ],
        )?;
        Ok(())
    }

    pub fn list_client_sessions(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<ClientSession>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM test_client_sessions WHERE run_id = ?1 ORDER BY started_at ASC, client_id ASC",
        )?;
        let rows = stmt.query_map(params![run_id.0], |row| row.get::<_, String>(0))?;
        let mut sessions = Vec::new();
        for row in rows {
            let payload = row?;
            sessions.push(serde_json::from_str::<ClientSession>(&payload)?);
        }
        Ok(sessions)
    }

    // -----------------------------------------------------------------------
    // Errors
    // -----------------------------------------------------------------------

    pub fn insert_error(&self, error: &ErrorContext) -> Result<(), PersistenceError> {
        let payload = serde_json::to_string(error)?;
        self.conn()?.execute(
            r#"
INSERT INTO test_errors (
    error_id, run_id, client_id, error_type, occurred_at,
    remediation_status, remediation_request_id, payload_json
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
"#,
            params![
                error.error_id.0,
                error.run_id.0,
                error.client_id.0,
                error.error_type.as_str(),
                error.occurred_at.to_rfc3339(),
                error.remediation_status.as_str(),
                error.remediation_request_id.as_ref().map(|id| id.0.clone()),
                payload,
            ],
        )?;
        Ok(())
    }

    pub fn load_error(&self, error_id: &ErrorId) -> Result<Option<ErrorContext>, PersistenceError> {
        let row: Option<ErrorRow> = self
            .conn()?
            .query_row(
                &format!("SELECT {ERROR_COLUMNS} FROM test_errors WHERE error_id = ?1"),
                params![error_id.0],
                ErrorRow::from_row,
            )
            .optional()?;
        row.map(ErrorRow::into_error).transpose()
    }

    pub fn list_errors_for_run(&self, run_id: &RunId) -> Result<Vec<ErrorContext>, PersistenceError> {
        self.query_errors(
            &format!(
                "SELECT {ERROR_COLUMNS} FROM test_errors WHERE run_id = ?1 ORDER BY occurred_at DESC, error_id ASC"
            ),
            &[run_id.0.as_str()],
        )
    }

    pub fn list_errors_for_request(
        &self,
        request_id: &RemediationRequestId,
    ) -> Result<Vec<ErrorContext>, PersistenceError> {
        self.query_errors(
            &format!(
                "SELECT {ERROR_COLUMNS} FROM test_errors WHERE remediation_request_id = ?1 ORDER BY occurred_at ASC, error_id ASC"
            ),
            &[request_id.0.as_str()],
        )
    }

    /// Errors with the given ids, in id order. Unknown ids are skipped.
    pub fn load_errors(&self, ids: &[ErrorId]) -> Result<Vec<ErrorContext>, PersistenceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let keys: Vec<&str> = ids.iter().map(|id| id.0.as_str()).collect();
        self.query_errors(
            &format!(
                "SELECT {ERROR_COLUMNS} FROM test_errors WHERE error_id IN ({placeholders}) ORDER BY error_id ASC"
            ),
            &keys,
        )
    }

    fn query_errors(&self, sql: &str, args: &[&str]) -> Result<Vec<ErrorContext>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), ErrorRow::from_row)?;
        let mut errors = Vec::new();
        for row in rows {
            errors.push(row?.into_error()?);
        }
        Ok(errors)
    }

    /// Sets one error's remediation status and returns the updated record.
    pub fn set_error_status(
        &self,
        error_id: &ErrorId,
        status: ErrorRemediationStatus,
    ) -> Result<Option<ErrorContext>, PersistenceError> {
        let changed = self.conn()?.execute(
            "UPDATE test_errors SET remediation_status = ?2 WHERE error_id = ?1",
            params![error_id.0, status.as_str()],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.load_error(error_id)
    }

    /// Links errors to a request and marks them `in_progress`, all or none.
    pub fn attach_errors(
        &self,
        ids: &[ErrorId],
        request_id: &RemediationRequestId,
    ) -> Result<usize, PersistenceError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut attached = 0;
        for id in ids {
            attached += tx.execute(
                r#"
UPDATE test_errors SET remediation_request_id = ?2, remediation_status = 'in_progress'
WHERE error_id = ?1
"#,
                params![id.0, request_id.0],
            )?;
        }
        tx.commit()?;
        Ok(attached)
    }

    /// Applies `status` to every error of a request in one transaction.
    /// Returns how many rows actually changed, so re-applying is a no-op.
    pub fn set_request_errors_status(
        &self,
        request_id: &RemediationRequestId,
        status: ErrorRemediationStatus,
    ) -> Result<usize, PersistenceError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            r#"
UPDATE test_errors SET remediation_status = ?2
WHERE remediation_request_id = ?1 AND remediation_status != ?2
"#,
            params![request_id.0, status.as_str()],
        )?;
        tx.commit()?;
        Ok(changed)
    }

    /// Unlinks a request's errors; those still `in_progress` return to `pending`.
    pub fn detach_errors(&self, request_id: &RemediationRequestId) -> Result<usize, PersistenceError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
UPDATE test_errors SET remediation_status = 'pending'
WHERE remediation_request_id = ?1 AND remediation_status = 'in_progress'
"#,
            params![request_id.0],
        )?;
        let detached = tx.execute(
            "UPDATE test_errors SET remediation_request_id = NULL WHERE remediation_request_id = ?1",
            params![request_id.0],
        )?;
        tx.commit()?;
        Ok(detached)
    }

    // -----------------------------------------------------------------------
    // Remediation requests
    // -----------------------------------------------------------------------

    pub fn upsert_remediation_request(
        &self,
        request: &RemediationRequest,
    ) -> Result<(), PersistenceError> {
        let payload = serde_json::to_string(request)?;
        self.conn()?.execute(
            r#"
INSERT INTO remediation_requests (request_id, status, created_at, payload_json)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(request_id) DO UPDATE SET
  status = excluded.status,
  payload_json = excluded.payload_json
"#,
            params![
                request.id.0,
                request.status.as_str(),
                request.created_at.to_rfc3339(),
                payload,
            ],
        )?;
        Ok(())
    }

    pub fn load_remediation_request(
        &self,
        request_id: &RemediationRequestId,
    ) -> Result<Option<RemediationRequest>, PersistenceError> {
        let payload: Option<String> = self
            .conn()?
            .query_row(
                "SELECT payload_json FROM remediation_requests WHERE request_id = ?1",
                params![request_id.0],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|value| serde_json::from_str::<RemediationRequest>(&value))
            .transpose()
            .map_err(PersistenceError::from)
    }

    pub fn list_remediation_requests(
        &self,
        limit: usize,
        status: Option<RemediationStatus>,
    ) -> Result<Vec<RemediationRequest>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
SELECT payload_json FROM remediation_requests
WHERE (?1 IS NULL OR status = ?1)
ORDER BY created_at DESC, request_id ASC
LIMIT ?2
"#,
        )?;
        let rows = stmt.query_map(
            params![status.map(|status| status.as_str()), limit as i64],
            |row| row.get::<_, String>(0),
        )?;
        let mut requests = Vec::new();
        for row in rows {
            let payload = row?;
            requests.push(serde_json::from_str::<RemediationRequest>(&payload)?);
        }
        Ok(requests)
    }

    pub fn delete_remediation_request(
        &self,
        request_id: &RemediationRequestId,
    ) -> Result<bool, PersistenceError> {
        let deleted = self.conn()?.execute(
            "DELETE FROM remediation_requests WHERE request_id = ?1",
            params![request_id.0],
        )?;
        Ok(deleted > 0)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const RUN_COLUMNS: &str = "run_id, status, started_at, completed_at, clients_spawned, \
clients_completed, clients_failed, cleaned_up_at, config_json";

struct RunRow {
    run_id: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    clients_spawned: u32,
    clients_completed: u32,
    clients_failed: u32,
    cleaned_up_at: Option<String>,
    config_json: String,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            status: row.get(1)?,
            started_at: row.get(2)?,
            completed_at: row.get(3)?,
            clients_spawned: row.get(4)?,
            clients_completed: row.get(5)?,
            clients_failed: row.get(6)?,
            cleaned_up_at: row.get(7)?,
            config_json: row.get(8)?,
        })
    }

    fn into_run(self) -> Result<Run, PersistenceError> {
        Ok(Run {
            id: RunId(self.run_id),
            status: self.status.parse::<RunStatus>()?,
            started_at: parse_timestamp(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
            config: serde_json::from_str::<RunConfig>(&self.config_json)?,
            clients_spawned: self.clients_spawned,
            clients_completed: self.clients_completed,
            clients_failed: self.clients_failed,
            cleaned_up_at: self.cleaned_up_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

const ERROR_COLUMNS: &str = "payload_json, remediation_status, remediation_request_id";

struct ErrorRow {
    payload_json: String,
    remediation_status: String,
    remediation_request_id: Option<String>,
}

impl ErrorRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            payload_json: row.get(0)?,
            remediation_status: row.get(1)?,
            remediation_request_id: row.get(2)?,
        })
    }

    /// The status columns are authoritative over the payload copy.
    fn into_error(self) -> Result<ErrorContext, PersistenceError> {
        let mut error = serde_json::from_str::<ErrorContext>(&self.payload_json)?;
        error.remediation_status = self.remediation_status.parse::<ErrorRemediationStatus>()?;
        error.remediation_request_id = self.remediation_request_id.map(RemediationRequestId);
        Ok(error)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|source| PersistenceError::TimestampParse {
            value: value.to_string(),
            source,
        })
}
