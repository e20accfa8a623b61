//! Persistence of workflow-run and node-run records.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::warn;

use crate::workflow::{NodeStatus, WorkflowStatus};

use super::{duration_seconds, parse_stored_timestamp, StoreError};

/// Store for the worker's own execution records: one `workflowrun` row per
/// workflow execution and one `noderun` row per node.
///
/// Clone-able; all clones share one connection behind a mutex. Tables are
/// created idempotently on open.
#[derive(Clone)]
pub struct RunStore {
    conn: Arc<Mutex<Connection>>,
}

impl RunStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(dir) = path.as_ref().parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store, for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Recover the connection even if another thread panicked while
    /// holding the lock; SQLite state stays consistent.
    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poison) => {
                warn!("run store mutex was poisoned, recovering connection");
                poison.into_inner()
            }
        }
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS workflowrun (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                duration REAL,
                result_summary TEXT
            );

            CREATE TABLE IF NOT EXISTS noderun (
                id INTEGER PRIMARY KEY,
                workflow_id INTEGER NOT NULL,
                node_id TEXT NOT NULL,
                type TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                duration REAL,
                result_data TEXT,
                FOREIGN KEY (workflow_id) REFERENCES workflowrun(id)
            );

            CREATE INDEX IF NOT EXISTS idx_noderun_workflow ON noderun(workflow_id);
            ",
        )?;
        Ok(())
    }

    /// Insert a workflow-run row, returning its id.
    pub fn save_workflow_run(
        &self,
        name: &str,
        status: WorkflowStatus,
        summary: &Value,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO workflowrun (name, status, started_at, finished_at, duration, result_summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                name,
                status.as_str(),
                started_at.to_rfc3339(),
                finished_at.to_rfc3339(),
                duration_seconds(started_at, finished_at),
                summary.to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Finalise a workflow-run row with its terminal status and summary.
    pub fn update_workflow_run(
        &self,
        workflow_id: i64,
        status: WorkflowStatus,
        summary: &Value,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        let started_raw: String = conn
            .query_row(
                "SELECT started_at FROM workflowrun WHERE id = ?1",
                params![workflow_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("workflowrun id {workflow_id}"))
                }
                other => StoreError::Sqlite(other),
            })?;
        let started_at = parse_stored_timestamp(&started_raw)?;

        conn.execute(
            "UPDATE workflowrun
             SET status = ?1, finished_at = ?2, duration = ?3, result_summary = ?4
             WHERE id = ?5",
            params![
                status.as_str(),
                finished_at.to_rfc3339(),
                duration_seconds(started_at, finished_at),
                summary.to_string(),
                workflow_id,
            ],
        )?;
        Ok(())
    }

    /// Insert a terminal node-run row, returning its id.
    #[allow(clippy::too_many_arguments)]
    pub fn save_node_run(
        &self,
        workflow_id: i64,
        node_id: &str,
        node_type: &str,
        status: NodeStatus,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        result: &Value,
    ) -> Result<i64, StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO noderun (workflow_id, node_id, type, status, started_at, finished_at, duration, result_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                workflow_id,
                node_id,
                node_type,
                status.as_str(),
                started_at.to_rfc3339(),
                finished_at.to_rfc3339(),
                duration_seconds(started_at, finished_at),
                result.to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a RUNNING node-run placeholder, exposing mid-execution state.
    pub fn create_node_run_running(
        &self,
        workflow_id: i64,
        node_id: &str,
        node_type: &str,
        started_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO noderun (workflow_id, node_id, type, status, started_at, result_data)
             VALUES (?1, ?2, ?3, ?4, ?5, '{}')",
            params![
                workflow_id,
                node_id,
                node_type,
                NodeStatus::Running.as_str(),
                started_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Finalise a RUNNING node-run placeholder.
    pub fn update_node_run_completed(
        &self,
        node_run_id: i64,
        status: NodeStatus,
        finished_at: DateTime<Utc>,
        result: &Value,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        let started_raw: String = conn
            .query_row(
                "SELECT started_at FROM noderun WHERE id = ?1",
                params![node_run_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("noderun id {node_run_id}"))
                }
                other => StoreError::Sqlite(other),
            })?;
        let started_at = parse_stored_timestamp(&started_raw)?;

        conn.execute(
            "UPDATE noderun
             SET status = ?1, finished_at = ?2, duration = ?3, result_data = ?4
             WHERE id = ?5",
            params![
                status.as_str(),
                finished_at.to_rfc3339(),
                duration_seconds(started_at, finished_at),
                result.to_string(),
                node_run_id,
            ],
        )?;
        Ok(())
    }
}
