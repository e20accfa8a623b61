//! Adapter over the shared store producers write workflow rows into.
//!
//! The worker claims `en_espera` rows, executes them, and writes the
//! terminal status and per-node results back. Wire-format translation of
//! the `definition` JSON (native `nodes` or legacy `steps`) lives here too.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use indexmap::IndexMap;
use rusqlite::{params, Connection};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::workflow::{ExternalStatus, WorkflowDefinition, WorkflowNode};

use super::{iso_utc_seconds, StoreError};

/// Display-name → task-type canonicalisation for the legacy `steps` shape.
const STEP_TYPE_MAP: &[(&str, &str)] = &[
    ("HTTPS GET Request", "http_get"),
    ("Validate CSV File", "validate_csv"),
    ("Simple Transform", "transform_simple"),
    ("Save to Database", "save_db"),
    ("Mock Notification", "notify_mock"),
];

/// One claimable row of the shared `workflowtable`.
#[derive(Debug, Clone)]
pub struct SharedWorkflow {
    pub id: String,
    pub name: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub definition: Value,
}

impl SharedWorkflow {
    /// Translate the row's `definition` into an executable definition.
    ///
    /// Accepts the native `{"nodes": [...]}` shape verbatim, or the legacy
    /// `{"steps": [...]}` shape with sequential dependencies and
    /// display-name canonicalisation.
    pub fn to_definition(&self) -> Result<WorkflowDefinition, serde_json::Error> {
        let nodes = if let Some(nodes) = self.definition.get("nodes") {
            serde_json::from_value::<Vec<WorkflowNode>>(nodes.clone())?
        } else {
            let steps = self
                .definition
                .get("steps")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            steps
                .iter()
                .enumerate()
                .map(|(i, step)| {
                    let display = step.get("type").and_then(Value::as_str).unwrap_or_default();
                    WorkflowNode {
                        id: format!("step_{i}"),
                        node_type: canonical_step_type(display),
                        params: step.get("args").cloned().unwrap_or_else(|| json!({})),
                        depends_on: if i > 0 {
                            vec![format!("step_{}", i - 1)]
                        } else {
                            Vec::new()
                        },
                    }
                })
                .collect()
        };

        Ok(WorkflowDefinition {
            name: self.name.clone(),
            id: Some(self.id.clone()),
            nodes,
        })
    }
}

/// Canonicalise a producer display name to a task type. Unknown names are
/// lowercased with spaces turned into underscores.
fn canonical_step_type(display_name: &str) -> String {
    for (display, task_type) in STEP_TYPE_MAP {
        if *display == display_name {
            return (*task_type).to_string();
        }
    }
    warn!(display_name, "unknown step type, using it as-is");
    display_name.to_lowercase().replace(' ', "_")
}

/// Adapter over the shared `workflowtable`.
///
/// Clone-able; all clones share one connection behind a mutex.
#[derive(Clone)]
pub struct SharedStore {
    conn: Arc<Mutex<Connection>>,
}

impl SharedStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poison) => {
                warn!("shared store mutex was poisoned, recovering connection");
                poison.into_inner()
            }
        }
    }

    /// Create the `workflowtable` if it does not exist. The producer owns
    /// the table in production; this is for tests and local setups.
    pub fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS workflowtable (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                definition TEXT
            );
            ",
        )?;
        Ok(())
    }

    /// All rows waiting to be claimed, with their definitions parsed.
    /// Rows whose definition fails to parse are logged and skipped.
    pub fn pending(&self) -> Result<Vec<SharedWorkflow>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, status, created_at, updated_at, definition
             FROM workflowtable WHERE status = ?1",
        )?;

        let rows = stmt.query_map(params![ExternalStatus::EnEspera.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut workflows = Vec::new();
        for row in rows {
            let (id, name, status, created_at, updated_at, definition_raw) = row?;
            let definition = match definition_raw.as_deref() {
                None | Some("") => json!({}),
                Some(raw) => match serde_json::from_str(raw) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(id = %id, error = %err, "skipping workflow with undecodable definition");
                        continue;
                    }
                },
            };
            workflows.push(SharedWorkflow {
                id,
                name,
                status,
                created_at,
                updated_at,
                definition,
            });
        }
        Ok(workflows)
    }

    /// Claim a pending workflow: conditional `en_espera` → `en_progreso`
    /// transition. Returns false when another worker won the race (or the
    /// row is gone).
    pub fn claim(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE workflowtable SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![
                ExternalStatus::EnProgreso.as_str(),
                iso_utc_seconds(Utc::now()),
                id,
                ExternalStatus::EnEspera.as_str(),
            ],
        )?;
        let claimed = updated == 1;
        debug!(id, claimed, "claim attempted");
        Ok(claimed)
    }

    /// Write a status transition back. When `results` is given, the row's
    /// `definition` is rewritten to additionally carry `execution_results`
    /// and `executed_at`; existing keys are preserved.
    pub fn update_status(
        &self,
        id: &str,
        status: ExternalStatus,
        results: Option<&IndexMap<String, Value>>,
    ) -> Result<bool, StoreError> {
        let conn = self.lock_conn();
        let definition_raw: Option<Option<String>> = conn
            .query_row(
                "SELECT definition FROM workflowtable WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some(definition_raw) = definition_raw else {
            warn!(id, "workflow row not found, cannot update status");
            return Ok(false);
        };

        let mut definition: Value = definition_raw
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| serde_json::from_str(raw).ok())
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({}));

        if let Some(results) = results {
            definition["execution_results"] = serde_json::to_value(results)
                .unwrap_or_else(|_| json!({}));
            definition["executed_at"] = json!(Utc::now().to_rfc3339());
        }

        conn.execute(
            "UPDATE workflowtable SET status = ?1, updated_at = ?2, definition = ?3
             WHERE id = ?4",
            params![
                status.as_str(),
                iso_utc_seconds(Utc::now()),
                definition.to_string(),
                id,
            ],
        )?;

        debug!(id, status = status.as_str(), "workflow status updated");
        Ok(true)
    }

    /// Insert a pending row. Producer-side operation, exposed for tests
    /// and local setups.
    pub fn insert_pending(
        &self,
        id: &str,
        name: &str,
        definition: &Value,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        let now = iso_utc_seconds(Utc::now());
        conn.execute(
            "INSERT INTO workflowtable (id, name, status, created_at, updated_at, definition)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
            params![
                id,
                name,
                ExternalStatus::EnEspera.as_str(),
                now,
                definition.to_string(),
            ],
        )?;
        Ok(())
    }
}
