use std::path::Path;

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{failure_payload, ExecutionContext, ExecutionState, Task, TaskError, TaskMetadata};

const DEFAULT_DB_PATH: &str = "data/output.db";

/// Executes an upstream SQL artifact against a SQLite file.
#[derive(Default)]
pub struct SaveDbTask {
    state: ExecutionState,
}

impl SaveDbTask {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Scan the context in iteration order for the first upstream result that
/// published a SQL artifact (`output_path`, plus `table_name` when known).
fn discover_sql_artifact(
    context: &ExecutionContext,
) -> Result<(String, String, Option<String>), TaskError> {
    for (node_id, value) in context {
        let Some(obj) = value.as_object() else {
            continue;
        };
        if let Some(output_path) = obj.get("output_path").and_then(Value::as_str) {
            let table_name = obj
                .get("table_name")
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok((node_id.clone(), output_path.to_string(), table_name));
        }
    }
    Err(TaskError::NoUpstreamSql)
}

/// Split a SQL script into executable statements, dropping `--` comments.
fn split_statements(sql: &str) -> Vec<String> {
    let without_comments: String = sql
        .lines()
        .map(|line| match line.find("--") {
            Some(pos) => &line[..pos],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n");

    without_comments
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Task for SaveDbTask {
    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            task_type: "save_db",
            display_name: "Save to Database",
            description: "Executes an upstream SQL artifact against a SQLite database.",
            category: "Output",
            icon: "database",
            params_schema: json!({
                "type": "object",
                "properties": {
                    "db_path": {
                        "type": "string",
                        "title": "Target database path",
                        "default": DEFAULT_DB_PATH
                    }
                }
            }),
        }
    }

    fn state(&self) -> &ExecutionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ExecutionState {
        &mut self.state
    }

    fn validate_params(&self, params: &Value) -> Result<(), TaskError> {
        if let Some(db_path) = params.get("db_path") {
            let db_path = db_path
                .as_str()
                .ok_or_else(|| TaskError::InvalidParams("'db_path' must be a string".into()))?;
            if !db_path.ends_with(".db") {
                return Err(TaskError::InvalidParams(
                    "'db_path' must end with .db".into(),
                ));
            }
        }
        Ok(())
    }

    async fn execute(
        &mut self,
        context: &ExecutionContext,
        params: &Value,
    ) -> Result<Value, TaskError> {
        let db_path = params
            .get("db_path")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_DB_PATH)
            .to_string();

        let (source_node, sql_file, table_name) = discover_sql_artifact(context)?;

        if !Path::new(&sql_file).exists() {
            return Err(TaskError::FileNotFound(sql_file));
        }
        let sql = tokio::fs::read_to_string(&sql_file).await?;

        if let Some(dir) = Path::new(&db_path).parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let conn = Connection::open(&db_path)
            .map_err(|e| TaskError::Connection(format!("failed to open '{db_path}': {e}")))?;

        let statements = split_statements(&sql);
        let mut executed = 0usize;
        let mut errors: Vec<String> = Vec::new();

        for statement in &statements {
            match conn.execute(statement, []) {
                Ok(_) => executed += 1,
                Err(e) => {
                    warn!(error = %e, "statement failed");
                    errors.push(format!("{e}"));
                }
            }
        }
        let failed = errors.len();

        let total_rows_in_table = match &table_name {
            Some(table) => conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM \"{}\"", table.replace('"', "\"\"")),
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .unwrap_or(0),
            None => 0,
        };

        let mut result = json!({
            "success": failed == 0,
            "source_node": source_node,
            "sql_file": sql_file,
            "db_path": db_path,
            "table_name": table_name,
            "total_statements": statements.len(),
            "executed_statements": executed,
            "failed_statements": failed,
            "total_rows_in_table": total_rows_in_table,
        });
        if !errors.is_empty() {
            result["errors"] = json!(errors);
        }
        Ok(result)
    }

    async fn before(
        &mut self,
        context: &ExecutionContext,
        _params: &Value,
    ) -> Result<(), TaskError> {
        info!(upstream_nodes = context.len(), "applying sql artifact");
        Ok(())
    }

    async fn after(&mut self, result: &Value) -> Result<(), TaskError> {
        info!(
            executed = result.get("executed_statements").and_then(serde_json::Value::as_u64),
            failed = result.get("failed_statements").and_then(serde_json::Value::as_u64),
            rows = result.get("total_rows_in_table").and_then(serde_json::Value::as_i64),
            "sql artifact applied"
        );
        Ok(())
    }

    async fn on_error(
        &mut self,
        error: &TaskError,
        _context: &ExecutionContext,
        params: &Value,
    ) -> Option<Value> {
        let mut payload = failure_payload(error);
        payload.insert(
            "db_path".into(),
            params.get("db_path").cloned().unwrap_or(Value::Null),
        );
        payload.insert("executed_statements".into(), json!(0));
        Some(Value::Object(payload))
    }
}
