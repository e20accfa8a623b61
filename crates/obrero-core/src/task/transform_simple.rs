use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

use super::{
    failure_payload, ExecutionContext, ExecutionState, Task, TaskError, TaskMetadata,
};

/// Directory the generated SQL artifacts land in.
const OUTPUT_DIR: &str = "data";

/// Transforms tabular data found in the upstream context into a SQL
/// artifact file: one `CREATE TABLE IF NOT EXISTS` with inferred column
/// types plus one `INSERT` per source row.
#[derive(Default)]
pub struct TransformSimpleTask {
    state: ExecutionState,
}

impl TransformSimpleTask {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Scan the context in iteration order for the first upstream result that
/// carries tabular data: a `data` or `body` payload (unwrapping a nested
/// `data` envelope), or a `path` pointing at a CSV file.
fn discover_upstream(context: &ExecutionContext) -> Result<(String, Vec<Map<String, Value>>), TaskError> {
    for (node_id, value) in context {
        let Some(obj) = value.as_object() else {
            continue;
        };

        if let Some(inner) = obj.get("data").or_else(|| obj.get("body")) {
            if let Some(rows) = rows_from_value(inner) {
                return Ok((node_id.clone(), rows));
            }
        }

        if let Some(path) = obj.get("path").and_then(Value::as_str) {
            let rows = read_csv_rows(path)?;
            if !rows.is_empty() {
                return Ok((node_id.clone(), rows));
            }
        }
    }

    Err(TaskError::NoUpstreamData)
}

/// Interpret a payload as a sequence of records.
fn rows_from_value(value: &Value) -> Option<Vec<Map<String, Value>>> {
    match value {
        Value::Array(items) => {
            let rows: Vec<Map<String, Value>> = items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect();
            (!rows.is_empty()).then_some(rows)
        }
        Value::Object(obj) => {
            // Unwrap one level of {"data": [...]} envelope.
            if let Some(nested) = obj.get("data") {
                if let Some(rows) = rows_from_value(nested) {
                    return Some(rows);
                }
            }
            // A single flat record counts as one row.
            if obj.values().all(|v| !v.is_object() && !v.is_array()) && !obj.is_empty() {
                return Some(vec![obj.clone()]);
            }
            None
        }
        _ => None,
    }
}

/// Read CSV rows into records, parsing numeric-looking fields.
fn read_csv_rows(path: &str) -> Result<Vec<Map<String, Value>>, TaskError> {
    if !Path::new(path).exists() {
        return Err(TaskError::FileNotFound(path.to_string()));
    }

    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| TaskError::Execution(format!("failed to open csv '{path}': {e}")))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| TaskError::Execution(format!("failed to read csv header: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| TaskError::Execution(format!("failed to read csv row: {e}")))?;
        let mut row = Map::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            row.insert(header.clone(), parse_csv_field(field));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn parse_csv_field(field: &str) -> Value {
    if let Ok(i) = field.parse::<i64>() {
        return json!(i);
    }
    if let Ok(f) = field.parse::<f64>() {
        return json!(f);
    }
    Value::String(field.to_string())
}

/// Infer a SQLite column type from the values observed in a column.
fn infer_column_type<'a>(rows: impl Iterator<Item = Option<&'a Value>>) -> &'static str {
    let mut saw_real = false;
    let mut saw_number = false;

    for value in rows.flatten() {
        match value {
            Value::Null => {}
            Value::Bool(_) => saw_number = true,
            Value::Number(n) => {
                saw_number = true;
                if !n.is_i64() && !n.is_u64() {
                    saw_real = true;
                }
            }
            _ => return "TEXT",
        }
    }

    if saw_real {
        "REAL"
    } else if saw_number {
        "INTEGER"
    } else {
        "TEXT"
    }
}

fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl Task for TransformSimpleTask {
    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            task_type: "transform_simple",
            display_name: "Simple Transform",
            description: "Turns upstream tabular data into a SQL artifact file.",
            category: "Transform",
            icon: "wand-2",
            params_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": {"type": "string", "title": "Target table name"},
                    "select_columns": {
                        "type": "array",
                        "title": "Columns to keep",
                        "items": {"type": "string"}
                    }
                },
                "required": ["table_name"]
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
        match params.get("table_name") {
            Some(Value::String(name)) if !name.is_empty() => {}
            Some(_) | None => {
                return Err(TaskError::InvalidParams(
                    "'table_name' is required and must be a non-empty string".into(),
                ))
            }
        }

        if let Some(select) = params.get("select_columns") {
            let cols = select.as_array().ok_or_else(|| {
                TaskError::InvalidParams("'select_columns' must be a list".into())
            })?;
            if cols.iter().any(|c| !c.is_string()) {
                return Err(TaskError::InvalidParams(
                    "'select_columns' entries must be strings".into(),
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
        let table_name = params
            .get("table_name")
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::InvalidParams("'table_name' must be a string".into()))?;

        let (source_node, rows) = discover_upstream(context)?;

        let original_columns: Vec<String> = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();

        let columns: Vec<String> = match params.get("select_columns").and_then(Value::as_array) {
            Some(select) => {
                let select: Vec<String> = select
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
                let missing: Vec<String> = select
                    .iter()
                    .filter(|c| !original_columns.contains(c))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    return Err(TaskError::MissingColumns {
                        missing,
                        expected: select,
                        found: original_columns,
                    });
                }
                select
            }
            None => original_columns.clone(),
        };

        let mut sql = String::new();
        sql.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\n",
            quote_ident(table_name)
        ));
        for (i, column) in columns.iter().enumerate() {
            let col_type = infer_column_type(rows.iter().map(|row| row.get(column)));
            sql.push_str(&format!("  {} {}", quote_ident(column), col_type));
            sql.push_str(if i + 1 < columns.len() { ",\n" } else { "\n" });
        }
        sql.push_str(");\n\n");

        let quoted_columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        for row in &rows {
            let values: Vec<String> = columns
                .iter()
                .map(|c| sql_literal(row.get(c).unwrap_or(&Value::Null)))
                .collect();
            sql.push_str(&format!(
                "INSERT INTO {} ({}) VALUES ({});\n",
                quote_ident(table_name),
                quoted_columns.join(", "),
                values.join(", ")
            ));
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(6).collect();
        let output_filename = format!("{table_name}_{timestamp}_{suffix}.sql");
        let output_path = PathBuf::from(OUTPUT_DIR).join(&output_filename);

        tokio::fs::create_dir_all(OUTPUT_DIR).await?;
        tokio::fs::write(&output_path, &sql).await?;

        Ok(json!({
            "success": true,
            "source_node": source_node,
            "output_path": output_path.to_string_lossy(),
            "output_filename": output_filename,
            "table_name": table_name,
            "rows": rows.len(),
            "columns": columns,
            "original_columns": original_columns,
            "statements_generated": rows.len() + 1,
        }))
    }

    async fn before(
        &mut self,
        context: &ExecutionContext,
        params: &Value,
    ) -> Result<(), TaskError> {
        info!(
            table_name = params.get("table_name").and_then(serde_json::Value::as_str),
            upstream_nodes = context.len(),
            "transforming upstream data to sql"
        );
        Ok(())
    }

    async fn after(&mut self, result: &Value) -> Result<(), TaskError> {
        info!(
            output = result.get("output_path").and_then(serde_json::Value::as_str),
            statements = result.get("statements_generated").and_then(serde_json::Value::as_u64),
            "sql artifact written"
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
            "table_name".into(),
            params.get("table_name").cloned().unwrap_or(Value::Null),
        );
        payload.insert("output_path".into(), Value::Null);
        payload.insert("rows".into(), json!(0));
        Some(Value::Object(payload))
    }
}
