use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{
    failure_payload, ExecutionContext, ExecutionState, Task, TaskError, TaskMetadata,
};

/// Checks that a CSV file exists, has data, and carries the expected columns.
#[derive(Default)]
pub struct ValidateCsvTask {
    state: ExecutionState,
}

impl ValidateCsvTask {
    pub fn new() -> Self {
        Self::default()
    }
}

fn expected_columns(params: &Value) -> Vec<String> {
    params
        .get("columns")
        .and_then(Value::as_array)
        .map(|cols| {
            cols.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Task for ValidateCsvTask {
    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            task_type: "validate_csv",
            display_name: "Validate CSV File",
            description: "Verifies that a CSV file has the expected columns.",
            category: "Validation",
            icon: "file-text",
            params_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "title": "CSV file path"},
                    "columns": {
                        "type": "array",
                        "title": "Expected columns",
                        "items": {"type": "string"},
                        "minItems": 1
                    },
                    "allow_extra_columns": {
                        "type": "boolean",
                        "title": "Allow extra columns",
                        "default": true
                    }
                },
                "required": ["path", "columns"]
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
        match params.get("path") {
            Some(Value::String(_)) => {}
            Some(_) => return Err(TaskError::InvalidParams("'path' must be a string".into())),
            None => return Err(TaskError::InvalidParams("'path' is required".into())),
        }

        let columns = params
            .get("columns")
            .ok_or_else(|| TaskError::InvalidParams("'columns' is required".into()))?;
        let columns = columns
            .as_array()
            .ok_or_else(|| TaskError::InvalidParams("'columns' must be a list".into()))?;
        if columns.is_empty() {
            return Err(TaskError::InvalidParams("'columns' must not be empty".into()));
        }
        if columns.iter().any(|c| !c.is_string()) {
            return Err(TaskError::InvalidParams(
                "'columns' entries must be strings".into(),
            ));
        }

        if let Some(allow) = params.get("allow_extra_columns") {
            if !allow.is_boolean() {
                return Err(TaskError::InvalidParams(
                    "'allow_extra_columns' must be a boolean".into(),
                ));
            }
        }

        Ok(())
    }

    async fn execute(
        &mut self,
        _context: &ExecutionContext,
        params: &Value,
    ) -> Result<Value, TaskError> {
        let path = params
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::InvalidParams("'path' must be a string".into()))?;
        let expected = expected_columns(params);
        let allow_extra = params
            .get("allow_extra_columns")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        if !Path::new(path).exists() {
            return Err(TaskError::FileNotFound(path.to_string()));
        }

        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| TaskError::Execution(format!("failed to open csv '{path}': {e}")))?;

        let headers = reader
            .headers()
            .map_err(|e| TaskError::Execution(format!("failed to read csv header: {e}")))?
            .clone();
        if headers.is_empty() {
            return Err(TaskError::EmptyFile(path.to_string()));
        }
        let found: Vec<String> = headers.iter().map(str::to_string).collect();

        let mut rows = 0usize;
        for record in reader.records() {
            record.map_err(|e| TaskError::Execution(format!("failed to read csv row: {e}")))?;
            rows += 1;
        }
        if rows == 0 {
            return Err(TaskError::EmptyFile(path.to_string()));
        }

        let missing: Vec<String> = expected
            .iter()
            .filter(|c| !found.contains(c))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(TaskError::MissingColumns {
                missing,
                expected,
                found,
            });
        }

        let extra: Vec<String> = found
            .iter()
            .filter(|c| !expected.contains(c))
            .cloned()
            .collect();
        if !allow_extra && !extra.is_empty() {
            return Err(TaskError::ExtraColumns(extra));
        }

        Ok(json!({
            "success": true,
            "valid": true,
            "path": path,
            "rows": rows,
            "columns": found,
            "expected_columns": expected,
            "has_extra_columns": !extra.is_empty(),
        }))
    }

    async fn before(
        &mut self,
        _context: &ExecutionContext,
        params: &Value,
    ) -> Result<(), TaskError> {
        info!(
            path = params.get("path").and_then(serde_json::Value::as_str),
            expected = expected_columns(params).len(),
            "validating csv file"
        );
        Ok(())
    }

    async fn after(&mut self, result: &Value) -> Result<(), TaskError> {
        info!(
            rows = result.get("rows").and_then(serde_json::Value::as_u64),
            columns = result
                .get("columns")
                .and_then(serde_json::Value::as_array)
                .map(Vec::len),
            "csv file is valid"
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
        payload.insert("valid".into(), Value::Bool(false));
        payload.insert(
            "path".into(),
            params.get("path").cloned().unwrap_or(Value::Null),
        );
        payload.insert("rows".into(), json!(0));
        payload.insert("columns".into(), json!([]));
        Some(Value::Object(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn params(path: &str, columns: &[&str]) -> Value {
        json!({"path": path, "columns": columns})
    }

    #[test]
    fn columns_must_be_non_empty() {
        let task = ValidateCsvTask::new();
        let err = task
            .validate_params(&json!({"path": "a.csv", "columns": []}))
            .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[tokio::test]
    async fn valid_file_reports_rows_and_columns() {
        let file = write_csv("name,age\nana,30\nluis,25\n");
        let mut task = ValidateCsvTask::new();
        let params = params(file.path().to_str().unwrap(), &["name", "age"]);
        let result = task.run(&ExecutionContext::new(), &params).await.unwrap();

        assert_eq!(result["success"], true);
        assert_eq!(result["valid"], true);
        assert_eq!(result["rows"], 2);
        assert_eq!(result["columns"], json!(["name", "age"]));
        assert_eq!(result["has_extra_columns"], false);
    }

    #[tokio::test]
    async fn missing_file_fails_gracefully() {
        let mut task = ValidateCsvTask::new();
        let params = params("/no/such/file.csv", &["a"]);
        let result = task.run(&ExecutionContext::new(), &params).await.unwrap();

        assert_eq!(result["success"], false);
        assert_eq!(result["valid"], false);
        assert_eq!(result["error_type"], "FileNotFound");
    }

    #[tokio::test]
    async fn header_only_file_is_empty() {
        let file = write_csv("name,age\n");
        let mut task = ValidateCsvTask::new();
        let params = params(file.path().to_str().unwrap(), &["name"]);
        let result = task.run(&ExecutionContext::new(), &params).await.unwrap();

        assert_eq!(result["success"], false);
        assert_eq!(result["error_type"], "EmptyFile");
    }

    #[tokio::test]
    async fn missing_columns_are_reported() {
        let file = write_csv("name\nana\n");
        let mut task = ValidateCsvTask::new();
        let params = params(file.path().to_str().unwrap(), &["name", "age"]);
        let result = task.run(&ExecutionContext::new(), &params).await.unwrap();

        assert_eq!(result["error_type"], "MissingColumns");
        assert!(result["error"].as_str().unwrap().contains("age"));
    }

    #[tokio::test]
    async fn extra_columns_rejected_when_disallowed() {
        let file = write_csv("name,age,city\nana,30,gdl\n");
        let mut task = ValidateCsvTask::new();
        let params = json!({
            "path": file.path().to_str().unwrap(),
            "columns": ["name", "age"],
            "allow_extra_columns": false
        });
        let result = task.run(&ExecutionContext::new(), &params).await.unwrap();

        assert_eq!(result["error_type"], "UnexpectedExtraColumns");
    }

    #[tokio::test]
    async fn extra_columns_allowed_by_default() {
        let file = write_csv("name,age,city\nana,30,gdl\n");
        let mut task = ValidateCsvTask::new();
        let params = params(file.path().to_str().unwrap(), &["name", "age"]);
        let result = task.run(&ExecutionContext::new(), &params).await.unwrap();

        assert_eq!(result["success"], true);
        assert_eq!(result["has_extra_columns"], true);
    }
}
