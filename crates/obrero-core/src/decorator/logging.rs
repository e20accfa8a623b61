use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

use crate::task::{truncate_chars, ExecutionContext, ExecutionState, Task, TaskError, TaskMetadata};

/// Params whose key contains one of these markers are never logged.
const SENSITIVE_KEY_MARKERS: &[&str] = &["password", "token", "api_key", "secret", "auth"];

const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

/// Logs sanitised params before the inner `run` and a truncated view of
/// the result after it; on failure logs the error kind and rethrows.
pub struct LoggingDecorator {
    inner: Box<dyn Task>,
    max_field_len: usize,
}

impl LoggingDecorator {
    pub fn new(inner: Box<dyn Task>, max_field_len: usize) -> Self {
        Self {
            inner,
            max_field_len,
        }
    }
}

/// Replace the values of sensitive keys with a fixed placeholder,
/// recursing into nested objects and arrays.
pub fn sanitize_params(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sanitized = map
                .iter()
                .map(|(key, value)| {
                    let lower = key.to_lowercase();
                    if SENSITIVE_KEY_MARKERS.iter().any(|m| lower.contains(m)) {
                        (key.clone(), Value::String(REDACTED_PLACEHOLDER.into()))
                    } else {
                        (key.clone(), sanitize_params(value))
                    }
                })
                .collect();
            Value::Object(sanitized)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_params).collect()),
        other => other.clone(),
    }
}

/// Truncate every string field beyond `max_len` characters, appending an
/// ellipsis, recursing into nested objects and arrays.
pub fn truncate_for_log(value: &Value, max_len: usize) -> Value {
    match value {
        Value::String(s) if s.chars().count() > max_len => {
            Value::String(format!("{}…", truncate_chars(s, max_len)))
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_for_log(v, max_len)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items.iter().map(|v| truncate_for_log(v, max_len)).collect(),
        ),
        other => other.clone(),
    }
}

#[async_trait]
impl Task for LoggingDecorator {
    fn metadata(&self) -> TaskMetadata {
        self.inner.metadata()
    }

    fn state(&self) -> &ExecutionState {
        self.inner.state()
    }

    fn state_mut(&mut self) -> &mut ExecutionState {
        self.inner.state_mut()
    }

    fn validate_params(&self, params: &Value) -> Result<(), TaskError> {
        self.inner.validate_params(params)
    }

    async fn execute(
        &mut self,
        context: &ExecutionContext,
        params: &Value,
    ) -> Result<Value, TaskError> {
        self.inner.execute(context, params).await
    }

    async fn before(
        &mut self,
        context: &ExecutionContext,
        params: &Value,
    ) -> Result<(), TaskError> {
        self.inner.before(context, params).await
    }

    async fn after(&mut self, result: &Value) -> Result<(), TaskError> {
        self.inner.after(result).await
    }

    async fn on_error(
        &mut self,
        error: &TaskError,
        context: &ExecutionContext,
        params: &Value,
    ) -> Option<Value> {
        self.inner.on_error(error, context, params).await
    }

    async fn run(&mut self, context: &ExecutionContext, params: &Value) -> Result<Value, TaskError> {
        let task_type = self.inner.metadata().task_type;
        info!(
            task = task_type,
            params = %sanitize_params(params),
            "executing task"
        );

        match self.inner.run(context, params).await {
            Ok(result) => {
                info!(
                    task = task_type,
                    result = %truncate_for_log(&result, self.max_field_len),
                    "task result"
                );
                Ok(result)
            }
            Err(err) => {
                error!(
                    task = task_type,
                    error_type = err.kind(),
                    error = %err,
                    "task error"
                );
                Err(err)
            }
        }
    }
}
