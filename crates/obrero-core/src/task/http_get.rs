use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{
    failure_payload, truncate_chars, ExecutionContext, ExecutionState, Task, TaskError,
    TaskMetadata,
};

/// Maximum characters of a non-JSON response body kept in the result.
const BODY_PREVIEW_CHARS: usize = 500;

const DEFAULT_TIMEOUT_SECONDS: f64 = 10.0;

/// Fetches a URL over HTTP GET and publishes the parsed body.
#[derive(Default)]
pub struct HttpGetTask {
    state: ExecutionState,
}

impl HttpGetTask {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Task for HttpGetTask {
    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            task_type: "http_get",
            display_name: "HTTP GET Request",
            description: "Performs an HTTP GET request against a URL.",
            category: "Input",
            icon: "globe",
            params_schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "title": "URL", "format": "uri"},
                    "headers": {
                        "type": "object",
                        "title": "Headers",
                        "additionalProperties": {"type": "string"}
                    },
                    "timeout": {"type": "number", "title": "Timeout (seconds)", "minimum": 0}
                },
                "required": ["url"]
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
        let url = params
            .get("url")
            .ok_or_else(|| TaskError::InvalidParams("'url' is required".into()))?;
        let url = url
            .as_str()
            .ok_or_else(|| TaskError::InvalidParams("'url' must be a string".into()))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TaskError::InvalidParams(
                "'url' must start with http:// or https://".into(),
            ));
        }

        if let Some(headers) = params.get("headers") {
            let obj = headers.as_object().ok_or_else(|| {
                TaskError::InvalidParams("'headers' must be a string-to-string object".into())
            })?;
            if obj.values().any(|v| !v.is_string()) {
                return Err(TaskError::InvalidParams(
                    "'headers' values must be strings".into(),
                ));
            }
        }

        if let Some(timeout) = params.get("timeout") {
            match timeout.as_f64() {
                Some(t) if t > 0.0 => {}
                _ => {
                    return Err(TaskError::InvalidParams(
                        "'timeout' must be a positive number of seconds".into(),
                    ))
                }
            }
        }

        Ok(())
    }

    async fn execute(
        &mut self,
        _context: &ExecutionContext,
        params: &Value,
    ) -> Result<Value, TaskError> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::InvalidParams("'url' must be a string".into()))?;
        let timeout = params
            .get("timeout")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(timeout))
            .build()
            .map_err(|e| TaskError::Connection(format!("failed to build http client: {e}")))?;

        let mut request = client.get(url);
        if let Some(headers) = params.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TaskError::Timeout(format!("request to {url} timed out: {e}"))
            } else if e.is_connect() {
                TaskError::Connection(format!("failed to connect to {url}: {e}"))
            } else {
                TaskError::Execution(format!("http get to {url} failed: {e}"))
            }
        })?;

        let status = response.status();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), Value::String(v.to_string())))
            })
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| TaskError::Execution(format!("failed to read body from {url}: {e}")))?;

        if !status.is_success() {
            return Err(TaskError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = truncate_chars(&text, BODY_PREVIEW_CHARS);
        let data = serde_json::from_str::<Value>(&text)
            .unwrap_or_else(|_| Value::String(body.clone()));

        Ok(json!({
            "success": true,
            "status_code": status.as_u16(),
            "data": data,
            "body": body,
            "headers": headers,
            "url": url,
        }))
    }

    async fn before(
        &mut self,
        _context: &ExecutionContext,
        params: &Value,
    ) -> Result<(), TaskError> {
        if let Some(url) = params.get("url").and_then(Value::as_str) {
            info!(url, "performing http get");
        }
        Ok(())
    }

    async fn after(&mut self, result: &Value) -> Result<(), TaskError> {
        info!(
            status_code = result.get("status_code").and_then(serde_json::Value::as_u64),
            "http get completed"
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
            "url".into(),
            params.get("url").cloned().unwrap_or(Value::Null),
        );
        payload.insert("status_code".into(), Value::Null);
        payload.insert("body".into(), Value::Null);
        Some(Value::Object(payload))
    }
}
