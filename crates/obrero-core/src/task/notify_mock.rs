use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use super::{failure_payload, ExecutionContext, ExecutionState, Task, TaskError, TaskMetadata};

const MAX_MESSAGE_CHARS: usize = 500;
const MAX_DELAY_SECONDS: f64 = 10.0;

/// Stub notification delivery: logs the message to the given channel after
/// an optional delay.
#[derive(Default)]
pub struct NotifyMockTask {
    state: ExecutionState,
}

impl NotifyMockTask {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Task for NotifyMockTask {
    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            task_type: "notify_mock",
            display_name: "Mock Notification",
            description: "Simulates delivering a notification to a channel.",
            category: "Notification",
            icon: "bell",
            params_schema: json!({
                "type": "object",
                "properties": {
                    "channel": {"type": "string", "title": "Channel"},
                    "message": {
                        "type": "string",
                        "title": "Message",
                        "minLength": 1,
                        "maxLength": MAX_MESSAGE_CHARS
                    },
                    "delay": {
                        "type": "number",
                        "title": "Delay (seconds)",
                        "minimum": 0,
                        "maximum": MAX_DELAY_SECONDS
                    }
                },
                "required": ["channel", "message"]
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
        match params.get("channel") {
            Some(Value::String(channel)) if !channel.is_empty() => {}
            Some(_) | None => {
                return Err(TaskError::InvalidParams(
                    "'channel' is required and must be a non-empty string".into(),
                ))
            }
        }

        let message = params
            .get("message")
            .ok_or_else(|| TaskError::InvalidParams("'message' is required".into()))?;
        let message = message
            .as_str()
            .ok_or_else(|| TaskError::InvalidParams("'message' must be a string".into()))?;
        let chars = message.chars().count();
        if chars == 0 || chars > MAX_MESSAGE_CHARS {
            return Err(TaskError::InvalidParams(format!(
                "'message' must be 1..={MAX_MESSAGE_CHARS} characters, got {chars}"
            )));
        }

        if let Some(delay) = params.get("delay") {
            match delay.as_f64() {
                Some(d) if (0.0..=MAX_DELAY_SECONDS).contains(&d) => {}
                _ => {
                    return Err(TaskError::InvalidParams(format!(
                        "'delay' must be between 0 and {MAX_DELAY_SECONDS} seconds"
                    )))
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
        let channel = params
            .get("channel")
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::InvalidParams("'channel' must be a string".into()))?;
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::InvalidParams("'message' must be a string".into()))?;
        let delay = params.get("delay").and_then(Value::as_f64).unwrap_or(0.0);

        if delay > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }

        info!(channel, message, "notification delivered");

        Ok(json!({
            "success": true,
            "sent": true,
            "channel": channel,
            "message": message,
            "timestamp": Utc::now().to_rfc3339(),
        }))
    }

    async fn on_error(
        &mut self,
        error: &TaskError,
        _context: &ExecutionContext,
        params: &Value,
    ) -> Option<Value> {
        let mut payload = failure_payload(error);
        payload.insert("sent".into(), Value::Bool(false));
        payload.insert(
            "channel".into(),
            params.get("channel").cloned().unwrap_or(Value::Null),
        );
        payload.insert("message".into(), Value::Null);
        Some(Value::Object(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_and_reports_timestamp() {
        let mut task = NotifyMockTask::new();
        let params = json!({"channel": "console", "message": "hi"});
        let result = task.run(&ExecutionContext::new(), &params).await.unwrap();

        assert_eq!(result["sent"], true);
        assert_eq!(result["channel"], "console");
        assert_eq!(result["message"], "hi");
        assert!(result["timestamp"].is_string());
    }

    #[tokio::test]
    async fn missing_channel_fails_gracefully() {
        let mut task = NotifyMockTask::new();
        let params = json!({"message": "hi"});
        let result = task.run(&ExecutionContext::new(), &params).await.unwrap();

        assert_eq!(result["sent"], false);
        assert_eq!(result["error_type"], "InvalidParams");
    }

    #[test]
    fn message_length_bounds_are_enforced() {
        let task = NotifyMockTask::new();
        task.validate_params(&json!({"channel": "c", "message": "x"}))
            .unwrap();

        let too_long = "x".repeat(501);
        let err = task
            .validate_params(&json!({"channel": "c", "message": too_long}))
            .unwrap_err();
        assert!(err.to_string().contains("1..=500"));

        let err = task
            .validate_params(&json!({"channel": "c", "message": ""}))
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidParams(_)));
    }

    #[test]
    fn delay_out_of_range_rejected() {
        let task = NotifyMockTask::new();
        let err = task
            .validate_params(&json!({"channel": "c", "message": "m", "delay": 11.0}))
            .unwrap_err();
        assert!(err.to_string().contains("delay"));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_awaited() {
        let mut task = NotifyMockTask::new();
        let params = json!({"channel": "c", "message": "m", "delay": 5.0});
        let before = tokio::time::Instant::now();
        task.run(&ExecutionContext::new(), &params).await.unwrap();
        assert!(before.elapsed() >= Duration::from_secs(5));
    }
}
