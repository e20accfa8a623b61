//! Task runner: resolves a command's task type, applies the configured
//! decorator chain, drives the lifecycle, and returns a uniform envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::decorator::{apply_chain, DecoratorMap};
use crate::task::{ExecutionContext, TaskCommand, TaskRegistry};

/// Transport status of a command execution.
///
/// `Success` means the lifecycle returned a value; the value itself may
/// still describe a graceful failure (`success: false`), which the DAG
/// executor accounts for separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Failed,
}

/// Uniform result envelope for one executed command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub status: RunStatus,
    pub run_id: String,
    pub node_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

/// Executes task commands against a registry, applying per-type decorator
/// chains. No retries and no timeout live at this layer; retry is a
/// decorator concern.
pub struct TaskRunner {
    registry: TaskRegistry,
    decorators: DecoratorMap,
}

impl TaskRunner {
    pub fn new(registry: TaskRegistry, decorators: DecoratorMap) -> Self {
        Self {
            registry,
            decorators,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub async fn execute_command(
        &self,
        command: &TaskCommand,
        context: &ExecutionContext,
    ) -> CommandOutcome {
        debug!(
            task_type = %command.task_type,
            node = %command.node_key,
            run = %command.run_id,
            "executing command"
        );

        let task = match self.registry.create(&command.task_type) {
            Ok(task) => task,
            Err(err) => {
                warn!(task_type = %command.task_type, "unknown task type");
                return CommandOutcome {
                    status: RunStatus::Failed,
                    run_id: command.run_id.clone(),
                    node_key: command.node_key.clone(),
                    result: None,
                    error: Some(err.to_string()),
                    error_type: Some("UnknownTaskType".into()),
                };
            }
        };

        let specs = self
            .decorators
            .get(&command.task_type)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let mut task = apply_chain(specs, task);

        match task.run(context, &command.params).await {
            Ok(result) => CommandOutcome {
                status: RunStatus::Success,
                run_id: command.run_id.clone(),
                node_key: command.node_key.clone(),
                result: Some(result),
                error: None,
                error_type: None,
            },
            Err(err) => CommandOutcome {
                status: RunStatus::Failed,
                run_id: command.run_id.clone(),
                node_key: command.node_key.clone(),
                result: None,
                error: Some(err.to_string()),
                error_type: Some(err.kind().into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::decorator::default_decorator_map;

    fn runner() -> TaskRunner {
        TaskRunner::new(
            TaskRegistry::with_builtin_tasks().unwrap(),
            default_decorator_map(),
        )
    }

    fn command(task_type: &str, params: Value) -> TaskCommand {
        TaskCommand {
            run_id: "run_1".into(),
            node_key: "n1".into(),
            task_type: task_type.into(),
            params,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn unknown_type_returns_failed_envelope() {
        let runner = runner();
        let outcome = runner
            .execute_command(&command("no_such", json!({})), &ExecutionContext::new())
            .await;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Unknown task type: no_such")
        );
        assert_eq!(outcome.error_type.as_deref(), Some("UnknownTaskType"));
        assert!(outcome.result.is_none());
    }

    #[tokio::test]
    async fn successful_task_returns_success_envelope() {
        let runner = runner();
        let outcome = runner
            .execute_command(
                &command("notify_mock", json!({"channel": "console", "message": "hi"})),
                &ExecutionContext::new(),
            )
            .await;

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.run_id, "run_1");
        assert_eq!(outcome.node_key, "n1");
        let result = outcome.result.unwrap();
        assert_eq!(result["sent"], true);
    }

    #[tokio::test]
    async fn graceful_failure_is_success_transport() {
        let runner = runner();
        // notify_mock with missing message fails validation; its on_error
        // hook converts that into a structured payload.
        let outcome = runner
            .execute_command(
                &command("notify_mock", json!({"channel": "console"})),
                &ExecutionContext::new(),
            )
            .await;

        assert_eq!(outcome.status, RunStatus::Success);
        let result = outcome.result.unwrap();
        assert_eq!(result["success"], false);
        assert_eq!(result["error_type"], "InvalidParams");
    }

    #[tokio::test]
    async fn decorated_type_gets_timing_field() {
        let file = {
            use std::io::Write;
            let mut f = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
            f.write_all(b"a,b\n1,2\n").unwrap();
            f
        };

        let runner = runner();
        let outcome = runner
            .execute_command(
                &command(
                    "validate_csv",
                    json!({"path": file.path().to_str().unwrap(), "columns": ["a", "b"]}),
                ),
                &ExecutionContext::new(),
            )
            .await;

        let result = outcome.result.unwrap();
        assert_eq!(result["success"], true);
        assert!(result["_execution_time_seconds"].is_number());
    }
}
