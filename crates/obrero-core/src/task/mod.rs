//! Task contract: the uniform lifecycle every unit of work obeys.
//!
//! A task exposes static metadata, parameter validation, and an `execute`
//! body. The provided [`Task::run`] template drives the lifecycle
//! (before → validate → execute → after, with an error hook) and is the
//! only entry point the runner and the decorators go through.

pub mod http_get;
pub mod notify_mock;
pub mod registry;
pub mod save_db;
pub mod transform_simple;
pub mod validate_csv;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

pub use http_get::HttpGetTask;
pub use notify_mock::NotifyMockTask;
pub use registry::{RegistryError, TaskRegistry};
pub use save_db::SaveDbTask;
pub use transform_simple::TransformSimpleTask;
pub use validate_csv::ValidateCsvTask;

/// Shared per-run accumulator: node id → published result payload.
///
/// Insertion-ordered so downstream tasks that scan for upstream artifacts
/// observe results in execution order.
pub type ExecutionContext = IndexMap<String, Value>;

/// Error kinds a task can fail with. The `kind()` label is stable and is
/// what structured failure payloads carry as `error_type`.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("http status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("empty file: {0}")]
    EmptyFile(String),

    #[error("missing columns {missing:?}: expected {expected:?}, found {found:?}")]
    MissingColumns {
        missing: Vec<String>,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("unexpected extra columns: {0:?}")]
    ExtraColumns(Vec<String>),

    #[error("no upstream data available in context")]
    NoUpstreamData,

    #[error("no upstream sql artifact available in context")]
    NoUpstreamSql,

    #[error("task execution error: {0}")]
    Execution(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),
}

impl TaskError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParams(_) => "InvalidParams",
            Self::Timeout(_) => "TimeoutError",
            Self::Connection(_) => "ConnectionError",
            Self::HttpStatus { .. } => "HttpError",
            Self::FileNotFound(_) => "FileNotFound",
            Self::EmptyFile(_) => "EmptyFile",
            Self::MissingColumns { .. } => "MissingColumns",
            Self::ExtraColumns(_) => "UnexpectedExtraColumns",
            Self::NoUpstreamData => "NoUpstreamData",
            Self::NoUpstreamSql => "NoUpstreamSQL",
            Self::Execution(_) => "TaskExecutionError",
            Self::Io(_) => "IoError",
            Self::Sql(_) => "SqlError",
        }
    }
}

/// Static description of a task type, surfaced to producers and UIs.
#[derive(Debug, Clone)]
pub struct TaskMetadata {
    pub task_type: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub icon: &'static str,
    pub params_schema: Value,
}

/// Per-instance execution state, updated by the `run` template.
#[derive(Debug, Clone, Default)]
pub struct ExecutionState {
    pub started: bool,
    pub completed: bool,
    pub failed: bool,
    pub last_error: Option<String>,
}

/// Immutable instruction to execute one task within a run.
#[derive(Debug, Clone)]
pub struct TaskCommand {
    pub run_id: String,
    pub node_key: String,
    pub task_type: String,
    pub params: Value,
    pub metadata: Option<Value>,
}

impl std::fmt::Debug for dyn Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("metadata", &self.metadata())
            .finish()
    }
}

/// The task lifecycle contract.
///
/// Concrete tasks implement metadata, validation, and `execute`, plus the
/// optional hooks. They never override `run`: the template is fixed, and
/// decorators are the only layer allowed to intercept it.
#[async_trait]
pub trait Task: Send {
    fn metadata(&self) -> TaskMetadata;

    fn state(&self) -> &ExecutionState;

    fn state_mut(&mut self) -> &mut ExecutionState;

    /// Validate `params` without side effects. Purely a function of params.
    fn validate_params(&self, params: &Value) -> Result<(), TaskError>;

    /// The task body. Returns the node result payload on success.
    async fn execute(&mut self, context: &ExecutionContext, params: &Value)
        -> Result<Value, TaskError>;

    /// Pre-execution hook. Errors are logged by `run`, never fatal.
    async fn before(
        &mut self,
        _context: &ExecutionContext,
        _params: &Value,
    ) -> Result<(), TaskError> {
        Ok(())
    }

    /// Post-success hook. Errors are logged by `run`, never fatal.
    async fn after(&mut self, _result: &Value) -> Result<(), TaskError> {
        Ok(())
    }

    /// Error hook. Returning `Some(payload)` makes the task fail
    /// gracefully: `run` reports success transport with a `success: false`
    /// payload instead of propagating the error.
    async fn on_error(
        &mut self,
        _error: &TaskError,
        _context: &ExecutionContext,
        _params: &Value,
    ) -> Option<Value> {
        None
    }

    /// Lifecycle template. Do not override outside of decorators.
    async fn run(&mut self, context: &ExecutionContext, params: &Value) -> Result<Value, TaskError> {
        let task_type = self.metadata().task_type;
        self.state_mut().started = true;

        if let Err(err) = self.before(context, params).await {
            warn!(task = task_type, error = %err, "before hook failed");
        }

        let outcome = match self.validate_params(params) {
            Ok(()) => self.execute(context, params).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(result) => {
                self.state_mut().completed = true;
                if let Err(err) = self.after(&result).await {
                    warn!(task = task_type, error = %err, "after hook failed");
                }
                Ok(result)
            }
            Err(err) => {
                let state = self.state_mut();
                state.failed = true;
                state.last_error = Some(err.to_string());
                error!(task = task_type, error = %err, "task failed");

                match self.on_error(&err, context, params).await {
                    Some(result) => Ok(result),
                    None => Err(err),
                }
            }
        }
    }
}

/// Structured failure payload produced by the `on_error` hooks.
pub(crate) fn failure_payload(error: &TaskError) -> serde_json::Map<String, Value> {
    let mut payload = serde_json::Map::new();
    payload.insert("success".into(), Value::Bool(false));
    payload.insert("error".into(), Value::String(error.to_string()));
    payload.insert("error_type".into(), Value::String(error.kind().into()));
    payload
}

/// Truncate to at most `max` characters (not bytes).
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Minimal task used to exercise the lifecycle template.
    struct ProbeTask {
        state: ExecutionState,
        fail_execute: bool,
        graceful: bool,
        failing_hooks: bool,
        before_calls: u32,
        after_calls: u32,
    }

    impl ProbeTask {
        fn new(fail_execute: bool, graceful: bool) -> Self {
            Self {
                state: ExecutionState::default(),
                fail_execute,
                graceful,
                failing_hooks: false,
                before_calls: 0,
                after_calls: 0,
            }
        }
    }

    #[async_trait]
    impl Task for ProbeTask {
        fn metadata(&self) -> TaskMetadata {
            TaskMetadata {
                task_type: "probe",
                display_name: "Probe",
                description: "test task",
                category: "Test",
                icon: "box",
                params_schema: json!({"type": "object"}),
            }
        }

        fn state(&self) -> &ExecutionState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut ExecutionState {
            &mut self.state
        }

        fn validate_params(&self, params: &Value) -> Result<(), TaskError> {
            if params.get("bad").is_some() {
                return Err(TaskError::InvalidParams("'bad' is not allowed".into()));
            }
            Ok(())
        }

        async fn execute(
            &mut self,
            _context: &ExecutionContext,
            _params: &Value,
        ) -> Result<Value, TaskError> {
            if self.fail_execute {
                Err(TaskError::Execution("intentional".into()))
            } else {
                Ok(json!({"success": true, "value": 42}))
            }
        }

        async fn before(
            &mut self,
            _context: &ExecutionContext,
            _params: &Value,
        ) -> Result<(), TaskError> {
            self.before_calls += 1;
            if self.failing_hooks {
                return Err(TaskError::Execution("before hook exploded".into()));
            }
            Ok(())
        }

        async fn after(&mut self, _result: &Value) -> Result<(), TaskError> {
            self.after_calls += 1;
            if self.failing_hooks {
                return Err(TaskError::Execution("after hook exploded".into()));
            }
            Ok(())
        }

        async fn on_error(
            &mut self,
            error: &TaskError,
            _context: &ExecutionContext,
            _params: &Value,
        ) -> Option<Value> {
            if self.graceful {
                Some(Value::Object(failure_payload(error)))
            } else {
                None
            }
        }
    }

    #[tokio::test]
    async fn successful_run_marks_completed_and_calls_hooks() {
        let mut task = ProbeTask::new(false, false);
        let result = task.run(&ExecutionContext::new(), &json!({})).await.unwrap();

        assert_eq!(result["value"], 42);
        assert!(task.state().started);
        assert!(task.state().completed);
        assert!(!task.state().failed);
        assert_eq!(task.before_calls, 1);
        assert_eq!(task.after_calls, 1);
    }

    #[tokio::test]
    async fn execute_failure_propagates_when_on_error_returns_none() {
        let mut task = ProbeTask::new(true, false);
        let err = task
            .run(&ExecutionContext::new(), &json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::Execution(_)));
        assert!(task.state().failed);
        assert!(!task.state().completed);
        assert!(task.state().last_error.is_some());
        assert_eq!(task.after_calls, 0);
    }

    #[tokio::test]
    async fn graceful_failure_returns_structured_payload() {
        let mut task = ProbeTask::new(true, true);
        let result = task.run(&ExecutionContext::new(), &json!({})).await.unwrap();

        assert_eq!(result["success"], false);
        assert_eq!(result["error_type"], "TaskExecutionError");
        assert!(task.state().failed);
    }

    #[tokio::test]
    async fn validation_failure_goes_through_error_path() {
        let mut task = ProbeTask::new(false, true);
        let result = task
            .run(&ExecutionContext::new(), &json!({"bad": 1}))
            .await
            .unwrap();

        assert_eq!(result["success"], false);
        assert_eq!(result["error_type"], "InvalidParams");
        // execute never ran, so after never fired
        assert_eq!(task.after_calls, 0);
    }

    #[tokio::test]
    async fn hook_failures_do_not_abort_the_run() {
        let mut task = ProbeTask::new(false, false);
        task.failing_hooks = true;
        let result = task.run(&ExecutionContext::new(), &json!({})).await.unwrap();

        assert_eq!(result["success"], true);
        assert!(task.state().completed);
        assert_eq!(task.before_calls, 1);
        assert_eq!(task.after_calls, 1);
    }

    #[test]
    fn truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(TaskError::NoUpstreamData.kind(), "NoUpstreamData");
        assert_eq!(
            TaskError::Timeout("t".into()).kind(),
            "TimeoutError"
        );
        assert_eq!(
            TaskError::ExtraColumns(vec!["x".into()]).kind(),
            "UnexpectedExtraColumns"
        );
    }
}
