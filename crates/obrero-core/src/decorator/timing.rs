use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::task::{ExecutionContext, ExecutionState, Task, TaskError, TaskMetadata};

/// Field injected into successful object results.
pub const EXECUTION_TIME_FIELD: &str = "_execution_time_seconds";

/// Measures wall-clock time around the inner `run`.
///
/// On success the elapsed seconds (millisecond precision) are injected
/// into the result when it is an object; on failure the elapsed time is
/// logged and the error rethrown.
pub struct TimingDecorator {
    inner: Box<dyn Task>,
}

impl TimingDecorator {
    pub fn new(inner: Box<dyn Task>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Task for TimingDecorator {
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
        let start = Instant::now();

        match self.inner.run(context, params).await {
            Ok(mut result) => {
                let elapsed = round_millis(start.elapsed().as_secs_f64());
                debug!(task = task_type, elapsed_seconds = elapsed, "task finished");
                if let Value::Object(map) = &mut result {
                    map.insert(EXECUTION_TIME_FIELD.into(), elapsed.into());
                }
                Ok(result)
            }
            Err(err) => {
                let elapsed = round_millis(start.elapsed().as_secs_f64());
                warn!(
                    task = task_type,
                    elapsed_seconds = elapsed,
                    error = %err,
                    "task failed"
                );
                Err(err)
            }
        }
    }
}

fn round_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::decorator::test_support::CountingTask;

    #[tokio::test]
    async fn injects_execution_time_on_success() {
        let mut task = TimingDecorator::new(Box::new(CountingTask::failing(0)));
        let result = task
            .run(&ExecutionContext::new(), &json!({}))
            .await
            .unwrap();

        let elapsed = result[EXECUTION_TIME_FIELD].as_f64().unwrap();
        assert!(elapsed >= 0.0);
        // millisecond precision
        let millis = elapsed * 1000.0;
        assert!((millis - millis.round()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failure_is_rethrown() {
        let mut task = TimingDecorator::new(Box::new(CountingTask::failing(5)));
        let err = task
            .run(&ExecutionContext::new(), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Execution(_)));
    }

    #[tokio::test]
    async fn non_object_results_are_passed_through() {
        use crate::task::ExecutionState;
        use async_trait::async_trait;

        struct ScalarTask {
            state: ExecutionState,
        }

        #[async_trait]
        impl Task for ScalarTask {
            fn metadata(&self) -> TaskMetadata {
                TaskMetadata {
                    task_type: "scalar",
                    display_name: "Scalar",
                    description: "test",
                    category: "Test",
                    icon: "box",
                    params_schema: json!({}),
                }
            }
            fn state(&self) -> &ExecutionState {
                &self.state
            }
            fn state_mut(&mut self) -> &mut ExecutionState {
                &mut self.state
            }
            fn validate_params(&self, _params: &Value) -> Result<(), TaskError> {
                Ok(())
            }
            async fn execute(
                &mut self,
                _context: &ExecutionContext,
                _params: &Value,
            ) -> Result<Value, TaskError> {
                Ok(json!(7))
            }
        }

        let mut task = TimingDecorator::new(Box::new(ScalarTask {
            state: ExecutionState::default(),
        }));
        let result = task
            .run(&ExecutionContext::new(), &json!({}))
            .await
            .unwrap();
        assert_eq!(result, json!(7));
    }

    #[test]
    fn rounding_keeps_three_decimals() {
        assert_eq!(round_millis(0.123456), 0.123);
        assert_eq!(round_millis(1.9996), 2.0);
    }
}
