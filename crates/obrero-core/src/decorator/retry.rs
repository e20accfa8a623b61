use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::task::{ExecutionContext, ExecutionState, Task, TaskError, TaskMetadata};

/// Retries the inner `run` on thrown errors with exponential backoff.
///
/// Attempt 1 runs immediately; each failed attempt `n` waits
/// `delay_seconds * backoff_multiplier^(n-1)` before the next, up to
/// `max_retries` extra attempts. A returned `success: false` payload is a
/// graceful failure, not an error, and is never retried.
pub struct RetryDecorator {
    inner: Box<dyn Task>,
    max_retries: u32,
    delay_seconds: f64,
    backoff_multiplier: f64,
}

impl RetryDecorator {
    pub fn new(
        inner: Box<dyn Task>,
        max_retries: u32,
        delay_seconds: f64,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            inner,
            max_retries,
            delay_seconds,
            backoff_multiplier,
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(self.delay_seconds * factor)
    }
}

#[async_trait]
impl Task for RetryDecorator {
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
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.inner.run(context, params).await {
                Ok(result) => return Ok(result),
                Err(err) if attempt <= self.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        task = task_type,
                        attempt,
                        max_retries = self.max_retries,
                        delay_seconds = delay.as_secs_f64(),
                        error = %err,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
