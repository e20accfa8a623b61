//! Cross-cutting task decorators: timing, structured logging, retry.
//!
//! A decorator is a Task-shaped wrapper around an inner task. It preserves
//! the inner metadata and delegates validation, execution, and hooks; only
//! `run` is intercepted. Chains are configured per task type.

mod logging;
mod retry;
mod timing;

use std::collections::HashMap;

pub use logging::LoggingDecorator;
pub use retry::RetryDecorator;
pub use timing::TimingDecorator;

use crate::task::Task;

pub const DEFAULT_MAX_FIELD_LEN: usize = 200;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECONDS: f64 = 1.0;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Declarative description of one decorator in a chain.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoratorSpec {
    Timing,
    Logging {
        max_field_len: usize,
    },
    Retry {
        max_retries: u32,
        delay_seconds: f64,
        backoff_multiplier: f64,
    },
}

impl DecoratorSpec {
    pub fn logging() -> Self {
        Self::Logging {
            max_field_len: DEFAULT_MAX_FIELD_LEN,
        }
    }

    pub fn retry() -> Self {
        Self::Retry {
            max_retries: DEFAULT_MAX_RETRIES,
            delay_seconds: DEFAULT_RETRY_DELAY_SECONDS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    fn wrap(&self, inner: Box<dyn Task>) -> Box<dyn Task> {
        match self {
            Self::Timing => Box::new(TimingDecorator::new(inner)),
            Self::Logging { max_field_len } => {
                Box::new(LoggingDecorator::new(inner, *max_field_len))
            }
            Self::Retry {
                max_retries,
                delay_seconds,
                backoff_multiplier,
            } => Box::new(RetryDecorator::new(
                inner,
                *max_retries,
                *delay_seconds,
                *backoff_multiplier,
            )),
        }
    }
}

/// Per-type decorator configuration: task type → ordered chain, first
/// entry outermost.
pub type DecoratorMap = HashMap<String, Vec<DecoratorSpec>>;

/// Wrap `task` with `specs`. Wrapping is right-to-left so the last entry
/// executes closest to the inner task; an empty chain is the task itself.
pub fn apply_chain(specs: &[DecoratorSpec], task: Box<dyn Task>) -> Box<dyn Task> {
    specs.iter().rev().fold(task, |inner, spec| spec.wrap(inner))
}

/// The default per-type chains.
pub fn default_decorator_map() -> DecoratorMap {
    let mut map = DecoratorMap::new();
    map.insert("http_get".into(), vec![DecoratorSpec::Timing]);
    map.insert("validate_csv".into(), vec![DecoratorSpec::Timing]);
    map.insert("transform_simple".into(), vec![DecoratorSpec::Timing]);
    map.insert(
        "save_db".into(),
        vec![DecoratorSpec::Timing, DecoratorSpec::logging()],
    );
    map.insert("notify_mock".into(), Vec::new());
    map
}
