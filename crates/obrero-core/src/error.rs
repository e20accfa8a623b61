use thiserror::Error;

/// Top-level error type for the obrero-core library.
#[derive(Debug, Error)]
pub enum ObreroError {
    /// Configuration parse or validation error.
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Task registry error.
    #[error("registry error: {0}")]
    Registry(#[from] crate::task::registry::RegistryError),

    /// Run store or shared store error.
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Workflow execution error.
    #[error("executor error: {0}")]
    Executor(#[from] crate::workflow::executor::ExecutorError),

    /// Wraps `std::io::Error`.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, ObreroError>;
