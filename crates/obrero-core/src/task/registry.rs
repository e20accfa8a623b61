use std::collections::HashMap;

use thiserror::Error;

use super::{
    HttpGetTask, NotifyMockTask, SaveDbTask, Task, TransformSimpleTask, ValidateCsvTask,
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown task type: {task_type}")]
    UnknownTaskType { task_type: String },

    #[error("task type '{task_type}' is already registered")]
    DuplicateTaskType { task_type: String },
}

type TaskFactory = fn() -> Box<dyn Task>;

/// Central registry mapping a task-type identifier to a factory producing
/// a fresh task instance per execution.
///
/// The catalog of constructible types is closed; `register` only enables
/// a builtin type, it cannot introduce new ones.
#[derive(Default)]
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable a builtin task type.
    ///
    /// Fails with `UnknownTaskType` for a type outside the catalog and
    /// with `DuplicateTaskType` when the type is already registered.
    pub fn register(&mut self, task_type: &str) -> Result<(), RegistryError> {
        let factory = builtin_factory(task_type).ok_or_else(|| RegistryError::UnknownTaskType {
            task_type: task_type.to_string(),
        })?;

        if self.factories.contains_key(task_type) {
            return Err(RegistryError::DuplicateTaskType {
                task_type: task_type.to_string(),
            });
        }

        self.factories.insert(task_type.to_string(), factory);
        tracing::debug!(task_type, "task type registered");
        Ok(())
    }

    /// Create a fresh task instance for `task_type`.
    pub fn create(&self, task_type: &str) -> Result<Box<dyn Task>, RegistryError> {
        let factory = self
            .factories
            .get(task_type)
            .ok_or_else(|| RegistryError::UnknownTaskType {
                task_type: task_type.to_string(),
            })?;
        Ok(factory())
    }

    /// All registered task types, in no particular order.
    pub fn list(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Remove all registrations. For test isolation.
    pub fn clear(&mut self) {
        self.factories.clear();
    }

    /// Register every builtin task type.
    pub fn with_builtin_tasks() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for task_type in BUILTIN_TASK_TYPES {
            registry.register(task_type)?;
        }
        Ok(registry)
    }
}

/// The closed set of builtin task types.
pub const BUILTIN_TASK_TYPES: &[&str] = &[
    "http_get",
    "validate_csv",
    "transform_simple",
    "save_db",
    "notify_mock",
];

fn builtin_factory(task_type: &str) -> Option<TaskFactory> {
    let factory: TaskFactory = match task_type {
        "http_get" => || Box::new(HttpGetTask::new()),
        "validate_csv" => || Box::new(ValidateCsvTask::new()),
        "transform_simple" => || Box::new(TransformSimpleTask::new()),
        "save_db" => || Box::new(SaveDbTask::new()),
        "notify_mock" => || Box::new(NotifyMockTask::new()),
        _ => return None,
    };
    Some(factory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_create_builtin_type() {
        let mut reg = TaskRegistry::new();
        reg.register("notify_mock").unwrap();
        let task = reg.create("notify_mock").unwrap();
        assert_eq!(task.metadata().task_type, "notify_mock");
    }

    #[test]
    fn create_returns_fresh_instances() {
        let mut reg = TaskRegistry::new();
        reg.register("notify_mock").unwrap();
        let a = reg.create("notify_mock").unwrap();
        let b = reg.create("notify_mock").unwrap();
        assert!(!a.state().started);
        assert!(!b.state().started);
    }

    #[test]
    fn register_unknown_type_fails() {
        let mut reg = TaskRegistry::new();
        let err = reg.register("no_such_task").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownTaskType { .. }));
        assert!(err.to_string().contains("no_such_task"));
    }

    #[test]
    fn register_duplicate_type_fails() {
        let mut reg = TaskRegistry::new();
        reg.register("http_get").unwrap();
        let err = reg.register("http_get").unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTaskType { .. }));
    }

    #[test]
    fn create_unregistered_type_fails() {
        let reg = TaskRegistry::new();
        let err = reg.create("http_get").unwrap_err();
        assert_eq!(err.to_string(), "Unknown task type: http_get");
    }

    #[test]
    fn list_returns_registered_types() {
        let reg = TaskRegistry::with_builtin_tasks().unwrap();
        let mut types = reg.list();
        types.sort_unstable();
        assert_eq!(
            types,
            vec![
                "http_get",
                "notify_mock",
                "save_db",
                "transform_simple",
                "validate_csv"
            ]
        );
    }

    #[test]
    fn clear_removes_all_registrations() {
        let mut reg = TaskRegistry::with_builtin_tasks().unwrap();
        reg.clear();
        assert!(reg.list().is_empty());
        // re-registering after clear works again
        reg.register("save_db").unwrap();
    }
}
