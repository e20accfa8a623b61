//! Workflow definitions, statuses, and execution results.

pub mod executor;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use executor::{ExecutorError, WorkflowExecutor};

/// A node in the workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default = "empty_params")]
    pub params: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A named DAG of task nodes. `id` carries the shared-store row id when
/// the definition came from a producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub nodes: Vec<WorkflowNode>,
}

/// Status of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }
}

/// Internal status of a whole workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Running,
    Success,
    PartialSuccess,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::PartialSuccess => "PARTIAL_SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Map to the producer-facing vocabulary.
    pub fn to_external(self) -> ExternalStatus {
        match self {
            Self::Success | Self::PartialSuccess => ExternalStatus::Completado,
            Self::Failed => ExternalStatus::Fallido,
            Self::Running => ExternalStatus::EnProgreso,
        }
    }
}

/// Producer-facing status vocabulary of the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalStatus {
    EnEspera,
    EnProgreso,
    Completado,
    Fallido,
}

impl ExternalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnEspera => "en_espera",
            Self::EnProgreso => "en_progreso",
            Self::Completado => "completado",
            Self::Fallido => "fallido",
        }
    }
}

/// Outcome of one workflow execution: terminal status plus the per-node
/// result payloads in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub results: IndexMap<String, Value>,
}
