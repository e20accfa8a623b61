//! DAG executor: dependency-respecting, sequential scheduling of workflow
//! nodes with skip-on-failed-dependency propagation and run persistence.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::runner::{RunStatus, TaskRunner};
use crate::store::run_store::RunStore;
use crate::store::StoreError;
use crate::task::{ExecutionContext, TaskCommand};

use super::{NodeStatus, WorkflowDefinition, WorkflowNode, WorkflowResult, WorkflowStatus};

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A full pass over the pending nodes made no progress: the graph has
    /// a cycle or a dependency on a node that does not exist.
    #[error("cyclic or blocked dependency graph, unresolved nodes: {0:?}")]
    CyclicOrBlockedDag(Vec<String>),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Executes workflow definitions node by node.
///
/// Within one workflow, nodes run strictly sequentially; when several
/// nodes are ready in the same pass they execute in the insertion order of
/// the `nodes` sequence.
pub struct WorkflowExecutor {
    runner: Arc<TaskRunner>,
    run_store: RunStore,
}

impl WorkflowExecutor {
    pub fn new(runner: Arc<TaskRunner>, run_store: RunStore) -> Self {
        Self { runner, run_store }
    }

    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
    ) -> Result<WorkflowResult, ExecutorError> {
        let started_at = Utc::now();
        info!(
            workflow = %workflow.name,
            node_count = workflow.nodes.len(),
            "starting workflow execution"
        );

        let run_row_id = self.run_store.save_workflow_run(
            &workflow.name,
            WorkflowStatus::Running,
            &json!({}),
            started_at,
            started_at,
        )?;

        let mut context = ExecutionContext::new();
        let mut results: IndexMap<String, Value> = IndexMap::new();
        let mut node_status: IndexMap<String, NodeStatus> = IndexMap::new();
        let mut executed: HashSet<String> = HashSet::new();
        let mut pending: Vec<&WorkflowNode> = workflow.nodes.iter().collect();

        while !pending.is_empty() {
            let mut progress = false;
            let mut remaining: Vec<&WorkflowNode> = Vec::new();

            for node in pending {
                let failed_dep = node
                    .depends_on
                    .iter()
                    .any(|dep| node_status.get(dep) == Some(&NodeStatus::Failed));

                if failed_dep {
                    warn!(node = %node.id, "skipping node, a dependency failed");
                    let synthetic = json!({
                        "status": "SKIPPED",
                        "reason": format!("Dependencia fallida: {:?}", node.depends_on),
                    });
                    let now = Utc::now();
                    self.run_store.save_node_run(
                        run_row_id,
                        &node.id,
                        &node.node_type,
                        NodeStatus::Skipped,
                        now,
                        now,
                        &synthetic,
                    )?;
                    node_status.insert(node.id.clone(), NodeStatus::Skipped);
                    results.insert(node.id.clone(), synthetic);
                    executed.insert(node.id.clone());
                    progress = true;
                    continue;
                }

                if !node.depends_on.iter().all(|dep| executed.contains(dep)) {
                    remaining.push(node);
                    continue;
                }

                let status = self
                    .execute_node(workflow, node, run_row_id, &mut context, &mut results)
                    .await?;
                node_status.insert(node.id.clone(), status);
                executed.insert(node.id.clone());
                progress = true;
            }

            pending = remaining;

            if !progress && !pending.is_empty() {
                let unresolved: Vec<String> = pending.iter().map(|n| n.id.clone()).collect();
                error!(
                    workflow = %workflow.name,
                    ?unresolved,
                    "no progress possible, dependency graph is cyclic or blocked"
                );
                let err = ExecutorError::CyclicOrBlockedDag(unresolved);
                self.run_store.update_workflow_run(
                    run_row_id,
                    WorkflowStatus::Failed,
                    &json!({"error": err.to_string()}),
                    Utc::now(),
                )?;
                return Err(err);
            }
        }

        let status = if node_status.values().all(|s| *s == NodeStatus::Success) {
            WorkflowStatus::Success
        } else if node_status.values().any(|s| *s == NodeStatus::Success) {
            WorkflowStatus::PartialSuccess
        } else {
            WorkflowStatus::Failed
        };

        let summary = serde_json::to_value(&node_status)
            .unwrap_or_else(|_| json!({}));
        self.run_store
            .update_workflow_run(run_row_id, status, &summary, Utc::now())?;

        info!(
            workflow = %workflow.name,
            status = status.as_str(),
            "workflow execution complete"
        );

        Ok(WorkflowResult {
            workflow_name: workflow.name.clone(),
            status,
            results,
        })
    }

    /// Run one ready node and publish its result into the shared context.
    async fn execute_node(
        &self,
        workflow: &WorkflowDefinition,
        node: &WorkflowNode,
        run_row_id: i64,
        context: &mut ExecutionContext,
        results: &mut IndexMap<String, Value>,
    ) -> Result<NodeStatus, ExecutorError> {
        info!(node = %node.id, task_type = %node.node_type, "executing node");

        let node_started = Utc::now();
        let node_run_id = self.run_store.create_node_run_running(
            run_row_id,
            &node.id,
            &node.node_type,
            node_started,
        )?;

        let command = TaskCommand {
            run_id: format!("{}_{}", workflow.name, node.id),
            node_key: node.id.clone(),
            task_type: node.node_type.clone(),
            params: node.params.clone(),
            metadata: None,
        };

        let outcome = self.runner.execute_command(&command, context).await;
        let finished = Utc::now();

        // A returned payload with `success: false` is a graceful failure:
        // success transport, failed node.
        let graceful_failure = outcome
            .result
            .as_ref()
            .and_then(Value::as_object)
            .map(|obj| obj.get("success") == Some(&Value::Bool(false)))
            .unwrap_or(false);

        let status = if outcome.status == RunStatus::Success && !graceful_failure {
            NodeStatus::Success
        } else {
            NodeStatus::Failed
        };

        let result = match outcome.result {
            Some(result) => result,
            None => json!({
                "success": false,
                "error": outcome.error,
                "error_type": outcome.error_type,
            }),
        };

        self.run_store
            .update_node_run_completed(node_run_id, status, finished, &result)?;

        if status == NodeStatus::Success {
            info!(node = %node.id, "node completed");
        } else {
            warn!(node = %node.id, "node failed");
        }

        context.insert(node.id.clone(), result.clone());
        results.insert(node.id.clone(), result);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::decorator::default_decorator_map;
    use crate::task::TaskRegistry;

    fn executor() -> WorkflowExecutor {
        let runner = Arc::new(TaskRunner::new(
            TaskRegistry::with_builtin_tasks().unwrap(),
            default_decorator_map(),
        ));
        WorkflowExecutor::new(runner, RunStore::in_memory().unwrap())
    }

    fn notify(id: &str, depends_on: &[&str]) -> WorkflowNode {
        WorkflowNode {
            id: id.into(),
            node_type: "notify_mock".into(),
            params: json!({"channel": "console", "message": format!("from {id}")}),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn failing_validate(id: &str, depends_on: &[&str]) -> WorkflowNode {
        WorkflowNode {
            id: id.into(),
            node_type: "validate_csv".into(),
            params: json!({"path": "/no/such/file.csv", "columns": ["a"]}),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn workflow(nodes: Vec<WorkflowNode>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "test-workflow".into(),
            id: None,
            nodes,
        }
    }

    #[tokio::test]
    async fn linear_workflow_succeeds() {
        let exec = executor();
        let wf = workflow(vec![notify("a", &[]), notify("b", &["a"])]);
        let result = exec.execute(&wf).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Success);
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.results["a"]["sent"], true);
        assert_eq!(result.results["b"]["sent"], true);
    }

    #[tokio::test]
    async fn failed_dependency_skips_dependents() {
        let exec = executor();
        let wf = workflow(vec![
            failing_validate("v", &[]),
            notify("n", &["v"]),
        ]);
        let result = exec.execute(&wf).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.results["v"]["success"], false);
        assert_eq!(result.results["n"]["status"], "SKIPPED");
        assert!(result.results["n"]["reason"]
            .as_str()
            .unwrap()
            .contains("v"));
    }

    #[tokio::test]
    async fn partial_success_over_independent_roots() {
        let exec = executor();
        let wf = workflow(vec![
            notify("a", &[]),
            failing_validate("b", &[]),
            notify("c", &[]),
        ]);
        let result = exec.execute(&wf).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::PartialSuccess);
        assert_eq!(result.results["a"]["sent"], true);
        assert_eq!(result.results["b"]["success"], false);
        assert_eq!(result.results["c"]["sent"], true);
    }

    #[tokio::test]
    async fn cycle_is_rejected_without_running_anything() {
        let exec = executor();
        let wf = workflow(vec![notify("a", &["b"]), notify("b", &["a"])]);
        let err = exec.execute(&wf).await.unwrap_err();

        match err {
            ExecutorError::CyclicOrBlockedDag(unresolved) => {
                assert_eq!(unresolved.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unknown_dependency_blocks_the_graph() {
        let exec = executor();
        let wf = workflow(vec![notify("a", &["ghost"])]);
        let err = exec.execute(&wf).await.unwrap_err();
        assert!(matches!(err, ExecutorError::CyclicOrBlockedDag(_)));
    }

    #[tokio::test]
    async fn ready_nodes_run_in_insertion_order() {
        let exec = executor();
        let wf = workflow(vec![notify("z_second", &[]), notify("a_first", &[])]);
        let result = exec.execute(&wf).await.unwrap();

        let keys: Vec<&String> = result.results.keys().collect();
        assert_eq!(keys, vec!["z_second", "a_first"]);
    }

    #[tokio::test]
    async fn unknown_task_type_fails_the_node_with_hard_failure_shape() {
        let exec = executor();
        let wf = workflow(vec![WorkflowNode {
            id: "x".into(),
            node_type: "no_such_task".into(),
            params: json!({}),
            depends_on: vec![],
        }]);
        let result = exec.execute(&wf).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.results["x"]["success"], false);
        assert_eq!(
            result.results["x"]["error"],
            "Unknown task type: no_such_task"
        );
        assert_eq!(result.results["x"]["error_type"], "UnknownTaskType");
    }

    #[tokio::test]
    async fn empty_workflow_is_success() {
        let exec = executor();
        let wf = workflow(vec![]);
        let result = exec.execute(&wf).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Success);
        assert!(result.results.is_empty());
    }
}
