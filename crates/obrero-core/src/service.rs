//! Worker service: the polling loop that claims pending workflows from
//! the shared store, executes them, and writes terminal statuses back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::decorator::default_decorator_map;
use crate::error::Result;
use crate::runner::TaskRunner;
use crate::store::{RunStore, SharedStore, SharedWorkflow};
use crate::task::TaskRegistry;
use crate::workflow::{ExternalStatus, WorkflowExecutor};

/// Running totals maintained by the polling loop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub started_at: Option<DateTime<Utc>>,
}

/// Polls the shared store for `en_espera` workflows and executes them.
///
/// Construction registers every builtin task type and opens both stores.
/// The loop observes the stop flag between workflows and between ticks; a
/// task in flight is never cancelled mid-execution.
pub struct WorkerService {
    config: WorkerConfig,
    shared: SharedStore,
    executor: WorkflowExecutor,
    stats: Mutex<WorkerStats>,
    stop_flag: AtomicBool,
    stop_notify: Notify,
    handle: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl WorkerService {
    pub fn new(config: WorkerConfig) -> Result<Self> {
        config.validate()?;

        let registry = TaskRegistry::with_builtin_tasks()?;
        let runner = Arc::new(TaskRunner::new(registry, default_decorator_map()));
        let run_store = RunStore::open(&config.worker_db_path)?;
        let shared = SharedStore::open(&config.shared_db_path)?;
        let executor = WorkflowExecutor::new(runner, run_store);

        info!(
            shared_db = %config.shared_db_path.display(),
            worker_db = %config.worker_db_path.display(),
            poll_interval_seconds = config.poll_interval_seconds,
            "worker service initialised"
        );

        Ok(Self {
            config,
            shared,
            executor,
            stats: Mutex::new(WorkerStats::default()),
            stop_flag: AtomicBool::new(false),
            stop_notify: Notify::new(),
            handle: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    /// Process every currently pending workflow once. Returns how many
    /// workflows were claimed and executed this tick.
    pub async fn drain_pending(&self) -> usize {
        let pending = match self.shared.pending() {
            Ok(pending) => pending,
            Err(err) => {
                error!(error = %err, "failed to read pending workflows");
                return 0;
            }
        };

        if pending.is_empty() {
            debug!("no pending workflows");
            return 0;
        }

        info!(count = pending.len(), "found pending workflows");
        let mut claimed = 0;
        for workflow in pending {
            if self.stop_flag.load(Ordering::SeqCst) {
                break;
            }
            if self.process_workflow(&workflow).await {
                claimed += 1;
            }
        }
        claimed
    }

    /// Claim and execute one workflow row, writing the terminal status
    /// back. Returns whether the claim succeeded.
    async fn process_workflow(&self, workflow: &SharedWorkflow) -> bool {
        info!(workflow = %workflow.name, id = %workflow.id, "processing workflow");

        match self.shared.claim(&workflow.id) {
            Ok(true) => {}
            Ok(false) => {
                warn!(id = %workflow.id, "could not claim workflow, skipping");
                return false;
            }
            Err(err) => {
                error!(id = %workflow.id, error = %err, "claim failed");
                return false;
            }
        }

        let definition = match workflow.to_definition() {
            Ok(definition) => definition,
            Err(err) => {
                error!(id = %workflow.id, error = %err, "definition conversion failed");
                self.mark_failed(&workflow.id);
                self.record_outcome(false);
                return true;
            }
        };

        match self.executor.execute(&definition).await {
            Ok(result) => {
                let external = result.status.to_external();
                let updated = match self
                    .shared
                    .update_status(&workflow.id, external, Some(&result.results))
                {
                    Ok(updated) => updated,
                    Err(err) => {
                        error!(id = %workflow.id, error = %err, "failed to write terminal status");
                        false
                    }
                };

                let success = updated && external == ExternalStatus::Completado;
                if success {
                    info!(workflow = %workflow.name, status = external.as_str(), "workflow completed");
                } else {
                    warn!(workflow = %workflow.name, status = external.as_str(), "workflow failed");
                }
                self.record_outcome(success);
            }
            Err(err) => {
                error!(workflow = %workflow.name, error = %err, "workflow execution failed");
                self.mark_failed(&workflow.id);
                self.record_outcome(false);
            }
        }
        true
    }

    /// Best-effort `fallido` transition; the loop survives either way.
    fn mark_failed(&self, id: &str) {
        if let Err(err) = self.shared.update_status(id, ExternalStatus::Fallido, None) {
            error!(id, error = %err, "could not mark workflow as failed");
        }
    }

    fn record_outcome(&self, success: bool) {
        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        stats.total_processed += 1;
        if success {
            stats.successful += 1;
        } else {
            stats.failed += 1;
        }
    }

    async fn poll_loop(&self) {
        info!("polling loop started");
        {
            let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
            stats.started_at = Some(Utc::now());
        }

        while !self.stop_flag.load(Ordering::SeqCst) {
            self.drain_pending().await;

            if self.stop_flag.load(Ordering::SeqCst) {
                break;
            }

            let interval = Duration::from_secs_f64(self.config.poll_interval_seconds);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.stop_notify.notified() => {}
            }
        }

        info!("polling loop stopped");
    }

    /// Start the polling loop on a background task. Non-blocking.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().unwrap_or_else(|p| p.into_inner());
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("worker service is already running");
            return;
        }

        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            "starting polling service"
        );
        let service = Arc::clone(self);
        *handle = Some(tokio::spawn(async move {
            service.poll_loop().await;
        }));
    }

    /// Run the polling loop in the calling task until `stop` is called.
    pub async fn start_blocking(&self) {
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            "starting polling service (blocking)"
        );
        self.poll_loop().await;
    }

    /// Stop the polling loop. Idempotent; joins the background task with a
    /// 5-second timeout.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("stop called more than once, ignoring");
            return;
        }

        info!("stopping worker service");
        self.stop_flag.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();

        let handle = {
            let mut guard = self.handle.lock().unwrap_or_else(|p| p.into_inner());
            guard.take()
        };
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                warn!("polling task did not finish within 5s, detaching");
            }
        }

        let stats = self.stats();
        info!(
            total_processed = stats.total_processed,
            successful = stats.successful,
            failed = stats.failed,
            "worker service stopped"
        );
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service_with_shared_db() -> (WorkerService, SharedStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let shared_path = dir.path().join("shared.db");
        let producer = SharedStore::open(&shared_path).unwrap();
        producer.init_schema().unwrap();

        let config = WorkerConfig {
            shared_db_path: shared_path,
            worker_db_path: dir.path().join("worker.db"),
            poll_interval_seconds: 0.05,
        };
        let service = WorkerService::new(config).unwrap();
        (service, producer, dir)
    }

    fn notify_definition() -> serde_json::Value {
        json!({
            "nodes": [
                {"id": "n", "type": "notify_mock",
                 "params": {"channel": "console", "message": "hello"},
                 "depends_on": []}
            ]
        })
    }

    #[tokio::test]
    async fn drain_processes_pending_row_to_completado() {
        let (service, producer, _dir) = service_with_shared_db();
        producer
            .insert_pending("wf_1", "demo", &notify_definition())
            .unwrap();

        let claimed = service.drain_pending().await;
        assert_eq!(claimed, 1);

        // the row is terminal now; nothing pending remains
        assert!(producer.pending().unwrap().is_empty());

        let stats = service.stats();
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn failing_workflow_ends_fallido() {
        let (service, producer, _dir) = service_with_shared_db();
        producer
            .insert_pending(
                "wf_1",
                "broken",
                &json!({
                    "nodes": [
                        {"id": "v", "type": "validate_csv",
                         "params": {"path": "/no/such.csv", "columns": ["a"]},
                         "depends_on": []}
                    ]
                }),
            )
            .unwrap();

        service.drain_pending().await;

        let stats = service.stats();
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn bad_definition_marks_row_fallido_and_loop_survives() {
        let (service, producer, _dir) = service_with_shared_db();
        // nodes present but malformed (id missing), so conversion fails
        producer
            .insert_pending("bad", "bad", &json!({"nodes": [{"type": 1}]}))
            .unwrap();
        producer
            .insert_pending("good", "good", &notify_definition())
            .unwrap();

        let claimed = service.drain_pending().await;
        assert_eq!(claimed, 2);

        let stats = service.stats();
        assert_eq!(stats.total_processed, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn start_and_stop_round_trip() {
        let (service, producer, _dir) = service_with_shared_db();
        producer
            .insert_pending("wf_1", "demo", &notify_definition())
            .unwrap();

        let service = Arc::new(service);
        service.start();
        // starting twice is a warning, not an error
        service.start();

        tokio::time::sleep(Duration::from_millis(300)).await;
        service.stop().await;
        // idempotent
        service.stop().await;

        let stats = service.stats();
        assert_eq!(stats.total_processed, 1);
        assert!(stats.started_at.is_some());
    }

    #[tokio::test]
    async fn empty_store_drains_nothing() {
        let (service, _producer, _dir) = service_with_shared_db();
        assert_eq!(service.drain_pending().await, 0);
        assert_eq!(service.stats().total_processed, 0);
    }
}
