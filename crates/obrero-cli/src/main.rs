use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use obrero_core::config::{load_config, WorkerConfig};
use obrero_core::service::WorkerService;

#[derive(Parser)]
#[command(name = "obrero", version, about = "Workflow execution worker")]
struct Cli {
    /// Path to the shared workflow database (default: database.db).
    #[arg(long, env = "SHARED_DB_PATH")]
    shared_db: Option<PathBuf>,

    /// Path to the worker's own run-record database
    /// (default: data/worker_workflows.db).
    #[arg(long, env = "WORKER_DB_PATH")]
    worker_db: Option<PathBuf>,

    /// Polling interval in seconds (default: 10.0).
    #[arg(long, env = "POLL_INTERVAL")]
    poll_interval: Option<f64>,

    /// Optional TOML config file; flags and env vars override it.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> Result<WorkerConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path).context("failed to load config file")?,
            None => WorkerConfig::default(),
        };

        if let Some(shared_db) = self.shared_db {
            config.shared_db_path = shared_db;
        }
        if let Some(worker_db) = self.worker_db {
            config.worker_db_path = worker_db;
        }
        if let Some(poll_interval) = self.poll_interval {
            config.poll_interval_seconds = poll_interval;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    obrero_core::init_tracing();

    let cli = Cli::parse();
    let config = cli.into_config()?;

    if !config.shared_db_path.exists() {
        bail!(
            "shared database '{}' not found; make sure the producer has created it",
            config.shared_db_path.display()
        );
    }

    let service = Arc::new(
        WorkerService::new(config).context("failed to initialise worker service")?,
    );

    tracing::info!("worker service starting, press Ctrl-C to stop");

    tokio::select! {
        _ = service.start_blocking() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
        }
    }

    service.stop().await;

    let stats = service.stats();
    tracing::info!(
        total_processed = stats.total_processed,
        successful = stats.successful,
        failed = stats.failed,
        "final statistics"
    );

    Ok(())
}
