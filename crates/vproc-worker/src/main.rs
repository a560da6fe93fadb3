//! Video processing worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vproc_dispatch::reconcile;
use vproc_media::check_pipeline;
use vproc_queue::{Broker, RedisBroker};
use vproc_store::{JobStore, RedisJobStore};
use vproc_worker::{JobExecutor, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vproc=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vproc-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    // Fail fast if the pipeline binary is not runnable
    if let Err(e) = check_pipeline(&config.pipeline_program) {
        error!("{e}");
        std::process::exit(1);
    }

    let store: Arc<dyn JobStore> = match RedisJobStore::from_env() {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to create record store: {e}");
            std::process::exit(1);
        }
    };

    let broker: Arc<dyn Broker> = match RedisBroker::from_env() {
        Ok(b) => Arc::new(b),
        Err(e) => {
            error!("Failed to create broker: {e}");
            std::process::exit(1);
        }
    };

    // Rebuild the queue from the record store after a broker loss
    match reconcile(store.as_ref(), broker.as_ref()).await {
        Ok(0) => {}
        Ok(n) => info!("Re-enqueued {n} orphaned records"),
        Err(e) => error!("Startup reconciliation failed: {e}"),
    }

    let executor = Arc::new(JobExecutor::new(config, store, broker));

    // Ctrl-C triggers a graceful drain
    let shutdown_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {e}");
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
