//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vproc_queue::{Broker, NackOutcome, QueueEntry};
use vproc_store::JobStore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::processor::{process_entry, ProcessOutcome, ProcessingContext};

/// Executor that processes jobs from the broker.
///
/// Runs an indefinite dequeue loop with a semaphore bounding concurrent
/// jobs, plus a periodic sweep reclaiming expired leases. One job's failure
/// never escapes its task; the loop keeps dequeueing.
pub struct JobExecutor {
    config: WorkerConfig,
    ctx: Arc<ProcessingContext>,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    worker_name: String,
}

impl JobExecutor {
    /// Create a new executor.
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn JobStore>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let worker_name = format!("worker-{}", Uuid::new_v4());
        let ctx = Arc::new(ProcessingContext::new(config.clone(), store, broker));

        Self {
            config,
            ctx,
            job_semaphore,
            shutdown,
            worker_name,
        }
    }

    /// Run the executor until shutdown.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.worker_name, self.config.max_concurrent_jobs
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let reclaim_task = self.spawn_reclaim_task();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_one() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {e}");
                        // Back off on broker errors
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        reclaim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        let _ = tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs()).await;

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Periodically reclaim expired leases and force-fail dead-lettered
    /// records.
    fn spawn_reclaim_task(&self) -> tokio::task::JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let interval = self.config.reclaim_interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match ctx.broker.reclaim_expired().await {
                            Ok(swept) => {
                                for (payload, outcome) in swept {
                                    let id = payload.job_record_id;
                                    match outcome {
                                        NackOutcome::Requeued { attempts, .. } => {
                                            info!(job_id = %id, attempts, "reclaimed expired lease");
                                        }
                                        NackOutcome::DeadLettered => {
                                            warn!(job_id = %id, "lease expired with attempts exhausted");
                                            if let Err(e) = ctx
                                                .store
                                                .force_fail(id, "retry attempts exhausted after lease expiry")
                                                .await
                                            {
                                                error!(job_id = %id, "failed to fail dead-lettered record: {e}");
                                            }
                                        }
                                    }
                                }
                            }
                            Err(e) => warn!("Failed to reclaim expired leases: {e}"),
                        }
                    }
                }
            }
        })
    }

    /// Dequeue one entry when a job slot is free and spawn its execution.
    async fn consume_one(&self) -> WorkerResult<()> {
        let permit = self
            .job_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::job_failed("semaphore closed"))?;

        let Some(entry) = self.ctx.broker.dequeue(self.config.dequeue_wait).await? else {
            // Dequeue timeout is transient; drop the permit and loop again.
            return Ok(());
        };

        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            let _permit = permit;
            Self::execute_entry(ctx, entry).await;
        });

        Ok(())
    }

    /// Execute a single leased entry, then ack or nack it.
    async fn execute_entry(ctx: Arc<ProcessingContext>, entry: QueueEntry) {
        let id = entry.payload.job_record_id;
        info!(job_id = %id, ref_id = %entry.ref_id, attempts = entry.attempts, "Executing job");

        match process_entry(&ctx, &entry).await {
            Ok(outcome) => {
                if let Err(e) = ctx.broker.ack(&entry.ref_id).await {
                    error!(job_id = %id, "Failed to ack entry: {e}");
                }
                let label = match outcome {
                    ProcessOutcome::Completed => "completed",
                    ProcessOutcome::Skipped => "skipped",
                };
                metrics::counter!("vproc_worker_jobs_total", "outcome" => label).increment(1);
                debug!(job_id = %id, outcome = label, "entry acked");
            }
            Err(e) => {
                metrics::counter!("vproc_worker_jobs_total", "outcome" => "failed").increment(1);
                match ctx.broker.nack(&entry.ref_id, &e.to_string()).await {
                    Ok(NackOutcome::Requeued { attempts, delay }) => {
                        info!(
                            job_id = %id,
                            attempts,
                            "job will be retried in {delay:?}"
                        );
                    }
                    Ok(NackOutcome::DeadLettered) => {
                        warn!(job_id = %id, "retry attempts exhausted, entry dead-lettered");
                        if let Err(store_err) = ctx
                            .store
                            .force_fail(id, &format!("retry attempts exhausted: {e}"))
                            .await
                        {
                            error!(job_id = %id, "failed to fail dead-lettered record: {store_err}");
                        }
                    }
                    Err(nack_err) => {
                        error!(job_id = %id, "Failed to nack entry: {nack_err}");
                    }
                }
            }
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            if self.job_semaphore.available_permits() == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
