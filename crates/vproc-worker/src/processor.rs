//! Per-job processing logic.

use std::sync::Arc;

use tracing::{debug, info, warn};

use vproc_media::{evaluate, ArtifactLayout, CompletionReport, PipelineCommand, PipelineRunner};
use vproc_models::JobStatus;
use vproc_queue::{Broker, QueueEntry};
use vproc_store::{JobStore, TransitionOutcome};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Context shared by job executions.
pub struct ProcessingContext {
    pub config: WorkerConfig,
    pub store: Arc<dyn JobStore>,
    pub broker: Arc<dyn Broker>,
    pub layout: ArtifactLayout,
    pub runner: PipelineRunner,
}

impl ProcessingContext {
    /// Build the context from config, store and broker.
    pub fn new(config: WorkerConfig, store: Arc<dyn JobStore>, broker: Arc<dyn Broker>) -> Self {
        let layout = ArtifactLayout::new(&config.owner_root);
        let runner = PipelineRunner::new(config.pipeline_timeout);
        Self {
            config,
            store,
            broker,
            layout,
            runner,
        }
    }
}

/// Outcome of handling one leased entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Pipeline ran and the record reached `completed`.
    Completed,
    /// The record was already terminal; nothing re-ran.
    Skipped,
}

/// Handle one leased entry end to end.
///
/// `Ok` means the entry can be acked; `Err` means the caller must nack so
/// the broker applies its retry policy. Failed attempts leave the record in
/// `processing`; it only reaches `failed` on the dead-letter path, so a
/// retried record never observes a transition out of a terminal status.
pub async fn process_entry(
    ctx: &ProcessingContext,
    entry: &QueueEntry,
) -> WorkerResult<ProcessOutcome> {
    let id = entry.payload.job_record_id;

    match ctx
        .store
        .transition(id, JobStatus::Pending, JobStatus::Processing, None)
        .await?
    {
        TransitionOutcome::Applied(_) => {}
        TransitionOutcome::AlreadyTerminal(status) => {
            // Redelivery after the terminal write already happened; the
            // pipeline must not re-run.
            info!(job_id = %id, %status, "record already terminal, skipping redelivered entry");
            return Ok(ProcessOutcome::Skipped);
        }
        TransitionOutcome::Conflict {
            actual: JobStatus::Processing,
            ..
        } => {
            // Redelivered mid-flight entry (earlier attempt failed or its
            // worker crashed); this lease owns the record now.
            debug!(job_id = %id, attempts = entry.attempts, "record already processing, continuing");
        }
        TransitionOutcome::Conflict { expected, actual } => {
            return Err(WorkerError::job_failed(format!(
                "record {id} in unexpected status {actual} (expected {expected})"
            )));
        }
    }

    match run_pipeline(ctx, entry).await {
        Ok(report) => {
            match ctx
                .store
                .transition(id, JobStatus::Processing, JobStatus::Completed, None)
                .await?
            {
                TransitionOutcome::Applied(_) => {
                    info!(job_id = %id, "job completed: {}", report.message);
                }
                // A concurrent writer got there first; the persisted state
                // wins and this worker just moves on.
                outcome => {
                    warn!(job_id = %id, ?outcome, "completion write discarded");
                }
            }
            Ok(ProcessOutcome::Completed)
        }
        Err(e) => {
            warn!(job_id = %id, attempts = entry.attempts, "pipeline attempt failed: {e}");
            Err(e)
        }
    }
}

/// Run one pipeline invocation and decide its verdict.
async fn run_pipeline(ctx: &ProcessingContext, entry: &QueueEntry) -> WorkerResult<CompletionReport> {
    let payload = &entry.payload;

    ctx.layout
        .validate_input(payload.owner_id, &payload.project_name)?;

    let cmd = PipelineCommand::new(
        &ctx.config.pipeline_program,
        payload.owner_id,
        payload.project_name.clone(),
        payload.resolution,
    );
    let output = ctx.runner.run(&cmd).await?;

    let artifacts = ctx
        .layout
        .count_artifacts(payload.owner_id, &payload.project_name)?;
    let report = evaluate(&output, artifacts)?;

    info!(
        job_id = %payload.job_record_id,
        artifacts,
        "pipeline succeeded: {}",
        report.message
    );
    Ok(report)
}
