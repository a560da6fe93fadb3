//! Job producer.

use std::sync::Arc;

use tracing::{error, info};
use validator::Validate;

use vproc_models::{JobId, SubmitRequest};
use vproc_queue::{Broker, JobPayload};
use vproc_store::JobStore;

use crate::error::{DispatchError, DispatchResult};

/// Handle returned to the caller for a submitted job.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    /// Id of the created job record
    pub job_record_id: JobId,
    /// Broker-assigned ref id of the created entry
    pub queue_ref_id: String,
}

/// Creates job records and enqueues the matching broker entries.
pub struct Producer {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn Broker>,
}

impl Producer {
    /// Create a new producer.
    pub fn new(store: Arc<dyn JobStore>, broker: Arc<dyn Broker>) -> Self {
        Self { store, broker }
    }

    /// Submit a processing job.
    ///
    /// Creates exactly one `pending` record and then exactly one broker
    /// entry carrying the record id. The record write happens-before the
    /// enqueue, so a worker that dequeues the entry always finds the
    /// record. If the enqueue step fails the just-created record is
    /// force-failed; retrying the whole submit creates a fresh record.
    pub async fn submit(&self, request: SubmitRequest) -> DispatchResult<SubmitReceipt> {
        request.validate().map_err(|errors| {
            let field = errors
                .field_errors()
                .keys()
                .next()
                .map(|k| k.to_string())
                .unwrap_or_else(|| "request".to_string());
            DispatchError::MissingField(field)
        })?;

        let resolution = request
            .parse_resolution()
            .map_err(|e| DispatchError::InvalidResolution(e.0))?;

        let record = self
            .store
            .create(
                request.owner_id,
                &request.project_name,
                resolution,
                request.priority,
            )
            .await?;

        let payload = JobPayload::from_record(&record);
        match self.broker.enqueue(payload, record.priority).await {
            Ok(queue_ref_id) => {
                metrics::counter!("vproc_jobs_submitted_total").increment(1);
                info!(
                    job_id = %record.id,
                    owner_id = record.owner_id,
                    project = %record.project_name,
                    resolution = %record.resolution,
                    "submitted job"
                );
                Ok(SubmitReceipt {
                    job_record_id: record.id,
                    queue_ref_id,
                })
            }
            Err(e) => {
                // Never leave a pending record with no broker entry behind.
                let msg = format!("enqueue failed: {e}");
                if let Err(store_err) = self.store.force_fail(record.id, &msg).await {
                    error!(job_id = %record.id, "failed to fail orphaned record: {store_err}");
                }
                Err(e.into())
            }
        }
    }
}
