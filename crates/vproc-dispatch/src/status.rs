//! Status read path.

use std::sync::Arc;

use tracing::debug;

use vproc_models::{JobId, JobStatus};
use vproc_queue::{Broker, LiveJobState};
use vproc_store::JobStore;

use crate::error::{DispatchError, DispatchResult};

/// Merges the persisted record with the broker's live snapshot.
///
/// The persisted status is authoritative; the broker snapshot may only
/// upgrade a `pending` record to `processing` sooner than a store poll
/// would see it. On any mismatch the store wins at the next worker write;
/// this read path never writes.
pub struct StatusReconciler {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn Broker>,
}

impl StatusReconciler {
    /// Create a new reconciler.
    pub fn new(store: Arc<dyn JobStore>, broker: Arc<dyn Broker>) -> Self {
        Self { store, broker }
    }

    /// Current status of a job.
    pub async fn job_status(&self, id: JobId) -> DispatchResult<JobStatus> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or(DispatchError::NotFound(id))?;

        if record.status.is_terminal() {
            return Ok(record.status);
        }

        if record.status == JobStatus::Pending {
            // Latency hint only; a broker error here is not a read failure.
            match self.broker.live_state(id).await {
                Ok(Some(live)) if live.state == LiveJobState::Processing => {
                    debug!(job_id = %id, "live state ahead of record, reporting processing");
                    return Ok(JobStatus::Processing);
                }
                Ok(_) => {}
                Err(e) => debug!(job_id = %id, "live state unavailable: {e}"),
            }
        }

        Ok(record.status)
    }
}
