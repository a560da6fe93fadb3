//! Restart reconciliation.

use tracing::info;

use vproc_queue::{Broker, JobPayload};
use vproc_store::JobStore;

use crate::error::DispatchResult;

/// Re-enqueue non-terminal records that have no live broker entry.
///
/// The broker is disposable: after losing it, running this at startup
/// rebuilds the queue from the record store. Records already represented in
/// the broker are left alone, so the sweep is idempotent.
pub async fn reconcile(store: &dyn JobStore, broker: &dyn Broker) -> DispatchResult<usize> {
    let mut requeued = 0usize;

    for record in store.list_active().await? {
        if broker.live_state(record.id).await?.is_some() {
            continue;
        }
        let payload = JobPayload::from_record(&record);
        broker.enqueue(payload, record.priority).await?;
        info!(job_id = %record.id, status = %record.status, "re-enqueued orphaned record");
        requeued += 1;
    }

    if requeued > 0 {
        metrics::counter!("vproc_jobs_reconciled_total").increment(requeued as u64);
        info!("reconciliation re-enqueued {requeued} records");
    }
    Ok(requeued)
}
