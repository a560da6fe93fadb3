//! Broker entry and payload types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use vproc_models::{JobId, JobRecord, Resolution};

/// Payload carried by a broker entry.
///
/// Carries enough for a worker to run the pipeline and update the right
/// record; `job_record_id` is the single correlation key between broker and
/// record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Owning principal
    pub owner_id: u64,
    /// Project holding the input videos
    pub project_name: String,
    /// Target resolution
    pub resolution: Resolution,
    /// Id of the backing job record
    pub job_record_id: JobId,
}

impl JobPayload {
    /// Build the payload for a job record.
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            owner_id: record.owner_id,
            project_name: record.project_name.clone(),
            resolution: record.resolution,
            job_record_id: record.id,
        }
    }
}

/// A leased queue entry handed to a worker.
///
/// `ref_id` is broker-assigned and opaque; record lookups always go through
/// `payload.job_record_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Opaque broker-assigned identifier
    pub ref_id: String,
    /// Job payload
    pub payload: JobPayload,
    /// Dequeue attempts so far, this delivery included
    pub attempts: u32,
    /// Dequeue priority; lower values dequeue first
    pub priority: i32,
    /// Error recorded by the previous failed attempt, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Insertion sequence, the FIFO tie-break within a priority tier
    #[serde(default)]
    pub(crate) seq: u64,
}

/// What happened to a nacked or lease-expired entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    /// Requeued for another attempt after a backoff delay.
    Requeued { attempts: u32, delay: Duration },
    /// Attempts exhausted; the entry moved to the dead-letter path and the
    /// backing record must be force-failed by the caller.
    DeadLettered,
}
