//! Broker-side live job snapshots.
//!
//! A short-TTL snapshot of where an entry sits inside the broker, keyed by
//! record id. The status reconciler reads it to report `processing` sooner
//! than a record-store poll would; it is a latency hint, never the source
//! of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vproc_models::JobId;

/// Where an entry currently sits inside the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveJobState {
    /// Waiting in the queue (or delayed between attempts)
    Queued,
    /// Leased to a worker
    Processing,
}

/// Live snapshot for one record id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveState {
    /// Backing record id
    pub job_record_id: JobId,
    /// Broker-side state
    pub state: LiveJobState,
    /// Dequeue attempts so far
    pub attempts: u32,
    /// When this snapshot was last written
    pub updated_at: DateTime<Utc>,
}

impl LiveState {
    /// Snapshot for a freshly enqueued entry.
    pub fn queued(job_record_id: JobId) -> Self {
        Self {
            job_record_id,
            state: LiveJobState::Queued,
            attempts: 0,
            updated_at: Utc::now(),
        }
    }

    /// Mark the entry leased to a worker.
    pub fn leased(mut self, attempts: u32) -> Self {
        self.state = LiveJobState::Processing;
        self.attempts = attempts;
        self.updated_at = Utc::now();
        self
    }

    /// Mark the entry back in the queue awaiting a retry.
    pub fn requeued(mut self, attempts: u32) -> Self {
        self.state = LiveJobState::Queued;
        self.attempts = attempts;
        self.updated_at = Utc::now();
        self
    }
}
