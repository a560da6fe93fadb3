//! Job record store.
//!
//! The record store is the single source of truth for externally visible job
//! status. Status writes are conditional updates: a transition applies only
//! when the record's current status matches the expected predecessor, and
//! terminal records absorb every further write. That conditional write is
//! the safety net against lost updates if the broker's one-lease-per-entry
//! contract is ever violated.

pub mod error;
pub mod memory;
pub mod redis;

use async_trait::async_trait;

use vproc_models::{JobId, JobRecord, JobStatus, Resolution};

pub use self::error::{StoreError, StoreResult};
pub use self::memory::MemoryJobStore;
pub use self::redis::{RedisJobStore, StoreConfig};

/// Result of a conditional status write.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The write applied; the updated record is returned.
    Applied(JobRecord),
    /// The record is already terminal; the write was discarded.
    AlreadyTerminal(JobStatus),
    /// The current status did not match the expected predecessor; the
    /// losing write is discarded (logged by the caller, never fatal).
    Conflict {
        expected: JobStatus,
        actual: JobStatus,
    },
}

impl TransitionOutcome {
    /// Whether the write applied.
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// CRUD plus conditional transitions over job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a new `pending` record, assigning the next record id.
    async fn create(
        &self,
        owner_id: u64,
        project_name: &str,
        resolution: Resolution,
        priority: i32,
    ) -> StoreResult<JobRecord>;

    /// Fetch a record by id.
    async fn get(&self, id: JobId) -> StoreResult<Option<JobRecord>>;

    /// Conditionally transition a record from `expected` to `next`.
    ///
    /// `error` is recorded on the record when `next` is `failed`.
    /// Returns `NotFound` if the record does not exist and
    /// `InvalidTransition` if the state machine has no `expected -> next`
    /// edge.
    async fn transition(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
        error: Option<&str>,
    ) -> StoreResult<TransitionOutcome>;

    /// Force a non-terminal record to `failed` (dead-letter path).
    ///
    /// A terminal record is left untouched and reported as
    /// `AlreadyTerminal`.
    async fn force_fail(&self, id: JobId, error: &str) -> StoreResult<TransitionOutcome>;

    /// Records not yet in a terminal status, for restart reconciliation.
    async fn list_active(&self) -> StoreResult<Vec<JobRecord>>;
}

/// Apply `next` to a record, stamping timestamps and the error message.
fn apply_status(record: JobRecord, next: JobStatus, error: Option<&str>) -> JobRecord {
    match next {
        JobStatus::Processing => record.start(),
        JobStatus::Completed => record.complete(),
        JobStatus::Failed => record.fail(error.unwrap_or("job failed")),
        // Unreachable: no machine edge targets `pending`, and callers are
        // rejected with InvalidTransition before getting here.
        JobStatus::Pending => record,
    }
}

fn outcome_label(outcome: &TransitionOutcome) -> &'static str {
    match outcome {
        TransitionOutcome::Applied(_) => "applied",
        TransitionOutcome::AlreadyTerminal(_) => "already_terminal",
        TransitionOutcome::Conflict { .. } => "conflict",
    }
}

fn record_transition_metric(outcome: &TransitionOutcome) {
    metrics::counter!(
        "vproc_store_transitions_total",
        "outcome" => outcome_label(outcome)
    )
    .increment(1);
}
