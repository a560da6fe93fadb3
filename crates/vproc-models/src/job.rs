//! Job records and their lifecycle status machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Resolution;

/// Unique identifier for a job record, assigned by the record store.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// Get the raw id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Lifecycle status of a job record.
///
/// The only permitted transitions are
/// `pending -> processing -> completed | failed`; in addition the
/// dead-letter path may force any non-terminal status to `failed`.
/// Terminal states absorb every further transition attempt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue for a worker
    #[default]
    Pending,
    /// A worker holds the lease and is running the pipeline
    Processing,
    /// Pipeline finished and produced artifacts
    Completed,
    /// Pipeline failed, or retry attempts were exhausted
    Failed,
}

impl JobStatus {
    /// String tag of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more transitions permitted).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted record describing one processing request and its lifecycle.
///
/// The record store is the single source of truth for externally visible
/// status; broker-side state is only a latency hint on the read path.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    /// Unique record id, primary key for reconciliation
    pub id: JobId,

    /// Owning principal
    pub owner_id: u64,

    /// Project the input videos belong to; not unique across owners
    pub project_name: String,

    /// Target resolution
    pub resolution: Resolution,

    /// Lifecycle status
    #[serde(default)]
    pub status: JobStatus,

    /// Dequeue priority; lower values dequeue first
    #[serde(default)]
    pub priority: i32,

    /// Error message from the last failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp; bumps on every status transition
    pub updated_at: DateTime<Utc>,

    /// When a worker first moved the record to `processing`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the record reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a new pending record.
    pub fn new(
        id: JobId,
        owner_id: u64,
        project_name: impl Into<String>,
        resolution: Resolution,
        priority: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id,
            project_name: project_name.into(),
            resolution,
            status: JobStatus::Pending,
            priority,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Move the record to `processing`.
    pub fn start(mut self) -> Self {
        self.status = JobStatus::Processing;
        self.started_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self
    }

    /// Move the record to `completed`.
    pub fn complete(mut self) -> Self {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self
    }

    /// Move the record to `failed` with an error message.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = JobStatus::Failed;
        self.error_message = Some(error.into());
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creation() {
        let record = JobRecord::new(JobId(7), 5, "trip", Resolution::Hd720, 0);
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.priority, 0);
        assert!(record.started_at.is_none());
    }

    #[test]
    fn test_status_transitions() {
        let record = JobRecord::new(JobId(1), 1, "demo", Resolution::Original, 0);

        let started = record.start();
        assert_eq!(started.status, JobStatus::Processing);
        assert!(started.started_at.is_some());

        let completed = started.complete();
        assert_eq!(completed.status, JobStatus::Completed);
        assert!(completed.completed_at.is_some());
    }

    #[test]
    fn test_machine_edges() {
        use JobStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_fail_records_error() {
        let record = JobRecord::new(JobId(2), 1, "demo", Resolution::Original, 0);
        let failed = record.start().fail("pipeline exited with status 1");
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(
            failed.error_message.as_deref(),
            Some("pipeline exited with status 1")
        );
    }

    #[test]
    fn test_status_serde_tags() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Processing).unwrap(),
            "\"processing\""
        );
        let back: JobStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(back, JobStatus::Failed);
    }
}
