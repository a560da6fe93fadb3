//! In-memory record store for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use vproc_models::{JobId, JobRecord, JobStatus, Resolution};

use crate::error::{StoreError, StoreResult};
use crate::{apply_status, record_transition_metric, JobStore, TransitionOutcome};

/// Record store backed by a process-local map.
#[derive(Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<u64, JobRecord>>,
    next_id: AtomicU64,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        owner_id: u64,
        project_name: &str,
        resolution: Resolution,
        priority: i32,
    ) -> StoreResult<JobRecord> {
        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let record = JobRecord::new(id, owner_id, project_name, resolution, priority);

        let mut records = self.records.write().expect("store lock poisoned");
        records.insert(id.as_u64(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<JobRecord>> {
        let records = self.records.read().expect("store lock poisoned");
        Ok(records.get(&id.as_u64()).cloned())
    }

    async fn transition(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
        error: Option<&str>,
    ) -> StoreResult<TransitionOutcome> {
        if !expected.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: expected,
                to: next,
            });
        }

        let mut records = self.records.write().expect("store lock poisoned");
        let record = records.get_mut(&id.as_u64()).ok_or(StoreError::NotFound(id))?;

        let outcome = if record.status.is_terminal() {
            TransitionOutcome::AlreadyTerminal(record.status)
        } else if record.status != expected {
            TransitionOutcome::Conflict {
                expected,
                actual: record.status,
            }
        } else {
            *record = apply_status(record.clone(), next, error);
            TransitionOutcome::Applied(record.clone())
        };

        record_transition_metric(&outcome);
        Ok(outcome)
    }

    async fn force_fail(&self, id: JobId, error: &str) -> StoreResult<TransitionOutcome> {
        let mut records = self.records.write().expect("store lock poisoned");
        let record = records.get_mut(&id.as_u64()).ok_or(StoreError::NotFound(id))?;

        let outcome = if record.status.is_terminal() {
            TransitionOutcome::AlreadyTerminal(record.status)
        } else {
            *record = record.clone().fail(error);
            TransitionOutcome::Applied(record.clone())
        };

        record_transition_metric(&outcome);
        Ok(outcome)
    }

    async fn list_active(&self) -> StoreResult<Vec<JobRecord>> {
        let records = self.records.read().expect("store lock poisoned");
        let mut active: Vec<JobRecord> = records
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by_key(|r| r.id);
        Ok(active)
    }
}
