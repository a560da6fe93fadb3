//! In-process broker for tests and single-process deployments.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use vproc_models::JobId;

use crate::backoff::RetryPolicy;
use crate::entry::{JobPayload, NackOutcome, QueueEntry};
use crate::error::{QueueError, QueueResult};
use crate::live::LiveState;
use crate::Broker;

// Dequeue waiters poll at this cadence so delayed entries promote without a
// dedicated timer task.
const IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
struct StoredEntry {
    ref_id: String,
    payload: JobPayload,
    attempts: u32,
    priority: i32,
    seq: u64,
    last_error: Option<String>,
}

impl StoredEntry {
    fn to_queue_entry(&self) -> QueueEntry {
        QueueEntry {
            ref_id: self.ref_id.clone(),
            payload: self.payload.clone(),
            attempts: self.attempts,
            priority: self.priority,
            last_error: self.last_error.clone(),
            seq: self.seq,
        }
    }
}

struct Leased {
    entry: StoredEntry,
    deadline: Instant,
}

#[derive(Default)]
struct Inner {
    // Keyed by (priority, seq): lower priority first, FIFO within a tier.
    pending: BTreeMap<(i32, u64), StoredEntry>,
    delayed: Vec<(Instant, StoredEntry)>,
    leased: HashMap<String, Leased>,
    dlq: Vec<(JobPayload, String)>,
    live: HashMap<u64, LiveState>,
    next_seq: u64,
}

impl Inner {
    fn promote_due(&mut self, now: Instant) {
        let mut still_delayed = Vec::with_capacity(self.delayed.len());
        for (ready_at, entry) in self.delayed.drain(..) {
            if ready_at <= now {
                self.pending.insert((entry.priority, entry.seq), entry);
            } else {
                still_delayed.push((ready_at, entry));
            }
        }
        self.delayed = still_delayed;
    }
}

/// Broker backed by process-local state.
pub struct MemoryBroker {
    inner: Mutex<Inner>,
    notify: Notify,
    policy: RetryPolicy,
    lease_timeout: Duration,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Create a broker with the default retry policy and lease timeout.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            policy: RetryPolicy::default(),
            lease_timeout: Duration::from_secs(600),
        }
    }

    /// Set the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the lease timeout.
    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }

    /// Dead-lettered payloads with their final errors.
    pub fn dead_letters(&self) -> Vec<(JobPayload, String)> {
        let inner = self.inner.lock().expect("broker lock poisoned");
        inner.dlq.clone()
    }

    /// Requeue or dead-letter an entry that failed or lost its lease.
    fn retire_or_requeue(
        &self,
        inner: &mut Inner,
        mut entry: StoredEntry,
        error: &str,
        now: Instant,
    ) -> NackOutcome {
        if self.policy.attempts_exhausted(entry.attempts) {
            inner.live.remove(&entry.payload.job_record_id.as_u64());
            inner.dlq.push((entry.payload.clone(), error.to_string()));
            metrics::counter!("vproc_queue_dead_lettered_total").increment(1);
            warn!(
                job_id = %entry.payload.job_record_id,
                attempts = entry.attempts,
                "entry dead-lettered: {error}"
            );
            NackOutcome::DeadLettered
        } else {
            let delay = self.policy.delay_for_attempt(entry.attempts + 1);
            entry.last_error = Some(error.to_string());
            let id = entry.payload.job_record_id;
            inner
                .live
                .insert(id.as_u64(), LiveState::queued(id).requeued(entry.attempts));
            let attempts = entry.attempts;
            inner.delayed.push((now + delay, entry));
            debug!(job_id = %id, attempts, ?delay, "entry requeued");
            NackOutcome::Requeued { attempts, delay }
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, payload: JobPayload, priority: i32) -> QueueResult<String> {
        let ref_id = Uuid::new_v4().to_string();
        {
            let mut inner = self.inner.lock().expect("broker lock poisoned");
            inner.next_seq += 1;
            let seq = inner.next_seq;
            let id = payload.job_record_id;
            inner.live.insert(id.as_u64(), LiveState::queued(id));
            inner.pending.insert(
                (priority, seq),
                StoredEntry {
                    ref_id: ref_id.clone(),
                    payload,
                    attempts: 0,
                    priority,
                    seq,
                    last_error: None,
                },
            );
        }
        metrics::counter!("vproc_queue_enqueued_total").increment(1);
        self.notify.notify_one();
        Ok(ref_id)
    }

    async fn dequeue(&self, wait: Duration) -> QueueResult<Option<QueueEntry>> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut inner = self.inner.lock().expect("broker lock poisoned");
                let now = Instant::now();
                inner.promote_due(now);
                if let Some((_, mut entry)) = inner.pending.pop_first() {
                    entry.attempts += 1;
                    let id = entry.payload.job_record_id;
                    inner
                        .live
                        .insert(id.as_u64(), LiveState::queued(id).leased(entry.attempts));
                    let leased = entry.to_queue_entry();
                    inner.leased.insert(
                        entry.ref_id.clone(),
                        Leased {
                            entry,
                            deadline: now + self.lease_timeout,
                        },
                    );
                    return Ok(Some(leased));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(remaining.min(IDLE_POLL)) => {}
            }
        }
    }

    async fn ack(&self, ref_id: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().expect("broker lock poisoned");
        let leased = inner
            .leased
            .remove(ref_id)
            .ok_or_else(|| QueueError::entry_not_found(ref_id))?;
        inner
            .live
            .remove(&leased.entry.payload.job_record_id.as_u64());
        metrics::counter!("vproc_queue_acked_total").increment(1);
        Ok(())
    }

    async fn nack(&self, ref_id: &str, error: &str) -> QueueResult<NackOutcome> {
        let outcome = {
            let mut inner = self.inner.lock().expect("broker lock poisoned");
            let leased = inner
                .leased
                .remove(ref_id)
                .ok_or_else(|| QueueError::entry_not_found(ref_id))?;
            self.retire_or_requeue(&mut inner, leased.entry, error, Instant::now())
        };
        metrics::counter!("vproc_queue_nacked_total").increment(1);
        self.notify.notify_one();
        Ok(outcome)
    }

    async fn reclaim_expired(&self) -> QueueResult<Vec<(JobPayload, NackOutcome)>> {
        let swept = {
            let mut inner = self.inner.lock().expect("broker lock poisoned");
            let now = Instant::now();
            let expired: Vec<String> = inner
                .leased
                .iter()
                .filter(|(_, l)| l.deadline <= now)
                .map(|(ref_id, _)| ref_id.clone())
                .collect();

            let mut swept = Vec::with_capacity(expired.len());
            for ref_id in expired {
                let leased = inner.leased.remove(&ref_id).expect("ref just observed");
                let payload = leased.entry.payload.clone();
                let outcome =
                    self.retire_or_requeue(&mut inner, leased.entry, "lease expired", now);
                metrics::counter!("vproc_queue_reclaimed_total").increment(1);
                swept.push((payload, outcome));
            }
            swept
        };
        if !swept.is_empty() {
            self.notify.notify_one();
        }
        Ok(swept)
    }

    async fn live_state(&self, id: JobId) -> QueueResult<Option<LiveState>> {
        let inner = self.inner.lock().expect("broker lock poisoned");
        Ok(inner.live.get(&id.as_u64()).cloned())
    }

    async fn len(&self) -> QueueResult<u64> {
        let inner = self.inner.lock().expect("broker lock poisoned");
        Ok((inner.pending.len() + inner.delayed.len() + inner.leased.len()) as u64)
    }

    async fn dlq_len(&self) -> QueueResult<u64> {
        let inner = self.inner.lock().expect("broker lock poisoned");
        Ok(inner.dlq.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vproc_models::Resolution;

    fn payload(record_id: u64) -> JobPayload {
        JobPayload {
            owner_id: 5,
            project_name: "trip".to_string(),
            resolution: Resolution::Hd720,
            job_record_id: JobId(record_id),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default().with_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_priority_order_beats_insertion_order() {
        let broker = MemoryBroker::new();
        broker.enqueue(payload(1), 2).await.unwrap();
        broker.enqueue(payload(2), 0).await.unwrap();
        broker.enqueue(payload(3), 1).await.unwrap();

        let mut order = Vec::new();
        for _ in 0..3 {
            let entry = broker
                .dequeue(Duration::from_millis(100))
                .await
                .unwrap()
                .unwrap();
            order.push(entry.priority);
        }
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_fifo_within_priority_tier() {
        let broker = MemoryBroker::new();
        broker.enqueue(payload(1), 0).await.unwrap();
        broker.enqueue(payload(2), 0).await.unwrap();

        let first = broker
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        let second = broker
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.payload.job_record_id, JobId(1));
        assert_eq!(second.payload.job_record_id, JobId(2));
    }

    #[tokio::test]
    async fn test_dequeue_times_out_empty() {
        let broker = MemoryBroker::new();
        let entry = broker.dequeue(Duration::from_millis(20)).await.unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn test_ack_removes_entry() {
        let broker = MemoryBroker::new();
        broker.enqueue(payload(1), 0).await.unwrap();

        let entry = broker
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        broker.ack(&entry.ref_id).await.unwrap();

        assert_eq!(broker.len().await.unwrap(), 0);
        assert!(broker.live_state(JobId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nack_redelivers_with_attempt_count() {
        let broker = MemoryBroker::new().with_policy(fast_policy());
        broker.enqueue(payload(1), 0).await.unwrap();

        let entry = broker
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.attempts, 1);

        let outcome = broker.nack(&entry.ref_id, "boom").await.unwrap();
        assert!(matches!(outcome, NackOutcome::Requeued { attempts: 1, .. }));

        let entry = broker
            .dequeue(Duration::from_millis(500))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_dead_letter_after_max_attempts() {
        let broker = MemoryBroker::new().with_policy(fast_policy());
        broker.enqueue(payload(1), 0).await.unwrap();

        for attempt in 1..=3u32 {
            let entry = broker
                .dequeue(Duration::from_millis(500))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(entry.attempts, attempt);
            let outcome = broker.nack(&entry.ref_id, "always fails").await.unwrap();
            if attempt < 3 {
                assert!(matches!(outcome, NackOutcome::Requeued { .. }));
            } else {
                assert_eq!(outcome, NackOutcome::DeadLettered);
            }
        }

        // No fourth attempt.
        assert!(broker
            .dequeue(Duration::from_millis(50))
            .await
            .unwrap()
            .is_none());
        assert_eq!(broker.dlq_len().await.unwrap(), 1);

        let dead = broker.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].0.job_record_id, JobId(1));
        assert_eq!(dead[0].1, "always fails");
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let broker = MemoryBroker::new()
            .with_policy(fast_policy())
            .with_lease_timeout(Duration::from_millis(5));
        broker.enqueue(payload(1), 0).await.unwrap();

        let entry = broker
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        // Worker "crashes": no ack, no nack.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let swept = broker.reclaim_expired().await.unwrap();
        assert_eq!(swept.len(), 1);
        assert!(matches!(swept[0].1, NackOutcome::Requeued { attempts: 1, .. }));

        let redelivered = broker
            .dequeue(Duration::from_millis(500))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(redelivered.payload.job_record_id, JobId(1));
        assert_eq!(redelivered.attempts, 2);
        // The ref survives the reclaim; only the lease changed hands.
        assert_eq!(redelivered.ref_id, entry.ref_id);
    }

    #[tokio::test]
    async fn test_reclaim_dead_letters_exhausted_entries() {
        let broker = MemoryBroker::new()
            .with_policy(fast_policy().with_max_attempts(1))
            .with_lease_timeout(Duration::from_millis(5));
        broker.enqueue(payload(1), 0).await.unwrap();

        broker
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let swept = broker.reclaim_expired().await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].1, NackOutcome::DeadLettered);
        assert_eq!(broker.dlq_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_live_state_tracks_broker_side() {
        let broker = MemoryBroker::new();
        broker.enqueue(payload(1), 0).await.unwrap();

        let live = broker.live_state(JobId(1)).await.unwrap().unwrap();
        assert_eq!(live.state, crate::LiveJobState::Queued);

        broker
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        let live = broker.live_state(JobId(1)).await.unwrap().unwrap();
        assert_eq!(live.state, crate::LiveJobState::Processing);
        assert_eq!(live.attempts, 1);
    }
}
