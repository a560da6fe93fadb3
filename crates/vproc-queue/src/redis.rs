//! Redis-backed broker.
//!
//! Layout under the configured prefix:
//! - `pending` sorted set scored by (priority, sequence): strict priority
//!   ordering with FIFO tie-break, which a stream consumer group cannot give
//! - `delayed` sorted set scored by ready-at time (retry backoff)
//! - `leased` sorted set scored by lease deadline
//! - `entry:{ref}` JSON entry payloads
//! - `dlq` stream of dead-lettered entries
//! - `live:{record_id}` short-TTL live snapshots for the read path
//!
//! Sorted sets do not block, so `dequeue` polls at a short cadence for the
//! duration of the caller's wait.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, warn};
use uuid::Uuid;

use vproc_models::JobId;

use crate::backoff::RetryPolicy;
use crate::config::BrokerConfig;
use crate::entry::{JobPayload, NackOutcome, QueueEntry};
use crate::error::{QueueError, QueueResult};
use crate::live::LiveState;
use crate::Broker;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const SWEEP_BATCH: isize = 100;

// The pending score packs (priority, sequence) into the f64 mantissa:
// score = priority * SEQ_SPAN + seq. Exact integer ordering holds while
// |priority| * SEQ_SPAN + seq stays under 2^53, hence the clamp.
const SEQ_SPAN: f64 = 1e12;
const PRIORITY_CLAMP: i32 = 8_000;

fn pending_score(priority: i32, seq: u64) -> f64 {
    let p = priority.clamp(-PRIORITY_CLAMP, PRIORITY_CLAMP) as f64;
    p * SEQ_SPAN + seq as f64
}

// Pop the lowest-scored pending ref and lease it in one round trip.
const POP_SCRIPT: &str = r#"
local popped = redis.call('ZPOPMIN', KEYS[1], 1)
if #popped == 0 then
  return ''
end
local ref = popped[1]
redis.call('ZADD', KEYS[2], ARGV[1], ref)
return ref
"#;

/// Broker backed by Redis.
pub struct RedisBroker {
    client: redis::Client,
    config: BrokerConfig,
    policy: RetryPolicy,
    pop_script: Script,
}

impl RedisBroker {
    /// Create a new broker.
    pub fn new(config: BrokerConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let policy = config.retry_policy();
        Ok(Self {
            client,
            config,
            policy,
            pop_script: Script::new(POP_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(BrokerConfig::from_env())
    }

    fn seq_key(&self) -> String {
        format!("{}:seq", self.config.key_prefix)
    }

    fn pending_key(&self) -> String {
        format!("{}:pending", self.config.key_prefix)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.config.key_prefix)
    }

    fn leased_key(&self) -> String {
        format!("{}:leased", self.config.key_prefix)
    }

    fn entry_key(&self, ref_id: &str) -> String {
        format!("{}:entry:{}", self.config.key_prefix, ref_id)
    }

    fn dlq_key(&self) -> String {
        format!("{}:dlq", self.config.key_prefix)
    }

    fn live_key(&self, id: JobId) -> String {
        format!("{}:live:{}", self.config.key_prefix, id)
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn write_live(
        &self,
        conn: &mut MultiplexedConnection,
        live: &LiveState,
    ) -> QueueResult<()> {
        let key = self.live_key(live.job_record_id);
        let payload = serde_json::to_string(live)?;
        let _: () = conn
            .set_ex(key, payload, self.config.live_ttl.as_secs())
            .await?;
        Ok(())
    }

    /// Move due delayed entries back into the pending set.
    async fn promote_due(&self, conn: &mut MultiplexedConnection) -> QueueResult<()> {
        let now_ms = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore_limit(self.delayed_key(), "-inf", now_ms, 0, SWEEP_BATCH)
            .await?;

        for ref_id in due {
            // Another worker may promote concurrently; the ZREM count keeps
            // the entry from landing in pending twice.
            let removed: i64 = conn.zrem(self.delayed_key(), &ref_id).await?;
            if removed == 0 {
                continue;
            }
            let raw: Option<String> = conn.get(self.entry_key(&ref_id)).await?;
            if let Some(raw) = raw {
                let entry: QueueEntry = serde_json::from_str(&raw)?;
                let _: () = conn
                    .zadd(
                        self.pending_key(),
                        &ref_id,
                        pending_score(entry.priority, entry.seq),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        conn: &mut MultiplexedConnection,
        entry: &QueueEntry,
        error: &str,
    ) -> QueueResult<()> {
        let payload = serde_json::to_string(&entry.payload)?;

        let _: String = redis::cmd("XADD")
            .arg(self.dlq_key())
            .arg("*")
            .arg("payload")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("attempts")
            .arg(entry.attempts)
            .arg("ref_id")
            .arg(&entry.ref_id)
            .query_async(conn)
            .await?;

        let _: () = redis::pipe()
            .del(self.entry_key(&entry.ref_id))
            .ignore()
            .del(self.live_key(entry.payload.job_record_id))
            .ignore()
            .query_async(conn)
            .await?;

        metrics::counter!("vproc_queue_dead_lettered_total").increment(1);
        warn!(
            job_id = %entry.payload.job_record_id,
            attempts = entry.attempts,
            "entry dead-lettered: {error}"
        );
        Ok(())
    }

    /// Requeue with backoff or dead-letter an entry that lost its lease.
    async fn retire_or_requeue(
        &self,
        conn: &mut MultiplexedConnection,
        mut entry: QueueEntry,
        error: &str,
    ) -> QueueResult<NackOutcome> {
        if self.policy.attempts_exhausted(entry.attempts) {
            self.dead_letter(conn, &entry, error).await?;
            return Ok(NackOutcome::DeadLettered);
        }

        let delay = self.policy.delay_for_attempt(entry.attempts + 1);
        entry.last_error = Some(error.to_string());
        let ready_at_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        let payload = serde_json::to_string(&entry)?;
        let _: () = redis::pipe()
            .set(self.entry_key(&entry.ref_id), &payload)
            .ignore()
            .zadd(self.delayed_key(), &entry.ref_id, ready_at_ms)
            .ignore()
            .query_async(conn)
            .await?;

        let id = entry.payload.job_record_id;
        self.write_live(conn, &LiveState::queued(id).requeued(entry.attempts))
            .await?;

        debug!(job_id = %id, attempts = entry.attempts, ?delay, "entry requeued");
        Ok(NackOutcome::Requeued {
            attempts: entry.attempts,
            delay,
        })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn enqueue(&self, payload: JobPayload, priority: i32) -> QueueResult<String> {
        let mut conn = self.conn().await?;

        let seq: u64 = conn.incr(self.seq_key(), 1u64).await?;
        let ref_id = Uuid::new_v4().to_string();
        let entry = QueueEntry {
            ref_id: ref_id.clone(),
            payload,
            attempts: 0,
            priority,
            last_error: None,
            seq,
        };
        let raw = serde_json::to_string(&entry)?;

        let _: () = redis::pipe()
            .atomic()
            .set(self.entry_key(&ref_id), &raw)
            .ignore()
            .zadd(self.pending_key(), &ref_id, pending_score(priority, seq))
            .ignore()
            .query_async(&mut conn)
            .await?;

        self.write_live(&mut conn, &LiveState::queued(entry.payload.job_record_id))
            .await?;

        metrics::counter!("vproc_queue_enqueued_total").increment(1);
        debug!(job_id = %entry.payload.job_record_id, ref_id = %ref_id, priority, "enqueued entry");
        Ok(ref_id)
    }

    async fn dequeue(&self, wait: Duration) -> QueueResult<Option<QueueEntry>> {
        let deadline = Instant::now() + wait;
        let mut conn = self.conn().await?;

        loop {
            self.promote_due(&mut conn).await?;

            let lease_deadline_ms = Utc::now().timestamp_millis()
                + self.config.lease_timeout.as_millis() as i64;
            let ref_id: String = self
                .pop_script
                .key(self.pending_key())
                .key(self.leased_key())
                .arg(lease_deadline_ms)
                .invoke_async(&mut conn)
                .await?;

            if !ref_id.is_empty() {
                let raw: Option<String> = conn.get(self.entry_key(&ref_id)).await?;
                let Some(raw) = raw else {
                    // Payload vanished from under the index; drop the lease
                    // and keep going.
                    warn!(ref_id = %ref_id, "leased entry has no payload, dropping");
                    let _: i64 = conn.zrem(self.leased_key(), &ref_id).await?;
                    continue;
                };

                let mut entry: QueueEntry = serde_json::from_str(&raw)?;
                entry.attempts += 1;
                let _: () = conn
                    .set(self.entry_key(&ref_id), serde_json::to_string(&entry)?)
                    .await?;

                let id = entry.payload.job_record_id;
                self.write_live(&mut conn, &LiveState::queued(id).leased(entry.attempts))
                    .await?;

                debug!(job_id = %id, ref_id = %ref_id, attempts = entry.attempts, "leased entry");
                return Ok(Some(entry));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::time::sleep(remaining.min(POLL_INTERVAL)).await;
        }
    }

    async fn ack(&self, ref_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let raw: Option<String> = conn.get(self.entry_key(ref_id)).await?;
        let raw = raw.ok_or_else(|| QueueError::entry_not_found(ref_id))?;
        let entry: QueueEntry = serde_json::from_str(&raw)?;

        let removed: i64 = conn.zrem(self.leased_key(), ref_id).await?;
        if removed == 0 {
            return Err(QueueError::entry_not_found(ref_id));
        }

        let _: () = redis::pipe()
            .del(self.entry_key(ref_id))
            .ignore()
            .del(self.live_key(entry.payload.job_record_id))
            .ignore()
            .query_async(&mut conn)
            .await?;

        metrics::counter!("vproc_queue_acked_total").increment(1);
        debug!(job_id = %entry.payload.job_record_id, ref_id = %ref_id, "acked entry");
        Ok(())
    }

    async fn nack(&self, ref_id: &str, error: &str) -> QueueResult<NackOutcome> {
        let mut conn = self.conn().await?;

        let raw: Option<String> = conn.get(self.entry_key(ref_id)).await?;
        let raw = raw.ok_or_else(|| QueueError::entry_not_found(ref_id))?;
        let entry: QueueEntry = serde_json::from_str(&raw)?;

        let removed: i64 = conn.zrem(self.leased_key(), ref_id).await?;
        if removed == 0 {
            // The reclaim sweep got here first.
            return Err(QueueError::entry_not_found(ref_id));
        }

        metrics::counter!("vproc_queue_nacked_total").increment(1);
        self.retire_or_requeue(&mut conn, entry, error).await
    }

    async fn reclaim_expired(&self) -> QueueResult<Vec<(JobPayload, NackOutcome)>> {
        let mut conn = self.conn().await?;
        let now_ms = Utc::now().timestamp_millis();

        let expired: Vec<String> = conn
            .zrangebyscore_limit(self.leased_key(), "-inf", now_ms, 0, SWEEP_BATCH)
            .await?;

        let mut swept = Vec::with_capacity(expired.len());
        for ref_id in expired {
            let removed: i64 = conn.zrem(self.leased_key(), &ref_id).await?;
            if removed == 0 {
                continue;
            }
            let raw: Option<String> = conn.get(self.entry_key(&ref_id)).await?;
            let Some(raw) = raw else {
                continue;
            };
            let entry: QueueEntry = serde_json::from_str(&raw)?;
            let payload = entry.payload.clone();

            let outcome = self
                .retire_or_requeue(&mut conn, entry, "lease expired")
                .await?;
            metrics::counter!("vproc_queue_reclaimed_total").increment(1);
            swept.push((payload, outcome));
        }
        Ok(swept)
    }

    async fn live_state(&self, id: JobId) -> QueueResult<Option<LiveState>> {
        let mut conn = self.conn().await?;

        let raw: Option<String> = conn.get(self.live_key(id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;

        let (pending, delayed, leased): (u64, u64, u64) = redis::pipe()
            .zcard(self.pending_key())
            .zcard(self.delayed_key())
            .zcard(self.leased_key())
            .query_async(&mut conn)
            .await?;
        Ok(pending + delayed + leased)
    }

    async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(self.dlq_key()).await?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_score_orders_by_priority_then_seq() {
        assert!(pending_score(0, 1) < pending_score(0, 2));
        assert!(pending_score(0, 999) < pending_score(1, 1));
        assert!(pending_score(-1, 5) < pending_score(0, 1));
    }

    #[test]
    fn test_pending_score_clamps_extreme_priorities() {
        assert_eq!(
            pending_score(i32::MAX, 7),
            pending_score(PRIORITY_CLAMP, 7)
        );
        assert_eq!(
            pending_score(i32::MIN, 7),
            pending_score(-PRIORITY_CLAMP, 7)
        );
    }
}
