//! Durable priority job queue.
//!
//! This crate provides:
//! - The `Broker` seam the producer and workers are built against
//! - At-least-once delivery with worker leases and reclaim
//! - Bounded retries with exponential backoff and a dead-letter path
//! - Live job snapshots for the status read path
//!
//! Ordering is FIFO within a priority tier; entries with a lower priority
//! value dequeue first.

pub mod backoff;
pub mod config;
pub mod entry;
pub mod error;
pub mod live;
pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use vproc_models::JobId;

pub use self::backoff::RetryPolicy;
pub use self::config::BrokerConfig;
pub use self::entry::{JobPayload, NackOutcome, QueueEntry};
pub use self::error::{QueueError, QueueResult};
pub use self::live::{LiveJobState, LiveState};
pub use self::memory::MemoryBroker;
pub use self::redis::RedisBroker;

/// Queue broker contract.
///
/// The broker's one-outstanding-lease-per-entry guarantee is the sole
/// mutual exclusion between workers; the record store's conditional writes
/// are the safety net behind it.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a payload; lower priority values dequeue first.
    ///
    /// Returns the broker-assigned opaque ref id.
    async fn enqueue(&self, payload: JobPayload, priority: i32) -> QueueResult<String>;

    /// Wait up to `wait` for the next entry, leasing it to the caller.
    ///
    /// Returns `None` on timeout (`DequeueTimeout` is transient; callers
    /// just loop again).
    async fn dequeue(&self, wait: Duration) -> QueueResult<Option<QueueEntry>>;

    /// Acknowledge a leased entry, removing it for good.
    async fn ack(&self, ref_id: &str) -> QueueResult<()>;

    /// Return a leased entry after a failure.
    ///
    /// Requeues it with a backoff delay, or dead-letters it once its
    /// attempts are exhausted.
    async fn nack(&self, ref_id: &str, error: &str) -> QueueResult<NackOutcome>;

    /// Sweep entries whose lease expired (crashed or hung workers).
    ///
    /// Each swept entry is either requeued or dead-lettered under the same
    /// policy as `nack`; the caller force-fails the records behind
    /// dead-lettered entries.
    async fn reclaim_expired(&self) -> QueueResult<Vec<(JobPayload, NackOutcome)>>;

    /// Live snapshot for a record id (read-path latency hint).
    async fn live_state(&self, id: JobId) -> QueueResult<Option<LiveState>>;

    /// Entries currently waiting, delayed, or leased.
    async fn len(&self) -> QueueResult<u64>;

    /// Dead-lettered entry count.
    async fn dlq_len(&self) -> QueueResult<u64>;
}
