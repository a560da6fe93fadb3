//! Broker configuration.

use std::time::Duration;

use crate::backoff::RetryPolicy;

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Redis URL
    pub redis_url: String,
    /// Key prefix for all queue keys
    pub key_prefix: String,
    /// Max dequeue attempts before the dead-letter path
    pub max_attempts: u32,
    /// Lease timeout after which an unacked entry is reclaimable
    pub lease_timeout: Duration,
    /// Base delay for retry backoff
    pub retry_base_delay: Duration,
    /// Cap on the retry backoff delay
    pub retry_max_delay: Duration,
    /// TTL on the live job-state snapshot
    pub live_ttl: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vproc:queue".to_string(),
            max_attempts: 3,
            lease_timeout: Duration::from_secs(600), // 10 minutes
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
            live_ttl: Duration::from_secs(3600),
        }
    }
}

impl BrokerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX")
                .unwrap_or_else(|_| "vproc:queue".to_string()),
            max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            lease_timeout: Duration::from_secs(
                std::env::var("QUEUE_LEASE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            retry_base_delay: Duration::from_millis(
                std::env::var("QUEUE_RETRY_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            retry_max_delay: Duration::from_secs(
                std::env::var("QUEUE_RETRY_MAX_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            live_ttl: Duration::from_secs(
                std::env::var("QUEUE_LIVE_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
        }
    }

    /// Retry policy derived from this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
        }
    }
}
