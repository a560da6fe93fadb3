//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs per worker process
    pub max_concurrent_jobs: usize,
    /// How long a single dequeue call blocks before looping
    pub dequeue_wait: Duration,
    /// How often the worker sweeps for expired leases
    pub reclaim_interval: Duration,
    /// Hard timeout on one pipeline invocation
    pub pipeline_timeout: Duration,
    /// Pipeline program (name on PATH or absolute path)
    pub pipeline_program: String,
    /// Root of the owner-scoped artifact store
    pub owner_root: String,
    /// Graceful shutdown drain timeout
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            dequeue_wait: Duration::from_secs(5),
            reclaim_interval: Duration::from_secs(30),
            pipeline_timeout: Duration::from_secs(3600), // 1 hour
            pipeline_program: "vproc-pipeline".to_string(),
            owner_root: "/srv/vproc/uploads".to_string(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            dequeue_wait: Duration::from_secs(
                std::env::var("WORKER_DEQUEUE_WAIT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            reclaim_interval: Duration::from_secs(
                std::env::var("WORKER_RECLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            pipeline_timeout: Duration::from_secs(
                std::env::var("PIPELINE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            pipeline_program: std::env::var("PIPELINE_PROGRAM")
                .unwrap_or_else(|_| "vproc-pipeline".to_string()),
            owner_root: std::env::var("OWNER_ROOT")
                .unwrap_or_else(|_| "/srv/vproc/uploads".to_string()),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}
