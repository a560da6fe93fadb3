//! Redis-backed record store.
//!
//! Records are stored as JSON strings under `{prefix}:job:{id}`, ids come
//! from an `INCR` counter, and an active-ids set supports restart
//! reconciliation. The conditional status write runs as a Lua script so the
//! status check and the swap are atomic on the server.

use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use tracing::debug;

use vproc_models::{JobId, JobRecord, JobStatus, Resolution};

use crate::error::{StoreError, StoreResult};
use crate::{apply_status, outcome_label, record_transition_metric, JobStore, TransitionOutcome};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Key prefix for all store keys
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vproc".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("STORE_KEY_PREFIX")
                .unwrap_or_else(|_| "vproc".to_string()),
        }
    }
}

// Reply: {outcome_tag, current_status_tag}. ARGV[1] is the expected
// predecessor tag or '*' (any non-terminal, the dead-letter path).
const TRANSITION_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return {'missing', ''}
end
local job = cjson.decode(raw)
local status = job['status']
if status == 'completed' or status == 'failed' then
  return {'terminal', status}
end
if ARGV[1] ~= '*' and status ~= ARGV[1] then
  return {'conflict', status}
end
redis.call('SET', KEYS[1], ARGV[2])
if ARGV[4] == '1' then
  redis.call('SREM', KEYS[2], ARGV[3])
end
return {'applied', status}
"#;

/// Record store backed by Redis.
pub struct RedisJobStore {
    client: redis::Client,
    config: StoreConfig,
    transition_script: Script,
}

impl RedisJobStore {
    /// Create a new store.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            transition_script: Script::new(TRANSITION_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(StoreConfig::from_env())
    }

    fn seq_key(&self) -> String {
        format!("{}:job:seq", self.config.key_prefix)
    }

    fn job_key(&self, id: JobId) -> String {
        format!("{}:job:{}", self.config.key_prefix, id)
    }

    fn active_key(&self) -> String {
        format!("{}:jobs:active", self.config.key_prefix)
    }

    async fn run_transition(
        &self,
        id: JobId,
        expected: Option<JobStatus>,
        next: JobStatus,
        error: Option<&str>,
    ) -> StoreResult<TransitionOutcome> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let raw: Option<String> = conn.get(self.job_key(id)).await?;
        let raw = raw.ok_or(StoreError::NotFound(id))?;
        let current: JobRecord = serde_json::from_str(&raw)?;

        // Build the candidate update from the last observed record; the
        // script re-checks the status before swapping it in.
        let updated = apply_status(current, next, error);
        let payload = serde_json::to_string(&updated)?;
        let expected_tag = expected.map(|s| s.as_str()).unwrap_or("*");

        let reply: Vec<String> = self
            .transition_script
            .key(self.job_key(id))
            .key(self.active_key())
            .arg(expected_tag)
            .arg(&payload)
            .arg(id.as_u64())
            .arg(if next.is_terminal() { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;

        let tag = reply.first().map(String::as_str).unwrap_or("");
        let outcome = match tag {
            "applied" => TransitionOutcome::Applied(updated),
            "terminal" => TransitionOutcome::AlreadyTerminal(parse_status(&reply[1])?),
            "conflict" => {
                let actual = parse_status(&reply[1])?;
                TransitionOutcome::Conflict {
                    expected: expected.unwrap_or(actual),
                    actual,
                }
            }
            "missing" => return Err(StoreError::NotFound(id)),
            other => return Err(StoreError::Corrupt(other.to_string())),
        };

        debug!(job_id = %id, next = %next, outcome = outcome_label(&outcome), "status write");
        record_transition_metric(&outcome);
        Ok(outcome)
    }
}

fn parse_status(tag: &str) -> StoreResult<JobStatus> {
    match tag {
        "pending" => Ok(JobStatus::Pending),
        "processing" => Ok(JobStatus::Processing),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        other => Err(StoreError::Corrupt(other.to_string())),
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(
        &self,
        owner_id: u64,
        project_name: &str,
        resolution: Resolution,
        priority: i32,
    ) -> StoreResult<JobRecord> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let id: u64 = conn.incr(self.seq_key(), 1u64).await?;
        let record = JobRecord::new(JobId(id), owner_id, project_name, resolution, priority);
        let payload = serde_json::to_string(&record)?;

        let _: () = redis::pipe()
            .atomic()
            .set(self.job_key(record.id), &payload)
            .ignore()
            .sadd(self.active_key(), id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(job_id = %record.id, owner_id, project = %record.project_name, "created job record");
        Ok(record)
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<JobRecord>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let raw: Option<String> = conn.get(self.job_key(id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
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
        self.run_transition(id, Some(expected), next, error).await
    }

    async fn force_fail(&self, id: JobId, error: &str) -> StoreResult<TransitionOutcome> {
        self.run_transition(id, None, JobStatus::Failed, Some(error))
            .await
    }

    async fn list_active(&self) -> StoreResult<Vec<JobRecord>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let ids: Vec<u64> = conn.smembers(self.active_key()).await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let raw: Option<String> = conn.get(self.job_key(JobId(id))).await?;
            if let Some(raw) = raw {
                records.push(serde_json::from_str::<JobRecord>(&raw)?);
            }
        }
        records.sort_by_key(|r| r.id);
        Ok(records)
    }
}
