use chrono::{DateTime, Utc};
use hex::encode as hex_encode;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use strum_macros::{AsRefStr, Display};

/// Identifier of a replay job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Deterministically derives a job id from the replayed range and a
    /// caller-supplied sequence number. Retries pass a fresh sequence so a
    /// failed job is never reused.
    pub fn derive(chain_id: u64, start_block: u64, end_block: u64, sequence: u64) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(chain_id.to_be_bytes());
        hasher.update(start_block.to_be_bytes());
        hasher.update(end_block.to_be_bytes());
        hasher.update(sequence.to_be_bytes());
        let digest = hasher.finalize();
        Self(hex_encode(&digest[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    /// Allowed transitions: pending -> processing -> success | failed.
    /// A pending job may also fail before it starts.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Success)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

/// Bookkeeping record for one replayed block range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayJob {
    pub id: JobId,
    pub chain_id: u64,
    pub start_block: u64,
    pub end_block: u64,
    pub status: JobStatus,
    pub processed_count: u64,
    pub failed_count: u64,
    pub retry_count: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ReplayJob {
    pub fn new(id: JobId, chain_id: u64, start_block: u64, end_block: u64) -> Self {
        Self {
            id,
            chain_id,
            start_block,
            end_block,
            status: JobStatus::Pending,
            processed_count: 0,
            failed_count: 0,
            retry_count: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Seconds between start (or creation) and finish, once finished.
    pub fn duration_secs(&self) -> Option<f64> {
        let finished = self.finished_at?;
        let started = self.started_at.unwrap_or(self.created_at);
        Some((finished - started).num_milliseconds().max(0) as f64 / 1000.0)
    }
}

/// Aggregate view over all jobs sharing a status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatusStats {
    pub count: u64,
    pub avg_duration_secs: Option<f64>,
    pub total_events: u64,
    pub total_failed: u64,
}
