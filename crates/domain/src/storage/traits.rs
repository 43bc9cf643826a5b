use async_trait::async_trait;
use thiserror::Error;

use crate::model::{EventKey, JobId, JobStatus, ReplayJob};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("job `{0}` already exists")]
    Duplicate(JobId),
    #[error("job `{0}` not found")]
    NotFound(JobId),
}

/// Persistence boundary for replay job bookkeeping.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new job; fails with `Duplicate` if the id is taken.
    async fn insert_job(&self, job: ReplayJob) -> StorageResult<()>;
    async fn find_job(&self, id: &JobId) -> StorageResult<Option<ReplayJob>>;
    /// Replaces a stored job; fails with `NotFound` for unknown ids.
    async fn update_job(&self, job: ReplayJob) -> StorageResult<()>;
    /// Most recently created jobs first.
    async fn recent_jobs(&self, limit: usize) -> StorageResult<Vec<ReplayJob>>;
    async fn jobs_with_status(&self, status: JobStatus) -> StorageResult<Vec<ReplayJob>>;
}

/// Record of events that made it through the pipeline, so replays can skip
/// transactions that were already handled.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn is_processed(&self, key: &EventKey) -> StorageResult<bool>;
    /// Idempotent: marking a key twice is not an error.
    async fn mark_processed(&self, key: EventKey) -> StorageResult<()>;
}
