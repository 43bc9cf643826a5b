use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chainwatch_domain::{JobId, JobStatus, JobStatusStats, JobStore, ReplayJob, StorageError};
use chrono::Utc;
use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("job `{0}` not found")]
    NotFound(JobId),
    #[error("job `{id}` is already {status}")]
    Terminal { id: JobId, status: JobStatus },
    #[error("job `{id}` cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job `{id}` is {status}, not processing")]
    NotRunning { id: JobId, status: JobStatus },
}

/// Lifecycle bookkeeping for replay jobs on top of a [`JobStore`].
pub struct JobMonitor {
    store: Arc<dyn JobStore>,
    sequence: AtomicU64,
}

impl JobMonitor {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            sequence: AtomicU64::new(0),
        }
    }

    /// Registers a pending job for the block range. Every call yields a new
    /// id, so retries of the same range never reuse a failed job.
    pub async fn create_job(
        &self,
        chain_id: u64,
        start_block: u64,
        end_block: u64,
        retry_count: u32,
    ) -> Result<ReplayJob, JobError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let id = JobId::derive(chain_id, start_block, end_block, sequence);
        let mut job = ReplayJob::new(id, chain_id, start_block, end_block);
        job.retry_count = retry_count;
        self.store.insert_job(job.clone()).await?;
        info!(job_id = %job.id, chain_id, start_block, end_block, "replay job created");
        Ok(job)
    }

    pub async fn start_job(&self, id: &JobId) -> Result<ReplayJob, JobError> {
        self.transition(id, JobStatus::Processing, |job| {
            job.started_at = Some(Utc::now());
        })
        .await
    }

    /// Adds the counts of one processed slice to a running job.
    pub async fn record_progress(
        &self,
        id: &JobId,
        processed: u64,
        failed: u64,
    ) -> Result<ReplayJob, JobError> {
        let mut job = self.load(id).await?;
        if job.status != JobStatus::Processing {
            if job.status.is_terminal() {
                return Err(JobError::Terminal {
                    id: id.clone(),
                    status: job.status,
                });
            }
            return Err(JobError::NotRunning {
                id: id.clone(),
                status: job.status,
            });
        }
        job.processed_count += processed;
        job.failed_count += failed;
        self.store.update_job(job.clone()).await?;
        Ok(job)
    }

    pub async fn complete_job(&self, id: &JobId) -> Result<ReplayJob, JobError> {
        let job = self
            .transition(id, JobStatus::Success, |job| {
                job.finished_at = Some(Utc::now());
                job.error = None;
            })
            .await?;
        counter!("replay_jobs_total", "status" => "success").increment(1);
        info!(
            job_id = %job.id,
            processed = job.processed_count,
            failed = job.failed_count,
            "replay job completed"
        );
        Ok(job)
    }

    pub async fn fail_job(&self, id: &JobId, error: &str) -> Result<ReplayJob, JobError> {
        let job = self
            .transition(id, JobStatus::Failed, |job| {
                job.finished_at = Some(Utc::now());
                job.error = Some(error.to_string());
            })
            .await?;
        counter!("replay_jobs_total", "status" => "failed").increment(1);
        warn!(job_id = %job.id, error, "replay job failed");
        Ok(job)
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Option<ReplayJob>, JobError> {
        Ok(self.store.find_job(id).await?)
    }

    pub async fn recent_jobs(&self, limit: usize) -> Result<Vec<ReplayJob>, JobError> {
        Ok(self.store.recent_jobs(limit).await?)
    }

    /// Count, average duration and event totals for every status bucket.
    pub async fn job_stats(&self) -> Result<BTreeMap<JobStatus, JobStatusStats>, JobError> {
        let mut stats = BTreeMap::new();
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Success,
            JobStatus::Failed,
        ] {
            let jobs = self.store.jobs_with_status(status).await?;
            let durations: Vec<f64> = jobs.iter().filter_map(ReplayJob::duration_secs).collect();
            let avg_duration_secs = if durations.is_empty() {
                None
            } else {
                Some(durations.iter().sum::<f64>() / durations.len() as f64)
            };
            stats.insert(
                status,
                JobStatusStats {
                    count: jobs.len() as u64,
                    avg_duration_secs,
                    total_events: jobs.iter().map(|job| job.processed_count).sum(),
                    total_failed: jobs.iter().map(|job| job.failed_count).sum(),
                },
            );
        }
        Ok(stats)
    }

    async fn load(&self, id: &JobId) -> Result<ReplayJob, JobError> {
        self.store
            .find_job(id)
            .await?
            .ok_or_else(|| JobError::NotFound(id.clone()))
    }

    async fn transition(
        &self,
        id: &JobId,
        next: JobStatus,
        apply: impl FnOnce(&mut ReplayJob) + Send,
    ) -> Result<ReplayJob, JobError> {
        let mut job = self.load(id).await?;
        if job.status.is_terminal() {
            return Err(JobError::Terminal {
                id: id.clone(),
                status: job.status,
            });
        }
        if !job.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                id: id.clone(),
                from: job.status,
                to: next,
            });
        }
        job.status = next;
        apply(&mut job);
        self.store.update_job(job.clone()).await?;
        Ok(job)
    }
}
