use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chainwatch_domain::{
    storage::{JobStore, StorageError, StorageResult},
    JobId, JobStatus, ReplayJob,
};

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    jobs: HashMap<JobId, (u64, ReplayJob)>,
}

/// Shared in-memory job storage. Cloning hands out another handle to the
/// same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("mutex poisoned").jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for MemoryStorage {
    async fn insert_job(&self, job: ReplayJob) -> StorageResult<()> {
        let mut guard = self.inner.lock().expect("mutex poisoned");
        if guard.jobs.contains_key(&job.id) {
            return Err(StorageError::Duplicate(job.id));
        }
        let seq = guard.next_seq;
        guard.next_seq += 1;
        guard.jobs.insert(job.id.clone(), (seq, job));
        Ok(())
    }

    async fn find_job(&self, id: &JobId) -> StorageResult<Option<ReplayJob>> {
        let guard = self.inner.lock().expect("mutex poisoned");
        Ok(guard.jobs.get(id).map(|(_, job)| job.clone()))
    }

    async fn update_job(&self, job: ReplayJob) -> StorageResult<()> {
        let mut guard = self.inner.lock().expect("mutex poisoned");
        match guard.jobs.get_mut(&job.id) {
            Some((_, stored)) => {
                *stored = job;
                Ok(())
            }
            None => Err(StorageError::NotFound(job.id)),
        }
    }

    async fn recent_jobs(&self, limit: usize) -> StorageResult<Vec<ReplayJob>> {
        let guard = self.inner.lock().expect("mutex poisoned");
        let mut entries: Vec<_> = guard.jobs.values().collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries
            .into_iter()
            .take(limit)
            .map(|(_, job)| job.clone())
            .collect())
    }

    async fn jobs_with_status(&self, status: JobStatus) -> StorageResult<Vec<ReplayJob>> {
        let guard = self.inner.lock().expect("mutex poisoned");
        let mut entries: Vec<_> = guard
            .jobs
            .values()
            .filter(|(_, job)| job.status == status)
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        Ok(entries.into_iter().map(|(_, job)| job.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(seq: u64) -> ReplayJob {
        ReplayJob::new(JobId::derive(1, 100, 200, seq), 1, 100, 200)
    }

    #[tokio::test]
    async fn insert_find_and_update() {
        let storage = MemoryStorage::new();
        let mut record = job(0);
        storage.insert_job(record.clone()).await.unwrap();

        let found = storage.find_job(&record.id).await.unwrap();
        assert_eq!(found.as_ref().map(|j| j.status), Some(JobStatus::Pending));

        record.status = JobStatus::Processing;
        record.started_at = Some(chrono::Utc::now());
        storage.update_job(record.clone()).await.unwrap();
        let found = storage.find_job(&record.id).await.unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn rejects_duplicates_and_unknown_updates() {
        let storage = MemoryStorage::new();
        let record = job(0);
        storage.insert_job(record.clone()).await.unwrap();

        let err = storage.insert_job(record.clone()).await.unwrap_err();
        assert_eq!(err, StorageError::Duplicate(record.id.clone()));

        let missing = job(1);
        let err = storage.update_job(missing.clone()).await.unwrap_err();
        assert_eq!(err, StorageError::NotFound(missing.id));
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn recent_jobs_are_newest_first() {
        let storage = MemoryStorage::new();
        for seq in 0..5 {
            storage.insert_job(job(seq)).await.unwrap();
        }

        let recent = storage.recent_jobs(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, JobId::derive(1, 100, 200, 4));
        assert_eq!(recent[1].id, JobId::derive(1, 100, 200, 3));
    }

    #[tokio::test]
    async fn filters_by_status() {
        let storage = MemoryStorage::new();
        let mut failed = job(0);
        storage.insert_job(failed.clone()).await.unwrap();
        storage.insert_job(job(1)).await.unwrap();

        failed.status = JobStatus::Failed;
        storage.update_job(failed.clone()).await.unwrap();

        let pending = storage.jobs_with_status(JobStatus::Pending).await.unwrap();
        let failed_jobs = storage.jobs_with_status(JobStatus::Failed).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(failed_jobs, vec![failed]);
    }
}
