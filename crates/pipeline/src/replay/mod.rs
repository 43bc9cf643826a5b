//! Periodic re-processing of recent blocks.
//!
//! One run walks every configured chain: it reads the latest block, opens a
//! job covering the trailing lookback window, and feeds the window's
//! transactions to the target in `batch_size` slices. Transactions already
//! recorded in the event store are skipped, so a window that overlaps the
//! previous run only re-processes what failed or was never seen. Runs are
//! single-flight and failed runs are retried up to `max_retries` times.

mod jobs;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chainwatch_domain::{
    storage::{EventStore, StorageError},
    EventKey, JobId, ReplayConfig,
};
use metrics::{counter, histogram};
use serde_json::Value;
use thiserror::Error;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    normalizer::raw_event_key,
    pipeline::{EventPipeline, PipelineError},
};

pub use jobs::{JobError, JobMonitor};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("chain read failed: {0}")]
    Source(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("no node endpoint configured for chain {0}")]
    UnknownChain(u64),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("event store error: {0}")]
    Storage(#[from] StorageError),
}

impl From<reqwest::Error> for ReplayError {
    fn from(value: reqwest::Error) -> Self {
        Self::Source(value.to_string())
    }
}

/// Read access to historical chain data.
#[async_trait]
pub trait ReplaySource: Send + Sync {
    async fn latest_block(&self, chain_id: u64) -> Result<u64, ReplayError>;
    /// Raw transactions of blocks `start..=end`, in the normalizer's input shape.
    async fn fetch_events(
        &self,
        chain_id: u64,
        start: u64,
        end: u64,
    ) -> Result<Vec<Value>, ReplayError>;
}

/// Whatever consumes replayed events. Returns the identity of the event it
/// handled so the scheduler can record it.
#[async_trait]
pub trait ReplayTarget: Send + Sync {
    async fn replay_event(&self, chain_id: u64, raw: &Value) -> Result<EventKey, PipelineError>;
}

#[async_trait]
impl ReplayTarget for EventPipeline {
    async fn replay_event(&self, chain_id: u64, raw: &Value) -> Result<EventKey, PipelineError> {
        let processed = self.process_event(chain_id, raw).await?;
        Ok(processed.event.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Another replay was already in flight.
    Skipped,
    Completed {
        jobs: Vec<JobId>,
        processed: u64,
        failed: u64,
        /// Events a previous run had already handled.
        skipped: u64,
    },
}

/// Per-range tallies; `processed` and `failed` also land on the job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RangeCounts {
    processed: u64,
    failed: u64,
    skipped: u64,
}

impl RangeCounts {
    fn add(&mut self, other: RangeCounts) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    Exhausted,
}

pub struct ReplayScheduler {
    config: ReplayConfig,
    source: Arc<dyn ReplaySource>,
    target: Arc<dyn ReplayTarget>,
    jobs: Arc<JobMonitor>,
    events: Arc<dyn EventStore>,
    running: AtomicBool,
    // Failed runs since the last success.
    retry_count: AtomicU32,
}

/// Clears the in-flight flag when a replay ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ReplayScheduler {
    pub fn new(
        config: ReplayConfig,
        source: Arc<dyn ReplaySource>,
        target: Arc<dyn ReplayTarget>,
        jobs: Arc<JobMonitor>,
        events: Arc<dyn EventStore>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            jobs,
            events,
            running: AtomicBool::new(false),
            retry_count: AtomicU32::new(0),
        }
    }

    pub fn jobs(&self) -> &Arc<JobMonitor> {
        &self.jobs
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Acquire)
    }

    /// Replays every configured chain once. Returns `Skipped` without doing
    /// anything when a replay is already running.
    pub async fn execute_replay(&self) -> Result<ReplayOutcome, ReplayError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("replay already running, skipping");
            return Ok(ReplayOutcome::Skipped);
        }
        let _guard = RunningGuard(&self.running);

        let started = Instant::now();
        let result = self.replay_all().await;
        histogram!("replay_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(outcome) => {
                self.retry_count.store(0, Ordering::Release);
                counter!("replay_runs_total", "result" => "success").increment(1);
                Ok(outcome)
            }
            Err(err) => {
                counter!("replay_runs_total", "result" => "failure").increment(1);
                Err(err)
            }
        }
    }

    /// Counts a failed run and decides whether another attempt is allowed.
    pub fn handle_failure(&self, err: &ReplayError) -> RetryDecision {
        let attempt = self.retry_count.fetch_add(1, Ordering::AcqRel) + 1;
        if attempt > self.config.max_retries {
            error!(error = %err, attempts = attempt, "replay retries exhausted");
            counter!("replay_retries_exhausted_total").increment(1);
            return RetryDecision::Exhausted;
        }
        warn!(
            error = %err,
            attempt,
            max_retries = self.config.max_retries,
            "replay failed, retry scheduled"
        );
        RetryDecision::Retry {
            attempt,
            delay: self.config.retry_delay,
        }
    }

    /// Runs a replay, retrying failed runs until success or exhaustion.
    pub async fn run_with_retry(&self) -> Result<ReplayOutcome, ReplayError> {
        self.retry_count.store(0, Ordering::Release);
        loop {
            match self.execute_replay().await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => match self.handle_failure(&err) {
                    RetryDecision::Retry { delay, .. } => sleep(delay).await,
                    RetryDecision::Exhausted => return Err(err),
                },
            }
        }
    }

    /// Spawns the periodic replay loop. The first run starts immediately.
    /// `interval` must be non-zero; `PipelineConfig::validate` enforces it.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                ticker.tick().await;
                match self.run_with_retry().await {
                    Ok(ReplayOutcome::Completed {
                        jobs,
                        processed,
                        failed,
                        skipped,
                    }) => info!(
                        jobs = jobs.len(),
                        processed,
                        failed,
                        skipped,
                        "replay cycle finished"
                    ),
                    Ok(ReplayOutcome::Skipped) => {}
                    Err(err) => error!(error = %err, "replay cycle gave up"),
                }
            }
        })
    }

    async fn replay_all(&self) -> Result<ReplayOutcome, ReplayError> {
        let mut job_ids = Vec::with_capacity(self.config.chains.len());
        let mut totals = RangeCounts::default();

        for &chain_id in &self.config.chains {
            let latest = self.source.latest_block(chain_id).await?;
            // Window is inclusive on both ends: lookback + 1 blocks.
            let start = latest.saturating_sub(self.config.lookback_blocks);
            let job = self
                .jobs
                .create_job(chain_id, start, latest, self.retry_count())
                .await?;
            self.jobs.start_job(&job.id).await?;

            match self.replay_range(chain_id, start, latest, &job.id).await {
                Ok(counts) => {
                    self.jobs.complete_job(&job.id).await?;
                    totals.add(counts);
                    job_ids.push(job.id);
                }
                // A read failure aborts the whole run; chains after this one
                // wait for the retry.
                Err(err) => {
                    self.jobs.fail_job(&job.id, &err.to_string()).await?;
                    return Err(err);
                }
            }
        }

        Ok(ReplayOutcome::Completed {
            jobs: job_ids,
            processed: totals.processed,
            failed: totals.failed,
            skipped: totals.skipped,
        })
    }

    async fn replay_range(
        &self,
        chain_id: u64,
        start: u64,
        end: u64,
        job_id: &JobId,
    ) -> Result<RangeCounts, ReplayError> {
        let step = self.config.batch_size.max(1);
        let mut totals = RangeCounts::default();
        let mut from = start;

        while from <= end {
            let to = from.saturating_add(step - 1).min(end);
            let events = self.source.fetch_events(chain_id, from, to).await?;

            let mut slice = RangeCounts::default();
            for raw in &events {
                // Payloads without a usable hash still go to the target,
                // which rejects them as invalid.
                if let Some(key) = raw_event_key(chain_id, raw) {
                    if self.events.is_processed(&key).await? {
                        slice.skipped += 1;
                        continue;
                    }
                }
                match self.target.replay_event(chain_id, raw).await {
                    Ok(key) => {
                        self.events.mark_processed(key).await?;
                        slice.processed += 1;
                    }
                    Err(err) => {
                        debug!(chain_id, error = %err, "replayed event failed");
                        slice.failed += 1;
                    }
                }
            }
            self.jobs
                .record_progress(job_id, slice.processed, slice.failed)
                .await?;
            counter!("replay_events_skipped_total").increment(slice.skipped);
            totals.add(slice);

            if to == u64::MAX {
                break;
            }
            from = to + 1;
        }
        Ok(totals)
    }
}
