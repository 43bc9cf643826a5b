//! The per-event processing sequence and its error surface.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use chainwatch_domain::{storage::EventStore, NormalizedEvent, RiskAnalysis, RiskLevel};
use hex::encode as hex_encode;
use serde_json::Value;
use sha3::{Digest, Sha3_256};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
    analyzer::{RiskAnalysisError, RiskAnalyzer},
    monitor::{AlertReport, MonitorError, PipelineMonitor, ProcessingStatus},
    normalizer::{EventNormalizer, ValidationError},
    notifier::{NotificationRouter, RouteOutcome},
    profiler::{AddressProfiler, CacheOutcome, ProfileFetchError},
};

/// Stage failures that abort processing of a single event.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Profile(#[from] ProfileFetchError),
    #[error(transparent)]
    Analysis(#[from] RiskAnalysisError),
    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

impl PipelineError {
    /// Label used for the `error`/`type` metric dimensions.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::Profile(_) => "profile_fetch",
            PipelineError::Analysis(_) => "risk_analysis",
            PipelineError::Monitor(_) => "monitor",
        }
    }
}

/// Everything one successful pass produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedEvent {
    /// 16 hex characters, also attached to every log line and metric of the pass.
    pub trace_id: String,
    pub event: NormalizedEvent,
    pub analysis: RiskAnalysis,
    pub notification: RouteOutcome,
    /// `None` when the level stayed below the alert threshold.
    pub alerts: Option<AlertReport>,
}

/// Sequences normalize -> profile -> analyze -> alert -> notify for one event.
pub struct EventPipeline {
    // Stateless; owned directly.
    normalizer: EventNormalizer,
    // Shared with the worker so cache and throttle state outlive one event.
    profiler: Arc<AddressProfiler>,
    analyzer: Arc<RiskAnalyzer>,
    monitor: Arc<PipelineMonitor>,
    router: Arc<NotificationRouter>,
    // Webhook alerts fire at or above this level.
    alert_level: RiskLevel,
    // Successful events are recorded here when set, so replays skip them.
    events: Option<Arc<dyn EventStore>>,
}

impl EventPipeline {
    pub fn new(
        profiler: Arc<AddressProfiler>,
        analyzer: Arc<RiskAnalyzer>,
        monitor: Arc<PipelineMonitor>,
        router: Arc<NotificationRouter>,
        alert_level: RiskLevel,
    ) -> Self {
        Self {
            normalizer: EventNormalizer::new(),
            profiler,
            analyzer,
            monitor,
            router,
            alert_level,
            events: None,
        }
    }

    pub fn with_event_store(mut self, events: Arc<dyn EventStore>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn monitor(&self) -> &Arc<PipelineMonitor> {
        &self.monitor
    }

    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    pub fn profiler(&self) -> &Arc<AddressProfiler> {
        &self.profiler
    }

    /// Runs one raw payload through every stage. Any stage error aborts the
    /// event; notification delivery failures do not.
    pub async fn process_event(
        &self,
        chain_id: u64,
        raw: &Value,
    ) -> Result<ProcessedEvent, PipelineError> {
        let trace_id = new_trace_id();
        let started = Instant::now();
        self.monitor.record_event("event_received", &trace_id);

        match self.run_stages(&trace_id, chain_id, raw).await {
            // Total latency covers every stage, notification included.
            Ok(processed) => {
                self.monitor
                    .record_total_latency(started.elapsed().as_secs_f64())?;
                self.monitor.record_processing(ProcessingStatus::Success);
                debug!(
                    trace_id = %trace_id,
                    tx_hash = %processed.event.transaction_hash,
                    level = %processed.analysis.level,
                    "event processed"
                );
                if let Some(events) = &self.events {
                    // The event itself went through; a lost mark only means a
                    // replay may process it again.
                    if let Err(err) = events.mark_processed(processed.event.key()).await {
                        warn!(trace_id = %trace_id, error = %err, "failed to record processed event");
                    }
                }
                Ok(processed)
            }
            // The error kind doubles as the metric label.
            Err(err) => {
                self.monitor.record_error(err.kind(), &trace_id);
                self.monitor.record_processing(ProcessingStatus::Error);
                error!(trace_id = %trace_id, chain_id, error = %err, "event processing failed");
                Err(err)
            }
        }
    }

    async fn run_stages(
        &self,
        trace_id: &str,
        chain_id: u64,
        raw: &Value,
    ) -> Result<ProcessedEvent, PipelineError> {
        // Step 1: validate the payload. Nothing downstream sees raw JSON.
        let event = self.normalizer.normalize(chain_id, raw)?;
        self.monitor.record_event("event_normalized", trace_id);

        // Step 2: profile the sender. Cache hits and misses feed the hit
        // ratio; a forced refresh of a risky address counts as a miss.
        let stage = Instant::now();
        let lookup = self.profiler.lookup(&event.from).await?;
        self.monitor
            .record_profile_latency(stage.elapsed().as_secs_f64())?;
        match lookup.outcome {
            CacheOutcome::Hit => self.monitor.record_cache_hit(),
            CacheOutcome::Miss | CacheOutcome::Refreshed => self.monitor.record_cache_miss(),
        }

        // Step 3: score the event against the profile.
        let stage = Instant::now();
        let analysis = self.analyzer.analyze(&event, &lookup.profile).await?;
        self.monitor
            .record_analysis_latency(stage.elapsed().as_secs_f64())?;
        self.monitor.record_event("risk_analyzed", trace_id);
        self.monitor.record_risk_level(analysis.level, trace_id);

        // Step 4: webhook alerts for high-risk events. A failed sink is
        // counted but does not fail the event.
        let alerts = if analysis.level >= self.alert_level {
            let report = self
                .monitor
                .notify_high_risk(&event, &analysis, trace_id)
                .await;
            if report.failed > 0 {
                self.monitor.record_error("webhook", trace_id);
            }
            Some(report)
        } else {
            None
        };

        // Step 5: route to subscribed receivers. Throttling, batching and
        // emergency escalation all happen inside the router.
        let stage = Instant::now();
        let notification = self.router.route(&event, &lookup.profile, &analysis).await;
        self.monitor
            .record_notification_latency(stage.elapsed().as_secs_f64())?;
        if notification.failed() > 0 {
            warn!(
                trace_id,
                failed = notification.failed(),
                "some notifications could not be delivered"
            );
            self.monitor.record_error("notification", trace_id);
        }
        self.monitor.record_event("notifications_sent", trace_id);

        Ok(ProcessedEvent {
            trace_id: trace_id.to_string(),
            event,
            analysis,
            notification,
            alerts,
        })
    }
}

static TRACE_FALLBACK: AtomicU64 = AtomicU64::new(0);

/// Random 16-hex-character trace id.
pub fn new_trace_id() -> String {
    let mut buf = [0u8; 8];
    if getrandom::fill(&mut buf).is_err() {
        // Entropy source unavailable: derive from time and a process counter.
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let mut hasher = Sha3_256::new();
        hasher.update(nanos.to_be_bytes());
        hasher.update(TRACE_FALLBACK.fetch_add(1, Ordering::Relaxed).to_be_bytes());
        buf.copy_from_slice(&hasher.finalize()[..8]);
    }
    hex_encode(buf)
}
