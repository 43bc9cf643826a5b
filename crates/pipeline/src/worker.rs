//! Process wiring: builds the pipeline from configuration and runs the
//! stdin ingest loop plus the background maintenance tasks.

use std::{sync::Arc, time::Duration};

use metrics::counter;
use serde_json::Value;
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use chainwatch_domain::{
    config::ConfigError,
    services::{telemetry::TelemetryError, RiskSetError},
    PipelineConfig, RiskAddressSet,
};
use chainwatch_storage::{MemoryEventStore, MemoryStorage};

use crate::{
    analyzer::{EvaluatorError, Evaluators, HttpEvaluator, NeutralEvaluator, RiskAnalyzer, RiskEvaluator},
    monitor::{MonitorError, PipelineMonitor, WebhookSink},
    notifier::{LogChannel, NotificationError, NotificationRouter, WebhookChannel},
    pipeline::EventPipeline,
    profiler::{AddressProfiler, HttpProfileSource, ProfileSource, ProfileSourceError},
    replay::{JobMonitor, ReplayError, ReplayScheduler},
    rpc::RpcReplaySource,
};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("monitor error: {0}")]
    Monitor(#[from] MonitorError),
    #[error("risk address set error: {0}")]
    RiskSet(#[from] RiskSetError),
    #[error("profile source error: {0}")]
    ProfileSource(#[from] ProfileSourceError),
    #[error("evaluator error: {0}")]
    Evaluator(#[from] EvaluatorError),
    #[error("notification channel error: {0}")]
    Notification(#[from] NotificationError),
    #[error("replay error: {0}")]
    Replay(#[from] ReplayError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the service binary runs.
pub struct Components {
    pub pipeline: Arc<EventPipeline>,
    pub replay: Option<Arc<ReplayScheduler>>,
}

pub fn build_components(config: &PipelineConfig) -> Result<Components, WorkerError> {
    let source = HttpProfileSource::new(config.profile.api_url.clone(), config.profile.fetch_timeout)?;
    build_components_with_source(config, Arc::new(source))
}

/// Wires the pipeline around an arbitrary profile source.
pub fn build_components_with_source(
    config: &PipelineConfig,
    profile_source: Arc<dyn ProfileSource>,
) -> Result<Components, WorkerError> {
    let profiler = Arc::new(AddressProfiler::new(profile_source, config.profile.clone()));

    // Evaluators without a URL fall back to a neutral score, so the analyzer
    // always has all three signals. They share the profile fetch timeout.
    let timeout = config.profile.fetch_timeout;
    let evaluators = Evaluators {
        ml: evaluator(config.endpoints.ml_evaluator_url.as_deref(), timeout)?,
        pattern: evaluator(config.endpoints.pattern_evaluator_url.as_deref(), timeout)?,
        mev: evaluator(config.endpoints.mev_evaluator_url.as_deref(), timeout)?,
    };
    let risk_set = RiskAddressSet::from_addresses(&config.analyzer.known_risk_addresses)?;
    let analyzer = Arc::new(RiskAnalyzer::new(
        config.analyzer.clone(),
        config.thresholds,
        Arc::new(risk_set),
        evaluators,
    ));

    // Alert sinks and notification channels are separate: sinks get one
    // message per high-risk event, channels go through routing rules.
    let sinks = WebhookSink::from_config(&config.monitoring)?;
    if sinks.is_empty() {
        info!("no alert webhooks configured");
    }
    let monitor = Arc::new(PipelineMonitor::new(&config.monitoring, sinks)?);

    let webhook = Arc::new(WebhookChannel::new(config.monitoring.webhook_timeout)?);
    let router = Arc::new(
        NotificationRouter::new(config.notification.clone())
            .with_channel("slack", webhook.clone())
            .with_channel("dingtalk", webhook.clone())
            .with_channel("feishu", webhook)
            .with_channel("log", Arc::new(LogChannel)),
    );

    // Live ingest and replay share one processed-event record.
    let events = Arc::new(MemoryEventStore::new());
    let pipeline = Arc::new(
        EventPipeline::new(
            profiler,
            analyzer,
            monitor,
            router,
            config.monitoring.alert_level,
        )
        .with_event_store(events.clone()),
    );

    // Replay needs at least one node endpoint; `validate` guarantees every
    // replayed chain then resolves to one.
    let replay = if config.endpoints.replay_enabled() {
        let urls = config.endpoints.rpc_urls(&config.replay.chains);
        let source = RpcReplaySource::new(urls, timeout)?;
        let jobs = Arc::new(JobMonitor::new(Arc::new(MemoryStorage::new())));
        Some(Arc::new(ReplayScheduler::new(
            config.replay.clone(),
            Arc::new(source),
            pipeline.clone(),
            jobs,
            events,
        )))
    } else {
        None
    };

    Ok(Components { pipeline, replay })
}

fn evaluator(url: Option<&str>, timeout: Duration) -> Result<Arc<dyn RiskEvaluator>, WorkerError> {
    Ok(match url {
        Some(url) => Arc::new(HttpEvaluator::new(url, timeout)?),
        None => Arc::new(NeutralEvaluator),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub processed: u64,
    pub failed: u64,
    pub malformed: u64,
}

/// Feeds JSON lines from `reader` through the pipeline until EOF. Each line
/// is one raw event; an optional `chainId` field selects the chain
/// (default 1).
pub async fn run_stdin<R>(pipeline: &EventPipeline, reader: R) -> Result<IngestSummary, WorkerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = IngestSummary::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "skipping malformed input line");
                counter!("ingest_lines_total", "result" => "malformed").increment(1);
                summary.malformed += 1;
                continue;
            }
        };
        let chain_id = raw.get("chainId").and_then(Value::as_u64).unwrap_or(1);

        // Pipeline errors are already logged and counted by the monitor.
        match pipeline.process_event(chain_id, &raw).await {
            Ok(_) => {
                counter!("ingest_lines_total", "result" => "processed").increment(1);
                summary.processed += 1;
            }
            Err(_) => {
                counter!("ingest_lines_total", "result" => "failed").increment(1);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

/// Periodically purges expired throttle entries and flushes expired batches.
/// `interval` must be non-zero (`notification.cleanup_interval` is
/// validated).
pub fn spawn_maintenance(router: Arc<NotificationRouter>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let purged = router.cleanup();
            let flushed = router.flush_expired_batches().await;
            debug!(purged, flushed, "notification maintenance");
        }
    })
}

/// Wipes the monitor's recorder every `interval` so per-trace series do not
/// accumulate for the life of the process.
pub fn spawn_metrics_reset(monitor: Arc<PipelineMonitor>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; there is nothing to drop yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match monitor.reset() {
                Ok(()) => debug!("pipeline metrics reset"),
                Err(err) => warn!(error = %err, "pipeline metrics reset failed"),
            }
        }
    })
}
