//! Stage metrics, risk-level counters and webhook alerting for the pipeline.
//!
//! The monitor owns a private Prometheus recorder rather than the process
//! global one, so its prefix-scoped series can be rendered on demand and
//! wiped with `reset`.
//!
//! `events_total`, `errors_total` and `risk_levels_total` carry a `trace_id`
//! label, which makes every processed event its own series. The recorder
//! therefore grows without bound until `reset` runs; long-lived processes
//! reset it on `monitoring.reset_interval` (see `worker::spawn_metrics_reset`).
//! The unlabelled `error_total` and `event_processing_total` series are the
//! ones to aggregate on.

mod sink;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, RwLock},
};

use chainwatch_domain::{MonitoringConfig, NormalizedEvent, RiskAnalysis, RiskLevel};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusRecorder};
use strum_macros::{AsRefStr, Display};
use thiserror::Error;
use tracing::{info, warn};

pub use sink::{AlertSink, WebhookKind, WebhookSink};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MonitorError {
    #[error("invalid latency for {metric}: {value}")]
    InvalidLatency { metric: &'static str, value: f64 },
    #[error("webhook `{sink}` failed: {reason}")]
    Webhook { sink: String, reason: String },
    #[error("failed to build metrics recorder: {0}")]
    Recorder(String),
}

/// Final status of one event as recorded in `event_processing_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ProcessingStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Snapshot {
    events: HashMap<String, u64>,
    errors: HashMap<String, u64>,
    levels: BTreeMap<RiskLevel, u64>,
    cache_hits: u64,
    cache_misses: u64,
}

impl Snapshot {
    fn hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

pub struct PipelineMonitor {
    prefix: String,
    buckets: Vec<f64>,
    recorder: RwLock<PrometheusRecorder>,
    snapshot: Mutex<Snapshot>,
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl PipelineMonitor {
    pub fn new(config: &MonitoringConfig, sinks: Vec<Arc<dyn AlertSink>>) -> Result<Self, MonitorError> {
        let recorder = build_recorder(&config.metrics_buckets)?;
        Ok(Self {
            prefix: config.metrics_prefix.clone(),
            buckets: config.metrics_buckets.clone(),
            recorder: RwLock::new(recorder),
            snapshot: Mutex::new(Snapshot::default()),
            sinks,
        })
    }

    fn metric(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }

    fn with_recorder<T>(&self, f: impl FnOnce() -> T) -> T {
        let recorder = self.recorder.read().expect("rwlock poisoned");
        metrics::with_local_recorder(&*recorder, f)
    }

    /// Adds one series per `trace_id`; see the module docs on cardinality.
    pub fn record_event(&self, stage: &str, trace_id: &str) {
        self.with_recorder(|| {
            counter!(
                self.metric("events_total"),
                "stage" => stage.to_string(),
                "trace_id" => trace_id.to_string()
            )
            .increment(1);
        });
        let mut snapshot = self.snapshot.lock().expect("mutex poisoned");
        *snapshot.events.entry(stage.to_string()).or_default() += 1;
    }

    pub fn record_error(&self, kind: &str, trace_id: &str) {
        self.with_recorder(|| {
            counter!(
                self.metric("errors_total"),
                "error" => kind.to_string(),
                "trace_id" => trace_id.to_string()
            )
            .increment(1);
            counter!(self.metric("error_total"), "type" => kind.to_string()).increment(1);
        });
        let mut snapshot = self.snapshot.lock().expect("mutex poisoned");
        *snapshot.errors.entry(kind.to_string()).or_default() += 1;
    }

    pub fn record_processing(&self, status: ProcessingStatus) {
        self.with_recorder(|| {
            counter!(self.metric("event_processing_total"), "status" => status.to_string())
                .increment(1);
        });
    }

    pub fn record_risk_level(&self, level: RiskLevel, trace_id: &str) {
        self.with_recorder(|| {
            counter!(
                self.metric("risk_levels_total"),
                "level" => level.to_string(),
                "trace_id" => trace_id.to_string()
            )
            .increment(1);
        });
        let mut snapshot = self.snapshot.lock().expect("mutex poisoned");
        *snapshot.levels.entry(level).or_default() += 1;
    }

    pub fn record_cache_hit(&self) {
        self.record_cache(true);
    }

    pub fn record_cache_miss(&self) {
        self.record_cache(false);
    }

    fn record_cache(&self, hit: bool) {
        let ratio = {
            let mut snapshot = self.snapshot.lock().expect("mutex poisoned");
            if hit {
                snapshot.cache_hits += 1;
            } else {
                snapshot.cache_misses += 1;
            }
            snapshot.hit_ratio()
        };
        let name = if hit {
            "profile_cache_hits_total"
        } else {
            "profile_cache_misses_total"
        };
        self.with_recorder(|| {
            counter!(self.metric(name)).increment(1);
            gauge!(self.metric("profile_cache_hit_ratio")).set(ratio);
        });
    }

    pub fn record_profile_latency(&self, seconds: f64) -> Result<(), MonitorError> {
        self.record_latency("profile_latency_seconds", seconds)
    }

    pub fn record_analysis_latency(&self, seconds: f64) -> Result<(), MonitorError> {
        self.record_latency("ai_analysis_latency_seconds", seconds)
    }

    pub fn record_notification_latency(&self, seconds: f64) -> Result<(), MonitorError> {
        self.record_latency("notification_latency_seconds", seconds)
    }

    pub fn record_total_latency(&self, seconds: f64) -> Result<(), MonitorError> {
        self.record_latency("total_latency_seconds", seconds)
    }

    fn record_latency(&self, metric: &'static str, seconds: f64) -> Result<(), MonitorError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(MonitorError::InvalidLatency {
                metric,
                value: seconds,
            });
        }
        self.with_recorder(|| histogram!(self.metric(metric)).record(seconds));
        Ok(())
    }

    /// Prometheus exposition text of every series recorded since the last
    /// reset.
    pub fn get_metrics(&self) -> String {
        self.recorder.read().expect("rwlock poisoned").handle().render()
    }

    /// Drops every accumulated series and snapshot count.
    pub fn reset(&self) -> Result<(), MonitorError> {
        let fresh = build_recorder(&self.buckets)?;
        *self.recorder.write().expect("rwlock poisoned") = fresh;
        *self.snapshot.lock().expect("mutex poisoned") = Snapshot::default();
        Ok(())
    }

    pub fn event_count(&self, stage: &str) -> u64 {
        let snapshot = self.snapshot.lock().expect("mutex poisoned");
        snapshot.events.get(stage).copied().unwrap_or(0)
    }

    pub fn error_count(&self, kind: &str) -> u64 {
        let snapshot = self.snapshot.lock().expect("mutex poisoned");
        snapshot.errors.get(kind).copied().unwrap_or(0)
    }

    pub fn risk_level_counts(&self) -> BTreeMap<RiskLevel, u64> {
        self.snapshot.lock().expect("mutex poisoned").levels.clone()
    }

    pub fn cache_hit_ratio(&self) -> f64 {
        self.snapshot.lock().expect("mutex poisoned").hit_ratio()
    }

    /// Sends the alert to every sink. A failing sink is logged and counted;
    /// it never stops delivery to the others.
    pub async fn notify_high_risk(
        &self,
        event: &NormalizedEvent,
        analysis: &RiskAnalysis,
        trace_id: &str,
    ) -> AlertReport {
        let message = alert_message(event, analysis, trace_id);
        let mut report = AlertReport::default();

        for sink in &self.sinks {
            let result = match sink.send(&message).await {
                Ok(()) => {
                    report.delivered += 1;
                    "ok"
                }
                Err(err) => {
                    warn!(trace_id, sink = sink.name(), error = %err, "alert webhook failed");
                    report.failed += 1;
                    "error"
                }
            };
            self.with_recorder(|| {
                counter!(
                    self.metric("alerts_total"),
                    "sink" => sink.name().to_string(),
                    "result" => result
                )
                .increment(1);
            });
        }

        if !self.sinks.is_empty() {
            info!(
                trace_id,
                delivered = report.delivered,
                failed = report.failed,
                "high-risk alert dispatched"
            );
        }
        report
    }
}

fn build_recorder(buckets: &[f64]) -> Result<PrometheusRecorder, MonitorError> {
    PrometheusBuilder::new()
        .set_buckets(buckets)
        .map(PrometheusBuilder::build_recorder)
        .map_err(|err| MonitorError::Recorder(err.to_string()))
}

/// Plain-text body shared by every webhook flavour.
pub fn alert_message(event: &NormalizedEvent, analysis: &RiskAnalysis, trace_id: &str) -> String {
    let mut lines = vec![
        format!("[{}] high-risk transaction detected", analysis.level),
        format!("Trace: {trace_id}"),
        format!("Chain: {}", event.chain_id),
        format!("Tx: {}", event.transaction_hash),
        format!("From: {}", event.from),
        format!("To: {}", event.to.as_deref().unwrap_or("(contract creation)")),
        format!("Value: {}", event.value),
        format!("Risk: {} ({:.2})", analysis.level, analysis.score),
    ];
    if !analysis.factors.is_empty() {
        lines.push(format!("Factors: {}", analysis.factors.join(", ")));
    }
    lines.push("Features:".to_string());
    lines.extend(
        analysis
            .features
            .iter()
            .filter(|feature| feature.score > 0.0)
            .map(|feature| format!("- {}: {:.2}", feature.description, feature.score)),
    );
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chainwatch_domain::{RiskAction, RiskFeature};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockSink {
        name: &'static str,
        fail: bool,
        calls: AtomicUsize,
    }

    impl MockSink {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AlertSink for MockSink {
        fn name(&self) -> &str {
            self.name
        }

        async fn send(&self, _message: &str) -> Result<(), MonitorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(MonitorError::Webhook {
                    sink: self.name.to_string(),
                    reason: "boom".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn config() -> MonitoringConfig {
        MonitoringConfig {
            metrics_prefix: "test".into(),
            ..MonitoringConfig::default()
        }
    }

    fn sample() -> (NormalizedEvent, RiskAnalysis) {
        let event = NormalizedEvent {
            chain_id: 1,
            transaction_hash: "0xabc".into(),
            from: "0x1111111111111111111111111111111111111111".into(),
            to: None,
            value: "5".into(),
            timestamp: 0,
            block_number: 1,
            method_id: None,
            method_name: None,
            parameters: None,
            input: None,
            is_contract_creation: true,
            is_batch_operation: false,
        };
        let analysis = RiskAnalysis {
            score: 0.95,
            level: RiskLevel::Critical,
            factors: vec!["blacklisted_address".into()],
            features: vec![RiskFeature {
                description: "Blacklist membership".into(),
                score: 1.0,
            }],
            action: RiskAction::Block,
            summary: String::new(),
            timestamp: Utc::now(),
        };
        (event, analysis)
    }

    #[test]
    fn latency_rejects_negative_and_nan() {
        let monitor = PipelineMonitor::new(&config(), Vec::new()).unwrap();
        assert_eq!(
            monitor.record_profile_latency(-1.0),
            Err(MonitorError::InvalidLatency {
                metric: "profile_latency_seconds",
                value: -1.0
            })
        );
        assert!(monitor.record_total_latency(f64::NAN).is_err());

        monitor.record_profile_latency(0.5).unwrap();
        let text = monitor.get_metrics();
        assert!(text.contains("test_profile_latency_seconds_count 1"), "{text}");
    }

    #[test]
    fn counters_are_labelled_and_snapshotted() {
        let monitor = PipelineMonitor::new(&config(), Vec::new()).unwrap();
        monitor.record_event("event_received", "t1");
        monitor.record_error("validation", "t1");
        monitor.record_risk_level(RiskLevel::High, "t1");
        monitor.record_processing(ProcessingStatus::Error);

        let text = monitor.get_metrics();
        assert!(text.contains("test_events_total{stage=\"event_received\",trace_id=\"t1\"} 1"));
        assert!(text.contains("test_error_total{type=\"validation\"} 1"));
        assert!(text.contains("test_risk_levels_total{level=\"HIGH\",trace_id=\"t1\"} 1"));
        assert!(text.contains("test_event_processing_total{status=\"error\"} 1"));

        assert_eq!(monitor.event_count("event_received"), 1);
        assert_eq!(monitor.error_count("validation"), 1);
        assert_eq!(monitor.risk_level_counts().get(&RiskLevel::High), Some(&1));
    }

    #[test]
    fn cache_ratio_tracks_hits_and_misses() {
        let monitor = PipelineMonitor::new(&config(), Vec::new()).unwrap();
        assert_eq!(monitor.cache_hit_ratio(), 0.0);
        monitor.record_cache_miss();
        monitor.record_cache_hit();
        monitor.record_cache_hit();
        monitor.record_cache_hit();
        assert_eq!(monitor.cache_hit_ratio(), 0.75);
        assert!(monitor.get_metrics().contains("test_profile_cache_hit_ratio 0.75"));
    }

    #[test]
    fn reset_clears_everything() {
        let monitor = PipelineMonitor::new(&config(), Vec::new()).unwrap();
        monitor.record_event("event_received", "t1");
        monitor.record_cache_hit();
        monitor.reset().unwrap();

        assert_eq!(monitor.event_count("event_received"), 0);
        assert_eq!(monitor.cache_hit_ratio(), 0.0);
        assert!(!monitor.get_metrics().contains("test_events_total"));
    }

    #[test]
    fn every_trace_adds_a_series_until_reset() {
        let monitor = PipelineMonitor::new(&config(), Vec::new()).unwrap();
        for trace in ["t1", "t2", "t3"] {
            monitor.record_event("event_received", trace);
        }
        let text = monitor.get_metrics();
        let series = text
            .lines()
            .filter(|line| line.starts_with("test_events_total{"))
            .count();
        assert_eq!(series, 3);

        monitor.reset().unwrap();
        assert!(!monitor.get_metrics().contains("trace_id=\"t1\""));
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_others() {
        let broken = MockSink::new("slack", true);
        let healthy = MockSink::new("dingtalk", false);
        let monitor = PipelineMonitor::new(
            &config(),
            vec![broken.clone() as Arc<dyn AlertSink>, healthy.clone()],
        )
        .unwrap();

        let (event, analysis) = sample();
        let report = monitor.notify_high_risk(&event, &analysis, "t1").await;

        assert_eq!(report, AlertReport { delivered: 1, failed: 1 });
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn alert_message_lists_event_details() {
        let (event, analysis) = sample();
        let message = alert_message(&event, &analysis, "t1");
        assert!(message.contains("Tx: 0xabc"));
        assert!(message.contains("To: (contract creation)"));
        assert!(message.contains("Risk: CRITICAL (0.95)"));
        assert!(message.contains("- Blacklist membership: 1.00"));
    }
}
