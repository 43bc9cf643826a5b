//! Risk-level based notification routing with per-key throttling, batch
//! aggregation and emergency escalation.

mod channel;
mod rate_limiter;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use chainwatch_domain::{
    parse_wei, AddressProfile, EventKind, NormalizedEvent, NotificationConfig, ReceiverConfig,
    RiskAnalysis, RiskLevel,
};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use channel::{BatchSummary, LogChannel, Notification, NotificationChannel, WebhookChannel};
pub use rate_limiter::RateLimiter;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// What `route` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// No channel is configured for the level.
    NoChannels,
    /// No receiver subscribes to the event.
    NoReceivers,
    /// Queued for batched delivery.
    Batched,
    Delivered {
        sent: usize,
        suppressed: usize,
        failed: usize,
    },
}

impl RouteOutcome {
    pub fn sent(&self) -> usize {
        match self {
            RouteOutcome::Delivered { sent, .. } => *sent,
            _ => 0,
        }
    }

    pub fn failed(&self) -> usize {
        match self {
            RouteOutcome::Delivered { failed, .. } => *failed,
            _ => 0,
        }
    }
}

struct PendingBatch {
    opened_at: Instant,
    chain_id: u64,
    operator: String,
    items: Vec<Notification>,
}

impl PendingBatch {
    fn summary(&self) -> Notification {
        let total = self
            .items
            .iter()
            .filter_map(|item| parse_wei(&item.value))
            .fold(0u128, u128::saturating_add);
        let worst = self
            .items
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .cloned();
        let hashes: Vec<String> = self
            .items
            .iter()
            .map(|item| item.transaction_hash.clone())
            .collect();

        let mut summary = worst.unwrap_or_else(|| Notification {
            receiver: String::new(),
            chain_id: self.chain_id,
            transaction_hash: String::new(),
            from: self.operator.clone(),
            to: None,
            value: String::new(),
            level: RiskLevel::Low,
            score: 0.0,
            factors: Vec::new(),
            summary: String::new(),
            is_emergency: false,
            batch: None,
        });
        summary.level = self
            .items
            .iter()
            .map(|item| item.level)
            .max()
            .unwrap_or(summary.level);
        summary.value = total.to_string();
        summary.summary = format!(
            "{} batched operations by {} totaling {} wei",
            self.items.len(),
            self.operator,
            total
        );
        summary.batch = Some(BatchSummary {
            operator: self.operator.clone(),
            operations: self.items.len(),
            transaction_hashes: hashes,
            total_value: total.to_string(),
        });
        summary
    }
}

pub struct NotificationRouter {
    config: NotificationConfig,
    limiter: RateLimiter,
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
    batches: Mutex<HashMap<(u64, String), PendingBatch>>,
}

impl NotificationRouter {
    pub fn new(config: NotificationConfig) -> Self {
        let limiter = RateLimiter::new(config.throttle_window);
        Self {
            config,
            limiter,
            channels: HashMap::new(),
            batches: Mutex::new(HashMap::new()),
        }
    }

    /// Registers the delivery implementation used for channel `name`.
    pub fn with_channel(mut self, name: impl Into<String>, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.insert(name.into(), channel);
        self
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cleanup(&self) -> usize {
        self.limiter.cleanup()
    }

    /// Strictly above either the score cutoff or the chain's value cutoff.
    /// Unknown chains use mainnet's value cutoff.
    pub fn is_emergency(&self, event: &NormalizedEvent, analysis: &RiskAnalysis) -> bool {
        let rules = &self.config.emergency;
        if analysis.score > rules.risk_score {
            return true;
        }
        let threshold = rules
            .amount_thresholds
            .get(&event.chain_id)
            .or_else(|| rules.amount_thresholds.get(&1));
        match (threshold, parse_wei(&event.value)) {
            (Some(threshold), Some(value)) => value > *threshold,
            _ => false,
        }
    }

    pub async fn route(
        &self,
        event: &NormalizedEvent,
        profile: &AddressProfile,
        analysis: &RiskAnalysis,
    ) -> RouteOutcome {
        let emergency = self.is_emergency(event, analysis);
        // Emergencies are escalated to the critical channel set.
        let routing_level = if emergency {
            RiskLevel::Critical
        } else {
            analysis.level
        };

        if self.config.channels_for(routing_level).is_empty() {
            debug!(tx_hash = %event.transaction_hash, level = %routing_level, "no channels for level");
            counter!("notifications_filtered_total", "reason" => "no_channels").increment(1);
            return RouteOutcome::NoChannels;
        }

        // `receiver` is filled in per destination by `dispatch`.
        let notification = Notification {
            receiver: String::new(),
            chain_id: event.chain_id,
            transaction_hash: event.transaction_hash.clone(),
            from: event.from.clone(),
            to: event.to.clone(),
            value: event.value.clone(),
            level: analysis.level,
            score: analysis.score,
            factors: analysis.factors.clone(),
            summary: format!("{} (sender category: {})", analysis.summary, profile.category),
            is_emergency: emergency,
            batch: None,
        };

        // Batch operations wait for siblings from the same operator, unless
        // they are emergencies, which always go out immediately.
        if event.is_batch_operation && !emergency {
            return self.enqueue_batch(notification).await;
        }

        if emergency {
            warn!(
                tx_hash = %event.transaction_hash,
                score = analysis.score,
                value = %event.value,
                "emergency notification"
            );
        }
        self.dispatch(&notification, routing_level, event.kind(), emergency)
            .await
    }

    /// Delivers every batch whose window has elapsed. Batches that reached
    /// `min_operations` go out as one summary, smaller ones item by item.
    /// Returns the number of batches flushed.
    pub async fn flush_expired_batches(&self) -> usize {
        // Drain expired batches first so no lock is held across awaits.
        let expired: Vec<PendingBatch> = {
            let mut guard = self.batches.lock().expect("mutex poisoned");
            let keys: Vec<_> = guard
                .iter()
                .filter(|(_, batch)| batch.opened_at.elapsed() >= self.config.batch.window)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter().filter_map(|key| guard.remove(&key)).collect()
        };

        for batch in &expired {
            if batch.items.len() >= self.config.batch.min_operations {
                let summary = batch.summary();
                self.dispatch(&summary, summary.level, EventKind::BatchOperation, false)
                    .await;
            } else {
                for item in &batch.items {
                    self.dispatch(item, item.level, EventKind::BatchOperation, false)
                        .await;
                }
            }
        }
        expired.len()
    }

    pub fn pending_batches(&self) -> usize {
        self.batches.lock().expect("mutex poisoned").len()
    }

    async fn enqueue_batch(&self, notification: Notification) -> RouteOutcome {
        // Take the full batch out under the lock; deliver after releasing it.
        let full = {
            let mut guard = self.batches.lock().expect("mutex poisoned");
            // One open batch per (chain, operator).
            let key = (notification.chain_id, notification.from.clone());
            let batch = guard.entry(key.clone()).or_insert_with(|| PendingBatch {
                opened_at: Instant::now(),
                chain_id: notification.chain_id,
                operator: notification.from.clone(),
                items: Vec::new(),
            });
            info!(
                operator = %notification.from,
                tx_hash = %notification.transaction_hash,
                queued = batch.items.len() + 1,
                "notification queued for batch delivery"
            );
            batch.items.push(notification);
            if batch.items.len() >= self.config.batch.max_operations {
                guard.remove(&key)
            } else {
                None
            }
        };

        match full {
            Some(batch) => {
                let summary = batch.summary();
                info!(
                    operator = %batch.operator,
                    operations = batch.items.len(),
                    "batch full, delivering summary"
                );
                self.dispatch(&summary, summary.level, EventKind::BatchOperation, false)
                    .await
            }
            None => RouteOutcome::Batched,
        }
    }

    fn receivers_for(&self, chain_id: u64, level: RiskLevel, kind: EventKind) -> Vec<&ReceiverConfig> {
        self.config
            .receivers
            .iter()
            .filter(|receiver| receiver.subscribes_to(chain_id, level, kind.as_ref()))
            .collect()
    }

    async fn dispatch(
        &self,
        notification: &Notification,
        level: RiskLevel,
        kind: EventKind,
        bypass_throttle: bool,
    ) -> RouteOutcome {
        let receivers = self.receivers_for(notification.chain_id, level, kind);
        if receivers.is_empty() {
            info!(
                tx_hash = %notification.transaction_hash,
                %level,
                %kind,
                "no matching receiver"
            );
            counter!("notifications_filtered_total", "reason" => "no_receivers").increment(1);
            return RouteOutcome::NoReceivers;
        }

        let (mut sent, mut suppressed, mut failed) = (0, 0, 0);
        for receiver in receivers {
            for channel_name in self.config.channels_for(level) {
                let Some(destination) = receiver.destinations.get(channel_name) else {
                    continue;
                };
                let Some(channel) = self.channels.get(channel_name) else {
                    warn!(channel = %channel_name, "no delivery channel registered");
                    continue;
                };
                if !bypass_throttle && !self.limiter.can_send(&receiver.id, channel_name, level) {
                    suppressed += 1;
                    continue;
                }

                let mut payload = notification.clone();
                payload.receiver = receiver.id.clone();
                match channel.deliver(destination, &payload).await {
                    Ok(()) => {
                        sent += 1;
                        counter!("notifications_sent_total", "channel" => channel_name.clone())
                            .increment(1);
                    }
                    Err(err) => {
                        failed += 1;
                        warn!(
                            receiver = %receiver.id,
                            channel = %channel_name,
                            tx_hash = %notification.transaction_hash,
                            error = %err,
                            "notification delivery failed"
                        );
                        counter!("notification_failures_total", "channel" => channel_name.clone())
                            .increment(1);
                    }
                }
            }
        }

        RouteOutcome::Delivered {
            sent,
            suppressed,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chainwatch_domain::{ether, BatchRules, RiskAction};
    use chrono::Utc;
    use std::{
        collections::BTreeMap,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    const FROM: &str = "0x1111111111111111111111111111111111111111";

    #[derive(Default)]
    struct MockChannel {
        fail: bool,
        calls: AtomicUsize,
        delivered: Mutex<Vec<(String, Notification)>>,
    }

    #[async_trait]
    impl NotificationChannel for MockChannel {
        async fn deliver(
            &self,
            destination: &str,
            notification: &Notification,
        ) -> Result<(), NotificationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(NotificationError::Delivery("boom".into()));
            }
            self.delivered
                .lock()
                .unwrap()
                .push((destination.to_string(), notification.clone()));
            Ok(())
        }
    }

    fn receiver(id: &str, channels: &[&str]) -> ReceiverConfig {
        ReceiverConfig {
            id: id.into(),
            chains: vec!["*".into()],
            risk_levels: vec![RiskLevel::Medium, RiskLevel::High, RiskLevel::Critical],
            event_kinds: vec!["*".into()],
            destinations: channels
                .iter()
                .map(|c| (c.to_string(), format!("dest://{id}/{c}")))
                .collect(),
        }
    }

    fn config(receivers: Vec<ReceiverConfig>) -> NotificationConfig {
        NotificationConfig {
            channels: BTreeMap::from([
                (RiskLevel::Low, vec![]),
                (RiskLevel::Medium, vec!["slack".into()]),
                (RiskLevel::High, vec!["slack".into(), "dingtalk".into()]),
                (RiskLevel::Critical, vec!["slack".into(), "dingtalk".into()]),
            ]),
            receivers,
            batch: BatchRules {
                window: Duration::from_millis(20),
                min_operations: 2,
                max_operations: 3,
            },
            ..NotificationConfig::default()
        }
    }

    fn event(value: u128) -> NormalizedEvent {
        NormalizedEvent {
            chain_id: 1,
            transaction_hash: format!("0x{value:x}"),
            from: FROM.into(),
            to: Some("0x2222222222222222222222222222222222222222".into()),
            value: value.to_string(),
            timestamp: 0,
            block_number: 1,
            method_id: None,
            method_name: None,
            parameters: None,
            input: None,
            is_contract_creation: false,
            is_batch_operation: false,
        }
    }

    fn analysis(level: RiskLevel, score: f64) -> RiskAnalysis {
        RiskAnalysis {
            score,
            level,
            factors: vec![],
            features: vec![],
            action: RiskAction::Alert,
            summary: "test".into(),
            timestamp: Utc::now(),
        }
    }

    fn router(
        receivers: Vec<ReceiverConfig>,
        slack: Arc<MockChannel>,
        dingtalk: Arc<MockChannel>,
    ) -> NotificationRouter {
        NotificationRouter::new(config(receivers))
            .with_channel("slack", slack)
            .with_channel("dingtalk", dingtalk)
    }

    fn profile() -> AddressProfile {
        AddressProfile::unknown(FROM)
    }

    #[tokio::test]
    async fn low_level_is_a_noop() {
        let slack = Arc::new(MockChannel::default());
        let router = router(vec![receiver("ops", &["slack"])], slack.clone(), Arc::default());

        let outcome = router
            .route(&event(1), &profile(), &analysis(RiskLevel::Low, 0.1))
            .await;
        assert_eq!(outcome, RouteOutcome::NoChannels);
        assert_eq!(slack.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_alerts_are_throttled_per_key() {
        let slack = Arc::new(MockChannel::default());
        let dingtalk = Arc::new(MockChannel::default());
        let router = router(
            vec![receiver("ops", &["slack", "dingtalk"]), receiver("desk", &["slack"])],
            slack.clone(),
            dingtalk.clone(),
        );
        let high = analysis(RiskLevel::High, 0.75);

        let first = router.route(&event(1), &profile(), &high).await;
        assert_eq!(
            first,
            RouteOutcome::Delivered {
                sent: 3,
                suppressed: 0,
                failed: 0
            }
        );

        let second = router.route(&event(2), &profile(), &high).await;
        assert_eq!(
            second,
            RouteOutcome::Delivered {
                sent: 0,
                suppressed: 3,
                failed: 0
            }
        );

        let critical = router
            .route(&event(3), &profile(), &analysis(RiskLevel::Critical, 0.9))
            .await;
        assert_eq!(critical.sent(), 3);
        assert_eq!(slack.calls.load(Ordering::SeqCst), 4);

        let delivered = slack.delivered.lock().unwrap();
        assert_eq!(delivered[0].0, "dest://ops/slack");
        assert_eq!(delivered[0].1.receiver, "ops");
    }

    #[tokio::test]
    async fn failing_channel_is_isolated() {
        let slack = Arc::new(MockChannel {
            fail: true,
            ..MockChannel::default()
        });
        let dingtalk = Arc::new(MockChannel::default());
        let router = router(
            vec![receiver("ops", &["slack", "dingtalk"])],
            slack.clone(),
            dingtalk.clone(),
        );

        let outcome = router
            .route(&event(1), &profile(), &analysis(RiskLevel::High, 0.8))
            .await;
        assert_eq!(
            outcome,
            RouteOutcome::Delivered {
                sent: 1,
                suppressed: 0,
                failed: 1
            }
        );
        assert_eq!(dingtalk.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribed_chain_has_no_receivers() {
        let mut desk = receiver("desk", &["slack"]);
        desk.chains = vec!["56".into()];
        let router = router(vec![desk], Arc::default(), Arc::default());

        let outcome = router
            .route(&event(1), &profile(), &analysis(RiskLevel::Medium, 0.5))
            .await;
        assert_eq!(outcome, RouteOutcome::NoReceivers);
    }

    #[tokio::test]
    async fn emergencies_bypass_throttling_and_batching() {
        let slack = Arc::new(MockChannel::default());
        let router = router(vec![receiver("ops", &["slack"])], slack.clone(), Arc::default());

        let mut batched = event(ether(2_000));
        batched.is_batch_operation = true;
        let low = analysis(RiskLevel::Low, 0.2);

        for _ in 0..2 {
            let outcome = router.route(&batched, &profile(), &low).await;
            assert_eq!(outcome.sent(), 1);
        }
        assert_eq!(router.pending_batches(), 0);

        let delivered = slack.delivered.lock().unwrap();
        assert!(delivered.iter().all(|(_, n)| n.is_emergency));
        assert_eq!(delivered[0].1.level, RiskLevel::Low);
    }

    #[tokio::test]
    async fn high_score_is_an_emergency() {
        let router = router(vec![], Arc::default(), Arc::default());
        assert!(router.is_emergency(&event(1), &analysis(RiskLevel::Critical, 0.96)));
        assert!(!router.is_emergency(&event(1), &analysis(RiskLevel::Critical, 0.9)));
        assert!(router.is_emergency(&event(ether(1_001)), &analysis(RiskLevel::Low, 0.1)));
    }

    #[tokio::test]
    async fn emergency_cutoffs_are_exclusive() {
        let router = router(vec![], Arc::default(), Arc::default());
        assert!(!router.is_emergency(&event(1), &analysis(RiskLevel::Critical, 0.95)));
        assert!(!router.is_emergency(&event(ether(1_000)), &analysis(RiskLevel::Low, 0.1)));
        assert!(router.is_emergency(&event(ether(1_000) + 1), &analysis(RiskLevel::Low, 0.1)));
    }

    #[tokio::test]
    async fn batch_flushes_when_full() {
        let slack = Arc::new(MockChannel::default());
        let router = router(vec![receiver("ops", &["slack"])], slack.clone(), Arc::default());
        let medium = analysis(RiskLevel::Medium, 0.5);

        for value in 1..=2 {
            let mut op = event(value);
            op.is_batch_operation = true;
            assert_eq!(router.route(&op, &profile(), &medium).await, RouteOutcome::Batched);
        }
        let mut last = event(3);
        last.is_batch_operation = true;
        let outcome = router.route(&last, &profile(), &medium).await;
        assert_eq!(outcome.sent(), 1);
        assert_eq!(router.pending_batches(), 0);

        let delivered = slack.delivered.lock().unwrap();
        let batch = delivered[0].1.batch.as_ref().expect("batch summary");
        assert_eq!(batch.operations, 3);
        assert_eq!(batch.total_value, "6");
        assert_eq!(batch.operator, FROM);
    }

    #[tokio::test]
    async fn expired_batches_are_flushed() {
        let slack = Arc::new(MockChannel::default());
        let router = router(vec![receiver("ops", &["slack"])], slack.clone(), Arc::default());
        let medium = analysis(RiskLevel::Medium, 0.5);

        let mut lone = event(7);
        lone.is_batch_operation = true;
        assert_eq!(router.route(&lone, &profile(), &medium).await, RouteOutcome::Batched);
        assert_eq!(router.flush_expired_batches().await, 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(router.flush_expired_batches().await, 1);
        assert_eq!(router.pending_batches(), 0);

        let delivered = slack.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].1.batch.is_none());
        assert_eq!(delivered[0].1.transaction_hash, "0x7");
    }
}
