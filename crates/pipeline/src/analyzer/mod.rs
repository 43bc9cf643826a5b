//! Multi-signal risk scoring.
//!
//! Six local signals and three external evaluators are combined through the
//! configured weight table. Floor rules (MEV, blacklist) run afterwards in a
//! fixed order: clamp, MEV floor, blacklist floor, level derivation.

mod evaluator;

use std::sync::Arc;

use chainwatch_domain::{
    parse_wei, AddressCategory, AddressProfile, AnalyzerConfig, NormalizedEvent, RiskAddressSet,
    RiskAnalysis, RiskFeature, RiskLevel, RiskThresholds,
};
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use thiserror::Error;
use tracing::{debug, warn};

pub use evaluator::{
    EvaluatorError, EvaluatorOutput, HttpEvaluator, NeutralEvaluator, RiskEvaluator,
};

const COMPLEX_METHODS: [&str; 4] = ["delegatecall", "multicall", "flashloan", "execute"];
const OFF_HOURS_END: u32 = 6;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RiskAnalysisError {
    #[error("combined risk score is not finite: {0}")]
    NonFiniteScore(f64),
}

/// The three pluggable external scorers.
#[derive(Clone)]
pub struct Evaluators {
    pub ml: Arc<dyn RiskEvaluator>,
    pub pattern: Arc<dyn RiskEvaluator>,
    pub mev: Arc<dyn RiskEvaluator>,
}

impl Default for Evaluators {
    fn default() -> Self {
        Self {
            ml: Arc::new(NeutralEvaluator),
            pattern: Arc::new(NeutralEvaluator),
            mev: Arc::new(NeutralEvaluator),
        }
    }
}

#[derive(Debug, Default)]
struct Signal {
    score: f64,
    factors: Vec<String>,
}

impl Signal {
    fn add(&mut self, score: f64, factor: &str) {
        self.score += score;
        self.factors.push(factor.to_string());
    }

    fn clamped(&self) -> f64 {
        self.score.clamp(0.0, 1.0)
    }
}

struct External {
    signal: Signal,
    confidence: f64,
    /// Factors reported by the evaluator itself, kept apart from degradation
    /// markers so MEV factors are only surfaced once confirmed.
    reported: Vec<String>,
}

pub struct RiskAnalyzer {
    config: AnalyzerConfig,
    thresholds: RiskThresholds,
    risk_set: Arc<RiskAddressSet>,
    evaluators: Evaluators,
}

impl RiskAnalyzer {
    pub fn new(
        config: AnalyzerConfig,
        thresholds: RiskThresholds,
        risk_set: Arc<RiskAddressSet>,
        evaluators: Evaluators,
    ) -> Self {
        Self {
            config,
            thresholds,
            risk_set,
            evaluators,
        }
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// Scores one event. Malformed inputs degrade the affected signal instead
    /// of failing; only a non-finite combined score is an error.
    pub async fn analyze(
        &self,
        event: &NormalizedEvent,
        profile: &AddressProfile,
    ) -> Result<RiskAnalysis, RiskAnalysisError> {
        let now = Utc::now();
        let reference_time = if event.timestamp > 0 {
            event.timestamp
        } else {
            now.timestamp()
        };

        let amount = self.amount_signal(event);
        let history = self.history_signal(profile);
        let blacklisted = self.is_blacklisted(event, profile);
        let time = time_signal(event.timestamp);
        let contract = contract_signal(event, profile);
        let behavior = self.behavior_signal(event, profile, reference_time);

        let (ml, pattern, mev) = tokio::join!(
            self.evaluators.ml.evaluate(event, profile),
            self.evaluators.pattern.evaluate(event, profile),
            self.evaluators.mev.evaluate(event, profile),
        );
        let ml = external_signal("ml", ml);
        let pattern = external_signal("pattern", pattern);
        let mev = external_signal("mev", mev);

        let weights = &self.config.weights;
        let blacklist_score = if blacklisted { 1.0 } else { 0.0 };
        let weighted: [(&str, f64, f64); 9] = [
            ("Transaction amount", weights.amount, amount.clamped()),
            ("Address history", weights.history, history.clamped()),
            ("Blacklist membership", weights.blacklist, blacklist_score),
            ("Time pattern", weights.time_pattern, time.clamped()),
            ("Contract interaction", weights.contract, contract.clamped()),
            ("Behavior pattern", weights.behavior, behavior.clamped()),
            ("ML model", weights.ml, ml.signal.clamped()),
            ("Pattern analysis", weights.pattern, pattern.signal.clamped()),
            ("MEV detection", weights.mev, mev.signal.clamped()),
        ];

        let raw_score: f64 = weighted.iter().map(|(_, weight, score)| weight * score).sum();
        if !raw_score.is_finite() {
            return Err(RiskAnalysisError::NonFiniteScore(raw_score));
        }

        let features = weighted
            .iter()
            .map(|(description, _, score)| RiskFeature {
                description: description.to_string(),
                score: *score,
            })
            .collect();

        let mut factors = Vec::new();
        for signal in [&amount, &history, &time, &contract, &behavior] {
            factors.extend(signal.factors.iter().cloned());
        }
        factors.extend(ml.signal.factors.iter().cloned());
        factors.extend(ml.reported.iter().cloned());
        factors.extend(pattern.signal.factors.iter().cloned());
        factors.extend(pattern.reported.iter().cloned());
        factors.extend(mev.signal.factors.iter().cloned());

        let mut score = raw_score.clamp(0.0, 1.0);

        let mev_confirmed = mev.signal.score >= self.config.mev_confirm_score
            && mev.confidence >= self.config.min_confidence;
        if mev_confirmed {
            factors.push("MEV".to_string());
            factors.extend(mev.reported.iter().cloned());
            score = score.max(self.thresholds.medium);
        }

        let level = if blacklisted {
            factors.push("blacklisted_address".to_string());
            score = score.max(self.thresholds.critical);
            RiskLevel::Critical
        } else {
            RiskLevel::from_score(score, &self.thresholds)
        };

        let summary = if factors.is_empty() {
            format!("{level} risk (score {score:.2}): no risk factors")
        } else {
            format!("{level} risk (score {score:.2}): {}", factors.join(", "))
        };

        debug!(
            tx_hash = %event.transaction_hash,
            score,
            %level,
            factors = factors.len(),
            "risk analysis complete"
        );

        Ok(RiskAnalysis {
            score,
            level,
            factors,
            features,
            action: level.action(),
            summary,
            timestamp: now,
        })
    }

    fn amount_signal(&self, event: &NormalizedEvent) -> Signal {
        let mut signal = Signal::default();
        let Some(value) = parse_wei(&event.value) else {
            signal.factors.push("malformed_value".to_string());
            return signal;
        };

        let cutoffs = self.config.amount_thresholds_for(event.chain_id);
        if value > cutoffs.high {
            signal.add(0.9, "large_transfer");
        } else if value > cutoffs.medium {
            signal.score = 0.6;
        } else if value > cutoffs.low {
            signal.score = 0.3;
        } else {
            signal.score = 0.1;
        }
        signal
    }

    fn history_signal(&self, profile: &AddressProfile) -> Signal {
        let mut signal = Signal::default();
        let frequency = (profile.transaction_count as f64
            / self.config.history_tx_cap.max(1) as f64)
            .min(1.0);
        let diversity = (profile.related_addresses.len() as f64
            / self.config.diversity_cap.max(1) as f64)
            .min(1.0);

        signal.score = 0.6 * frequency + 0.4 * diversity;
        if frequency >= 0.8 {
            signal.factors.push("high_frequency_activity".to_string());
        }
        signal
    }

    fn is_blacklisted(&self, event: &NormalizedEvent, profile: &AddressProfile) -> bool {
        self.risk_set.contains(&event.from)
            || event.to.as_deref().is_some_and(|to| self.risk_set.contains(to))
            || self.risk_set.contains(&profile.address)
            || profile.has_tag("blacklisted")
            || profile.category == AddressCategory::Scam
    }

    fn behavior_signal(
        &self,
        event: &NormalizedEvent,
        profile: &AddressProfile,
        reference_time: i64,
    ) -> Signal {
        let mut signal = Signal::default();

        if profile.transaction_count == 0 {
            signal.add(0.4, "first_time_sender");
        }
        if let Some(to) = event.to.as_deref() {
            if !profile.is_related_to(to) {
                signal.add(0.2, "new_counterparty");
            }
        }

        let high_cutoff = self.config.amount_thresholds_for(event.chain_id).high;
        let recent_window = self.config.recent_activity_window.as_secs() as i64;
        let high_volume = parse_wei(&profile.total_value).is_some_and(|total| total >= high_cutoff);
        let recently_active = profile
            .last_seen
            .is_some_and(|seen| reference_time.saturating_sub(seen) <= recent_window);
        if high_volume && recently_active {
            signal.add(0.4, "recent_high_value_activity");
        }

        let new_account_age = self.config.new_account_age.as_secs() as i64;
        if profile
            .first_seen
            .is_some_and(|first| reference_time.saturating_sub(first) < new_account_age)
        {
            signal.add(0.2, "new_account");
        }

        signal
    }
}

fn time_signal(timestamp: i64) -> Signal {
    let mut signal = Signal::default();
    if timestamp <= 0 {
        return signal;
    }
    let Some(at) = DateTime::<Utc>::from_timestamp(timestamp, 0) else {
        return signal;
    };

    if at.hour() < OFF_HOURS_END {
        signal.add(0.6, "off_hours_activity");
    }
    if matches!(at.weekday(), Weekday::Sat | Weekday::Sun) {
        signal.add(0.3, "weekend_activity");
    }
    signal
}

fn contract_signal(event: &NormalizedEvent, profile: &AddressProfile) -> Signal {
    let mut signal = Signal::default();
    if event.is_contract_creation {
        signal.add(0.5, "contract_creation");
    } else if event.is_contract_call() {
        signal.add(0.3, "contract_interaction");
    } else {
        return signal;
    }

    if profile.has_tag("unverified") {
        signal.add(0.2, "unverified_contract");
    }
    if profile.has_tag("unaudited") {
        signal.add(0.2, "unaudited_contract");
    }
    let complex_method = event.method_name.as_deref().is_some_and(|name| {
        COMPLEX_METHODS
            .iter()
            .any(|method| name.eq_ignore_ascii_case(method))
    });
    if complex_method || profile.has_tag("complex_logic") {
        signal.add(0.2, "complex_contract_logic");
    }
    signal
}

fn external_signal(name: &str, result: Result<EvaluatorOutput, EvaluatorError>) -> External {
    match result {
        Ok(output) if output.score.is_finite() && output.confidence.is_finite() => External {
            signal: Signal {
                score: output.score,
                factors: Vec::new(),
            },
            confidence: output.confidence,
            reported: output.factors,
        },
        Ok(output) => {
            warn!(evaluator = name, score = output.score, "evaluator returned a non-finite score");
            degraded(format!("{name}_invalid_score"))
        }
        Err(err) => {
            warn!(evaluator = name, error = %err, "evaluator unavailable");
            degraded(format!("{name}_unavailable"))
        }
    }
}

fn degraded(factor: String) -> External {
    External {
        signal: Signal {
            score: 0.0,
            factors: vec![factor],
        },
        confidence: 0.0,
        reported: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chainwatch_domain::{ether, RiskAction};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FROM: &str = "0x1111111111111111111111111111111111111111";
    const TO: &str = "0x2222222222222222222222222222222222222222";
    const MIXER: &str = "0x8589427373d6d84e98730d7795d8f6f8731fda16";
    /// Saturday 2024-01-06 03:00:00 UTC.
    const SATURDAY_3AM: i64 = 1_704_510_000;
    /// Wednesday 2024-01-10 12:00:00 UTC.
    const WEDNESDAY_NOON: i64 = 1_704_888_000;

    struct FixedEvaluator {
        output: Result<EvaluatorOutput, EvaluatorError>,
        calls: AtomicUsize,
    }

    impl FixedEvaluator {
        fn new(output: Result<EvaluatorOutput, EvaluatorError>) -> Arc<Self> {
            Arc::new(Self {
                output,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RiskEvaluator for FixedEvaluator {
        async fn evaluate(
            &self,
            _event: &NormalizedEvent,
            _profile: &AddressProfile,
        ) -> Result<EvaluatorOutput, EvaluatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.output.clone()
        }
    }

    fn event(value: u128) -> NormalizedEvent {
        NormalizedEvent {
            chain_id: 1,
            transaction_hash: "0xfeed".into(),
            from: FROM.into(),
            to: Some(TO.into()),
            value: value.to_string(),
            timestamp: WEDNESDAY_NOON,
            block_number: 1,
            method_id: None,
            method_name: None,
            parameters: None,
            input: None,
            is_contract_creation: false,
            is_batch_operation: false,
        }
    }

    fn seasoned_profile() -> AddressProfile {
        let mut profile = AddressProfile::unknown(FROM);
        profile.transaction_count = 10;
        profile.related_addresses.push(TO.into());
        profile
    }

    fn analyzer(evaluators: Evaluators) -> RiskAnalyzer {
        let config = AnalyzerConfig::default();
        let risk_set = RiskAddressSet::from_addresses(&config.known_risk_addresses).unwrap();
        RiskAnalyzer::new(
            config,
            RiskThresholds::default(),
            Arc::new(risk_set),
            evaluators,
        )
    }

    #[tokio::test]
    async fn large_transfer_with_default_profile() {
        let analysis = analyzer(Evaluators::default())
            .analyze(&event(ether(1_001)), &AddressProfile::unknown(FROM))
            .await
            .unwrap();

        assert!(analysis.has_factor("large_transfer"));
        assert!(analysis.score >= 0.2, "score {}", analysis.score);
        assert_eq!(analysis.features.len(), 9);
        assert!(analysis.summary.contains("large_transfer"));
    }

    #[tokio::test]
    async fn amount_cutoffs_are_chain_specific() {
        let analyzer = analyzer(Evaluators::default());
        let mut bsc = event(ether(1_001));
        bsc.chain_id = 56;
        let analysis = analyzer.analyze(&bsc, &seasoned_profile()).await.unwrap();
        assert!(!analysis.has_factor("large_transfer"));
        assert_eq!(analysis.features[0].score, 0.6);

        let mut unknown_chain = event(ether(1_001));
        unknown_chain.chain_id = 9_999;
        let analysis = analyzer.analyze(&unknown_chain, &seasoned_profile()).await.unwrap();
        assert!(analysis.has_factor("large_transfer"));
    }

    #[tokio::test]
    async fn blacklisted_addresses_are_always_critical() {
        let analyzer = analyzer(Evaluators::default());

        let mut to_mixer = event(1);
        to_mixer.to = Some(MIXER.into());
        let analysis = analyzer.analyze(&to_mixer, &seasoned_profile()).await.unwrap();
        assert_eq!(analysis.level, RiskLevel::Critical);
        assert_eq!(analysis.action, RiskAction::Block);
        assert!(analysis.score >= RiskThresholds::default().critical);
        assert!(analysis.has_factor("blacklisted_address"));

        let mut tagged = seasoned_profile();
        tagged.tags.insert("blacklisted".into());
        let analysis = analyzer.analyze(&event(1), &tagged).await.unwrap();
        assert_eq!(analysis.level, RiskLevel::Critical);

        let mut scam = seasoned_profile();
        scam.category = AddressCategory::Scam;
        let analysis = analyzer.analyze(&event(1), &scam).await.unwrap();
        assert_eq!(analysis.level, RiskLevel::Critical);
    }

    #[tokio::test]
    async fn malformed_value_degrades_gracefully() {
        let mut bad = event(0);
        bad.value = "12abc".into();
        let analysis = analyzer(Evaluators::default())
            .analyze(&bad, &seasoned_profile())
            .await
            .unwrap();
        assert!(analysis.has_factor("malformed_value"));
        assert_eq!(analysis.features[0].score, 0.0);
    }

    #[tokio::test]
    async fn evaluator_failures_degrade() {
        let ml = FixedEvaluator::new(Err(EvaluatorError::Status(500)));
        let pattern = FixedEvaluator::new(Ok(EvaluatorOutput {
            score: f64::NAN,
            factors: vec![],
            confidence: 1.0,
        }));
        let analysis = analyzer(Evaluators {
            ml: ml.clone(),
            pattern: pattern.clone(),
            mev: Arc::new(NeutralEvaluator),
        })
        .analyze(&event(1), &seasoned_profile())
        .await
        .unwrap();

        assert!(analysis.has_factor("ml_unavailable"));
        assert!(analysis.has_factor("pattern_invalid_score"));
        assert!(analysis.score.is_finite());
        assert_eq!(ml.calls.load(Ordering::SeqCst), 1);
        assert_eq!(pattern.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn confirmed_mev_floors_at_medium() {
        let confirmed = FixedEvaluator::new(Ok(EvaluatorOutput {
            score: 0.9,
            factors: vec!["sandwich".into()],
            confidence: 0.8,
        }));
        let analysis = analyzer(Evaluators {
            mev: confirmed,
            ..Evaluators::default()
        })
        .analyze(&event(1), &seasoned_profile())
        .await
        .unwrap();
        assert!(analysis.has_factor("MEV"));
        assert!(analysis.has_factor("sandwich"));
        assert!(analysis.score >= RiskThresholds::default().medium);
        assert_eq!(analysis.level, RiskLevel::Medium);

        let unsure = FixedEvaluator::new(Ok(EvaluatorOutput {
            score: 0.9,
            factors: vec!["sandwich".into()],
            confidence: 0.1,
        }));
        let analysis = analyzer(Evaluators {
            mev: unsure,
            ..Evaluators::default()
        })
        .analyze(&event(1), &seasoned_profile())
        .await
        .unwrap();
        assert!(!analysis.has_factor("MEV"));
        assert!(!analysis.has_factor("sandwich"));
    }

    #[tokio::test]
    async fn time_and_behavior_signals() {
        let mut night = event(1);
        night.timestamp = SATURDAY_3AM;
        let mut profile = AddressProfile::unknown(FROM);
        profile.total_value = ether(5_000).to_string();
        profile.transaction_count = 3;
        profile.last_seen = Some(SATURDAY_3AM - 3_600);
        profile.first_seen = Some(SATURDAY_3AM - 86_400);

        let analysis = analyzer(Evaluators::default())
            .analyze(&night, &profile)
            .await
            .unwrap();

        for factor in [
            "off_hours_activity",
            "weekend_activity",
            "new_counterparty",
            "recent_high_value_activity",
            "new_account",
        ] {
            assert!(analysis.has_factor(factor), "missing {factor}");
        }
        assert!(!analysis.has_factor("first_time_sender"));
    }

    #[tokio::test]
    async fn contract_heuristics() {
        let mut call = event(1);
        call.input = Some("0xdeadbeef".into());
        call.method_name = Some("multicall".into());
        let mut profile = seasoned_profile();
        profile.tags.insert("unverified".into());

        let analysis = analyzer(Evaluators::default())
            .analyze(&call, &profile)
            .await
            .unwrap();
        assert!(analysis.has_factor("contract_interaction"));
        assert!(analysis.has_factor("unverified_contract"));
        assert!(analysis.has_factor("complex_contract_logic"));
        assert!((analysis.features[4].score - 0.7).abs() < 1e-9);

        let mut creation = event(1);
        creation.to = None;
        creation.is_contract_creation = true;
        let analysis = analyzer(Evaluators::default())
            .analyze(&creation, &seasoned_profile())
            .await
            .unwrap();
        assert!(analysis.has_factor("contract_creation"));
    }

    #[tokio::test]
    async fn quiet_transfer_is_low() {
        let analysis = analyzer(Evaluators::default())
            .analyze(&event(ether(1)), &seasoned_profile())
            .await
            .unwrap();
        assert_eq!(analysis.level, RiskLevel::Low);
        assert_eq!(analysis.action, RiskAction::None);
        assert!(analysis.factors.is_empty());
        assert!(analysis.summary.ends_with("no risk factors"));
    }
}
