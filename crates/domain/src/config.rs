//! Structured configuration consumed by every pipeline component, with
//! environment-driven overrides and range validation.

use std::{
    collections::{BTreeMap, HashMap},
    env,
    time::Duration,
};

use thiserror::Error;

use crate::model::{ether, RiskLevel};

/// Full configuration surface of the event risk pipeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineConfig {
    pub monitoring: MonitoringConfig,
    pub thresholds: RiskThresholds,
    pub analyzer: AnalyzerConfig,
    pub notification: NotificationConfig,
    pub profile: ProfileConfig,
    pub replay: ReplayConfig,
    pub endpoints: EndpointConfig,
}

impl PipelineConfig {
    /// Loads configuration by hydrating `.env` (if present), applying any
    /// overrides found in the process environment on top of the defaults and
    /// validating the result. Malformed entries surface as `ConfigError`.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let mut config = Self::default();

        if let Some(prefix) = get_optional_var("METRICS_PREFIX") {
            config.monitoring.metrics_prefix = prefix;
        }
        if let Some(buckets) = get_optional_var("METRICS_BUCKETS") {
            config.monitoring.metrics_buckets = parse_f64_list("METRICS_BUCKETS", &buckets)?;
        }
        if let Some(secs) = get_optional_var("METRICS_RESET_SECS") {
            config.monitoring.reset_interval =
                Some(Duration::from_secs(parse_u64("METRICS_RESET_SECS", &secs)?));
        }
        config.monitoring.webhooks = WebhookUrls {
            slack: get_optional_var("SLACK_WEBHOOK_URL"),
            dingtalk: get_optional_var("DINGTALK_WEBHOOK_URL"),
            feishu: get_optional_var("FEISHU_WEBHOOK_URL"),
        };

        override_f64(&mut config.thresholds.medium, "RISK_THRESHOLD_MEDIUM")?;
        override_f64(&mut config.thresholds.high, "RISK_THRESHOLD_HIGH")?;
        override_f64(&mut config.thresholds.critical, "RISK_THRESHOLD_CRITICAL")?;

        if let Some(list) = get_optional_var("KNOWN_RISK_ADDRESSES") {
            config.analyzer.known_risk_addresses = split_list(&list);
        }

        for (level, key) in [
            (RiskLevel::Low, "NOTIFICATION_CHANNELS_LOW"),
            (RiskLevel::Medium, "NOTIFICATION_CHANNELS_MEDIUM"),
            (RiskLevel::High, "NOTIFICATION_CHANNELS_HIGH"),
            (RiskLevel::Critical, "NOTIFICATION_CHANNELS_CRITICAL"),
        ] {
            if let Ok(value) = env::var(key) {
                config.notification.channels.insert(level, split_list(&value));
            }
        }
        override_secs(
            &mut config.notification.throttle_window,
            "NOTIFICATION_THROTTLE_SECS",
        )?;
        config.notification.receivers = vec![ReceiverConfig::operations(&config.monitoring.webhooks)];

        if let Some(url) = get_optional_var("PROFILE_API_URL") {
            config.profile.api_url = url;
        }
        override_secs(&mut config.profile.cache_ttl, "PROFILE_CACHE_TTL")?;
        override_millis(&mut config.profile.fetch_timeout, "PROFILE_FETCH_TIMEOUT_MS")?;
        override_u32(&mut config.profile.fetch_retries, "PROFILE_FETCH_RETRIES")?;
        override_millis(&mut config.profile.min_retry_delay, "PROFILE_MIN_RETRY_DELAY_MS")?;
        override_millis(&mut config.profile.max_retry_delay, "PROFILE_MAX_RETRY_DELAY_MS")?;
        override_f64(
            &mut config.profile.force_refresh_risk_score,
            "PROFILE_FORCE_REFRESH_RISK_SCORE",
        )?;

        if let Some(chains) = get_optional_var("REPLAY_CHAINS") {
            config.replay.chains = split_list(&chains)
                .iter()
                .map(|chain| parse_u64("REPLAY_CHAINS", chain))
                .collect::<Result<_, _>>()?;
        }
        override_u32(&mut config.replay.max_retries, "REPLAY_MAX_RETRIES")?;
        override_secs(&mut config.replay.retry_delay, "REPLAY_RETRY_DELAY_SECS")?;
        override_u64(&mut config.replay.lookback_blocks, "REPLAY_LOOKBACK_BLOCKS")?;
        override_u64(&mut config.replay.batch_size, "REPLAY_BATCH_SIZE")?;
        override_secs(&mut config.replay.interval, "REPLAY_INTERVAL_SECS")?;

        // Per-chain endpoints win over the shared `CHAIN_RPC_URL`.
        let chain_rpc_urls = config
            .replay
            .chains
            .iter()
            .filter_map(|chain| {
                get_optional_var(&format!("CHAIN_RPC_URL_{chain}")).map(|url| (*chain, url))
            })
            .collect();
        config.endpoints = EndpointConfig {
            chain_rpc_url: get_optional_var("CHAIN_RPC_URL"),
            chain_rpc_urls,
            ml_evaluator_url: get_optional_var("ML_EVALUATOR_URL"),
            pattern_evaluator_url: get_optional_var("PATTERN_EVALUATOR_URL"),
            mev_evaluator_url: get_optional_var("MEV_EVALUATOR_URL"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks every documented range. Called by `load_from_env`; callers that
    /// build a config by hand should call it before wiring components.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        self.analyzer.weights.validate()?;
        validate_buckets(&self.monitoring.metrics_buckets)?;

        if self.monitoring.metrics_prefix.trim().is_empty() {
            return Err(ConfigError::out_of_range(
                "monitoring.metrics_prefix",
                "must not be empty",
            ));
        }
        if self.monitoring.reset_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::out_of_range(
                "monitoring.reset_interval",
                "must be non-zero when set",
            ));
        }
        if self.profile.min_retry_delay > self.profile.max_retry_delay {
            return Err(ConfigError::out_of_range(
                "profile.min_retry_delay",
                "must not exceed profile.max_retry_delay",
            ));
        }
        if !(0.0..=1.0).contains(&self.profile.force_refresh_risk_score) {
            return Err(ConfigError::out_of_range(
                "profile.force_refresh_risk_score",
                "must be within [0, 1]",
            ));
        }
        if self.profile.cache_ttl.is_zero() {
            return Err(ConfigError::out_of_range("profile.cache_ttl", "must be non-zero"));
        }
        if self.profile.cache_ttl > ProfileConfig::MAX_CACHE_TTL {
            return Err(ConfigError::out_of_range(
                "profile.cache_ttl",
                format!("must not exceed {}s", ProfileConfig::MAX_CACHE_TTL.as_secs()),
            ));
        }
        if self.profile.batch_size == 0 {
            return Err(ConfigError::out_of_range("profile.batch_size", "must be non-zero"));
        }
        if self.notification.throttle_window.is_zero() {
            return Err(ConfigError::out_of_range(
                "notification.throttle_window",
                "must be non-zero",
            ));
        }
        if self.notification.cleanup_interval.is_zero() {
            return Err(ConfigError::out_of_range(
                "notification.cleanup_interval",
                "must be non-zero",
            ));
        }
        if self.notification.batch.min_operations > self.notification.batch.max_operations {
            return Err(ConfigError::out_of_range(
                "notification.batch.min_operations",
                "must not exceed notification.batch.max_operations",
            ));
        }
        if self.replay.batch_size == 0 {
            return Err(ConfigError::out_of_range("replay.batch_size", "must be non-zero"));
        }
        if self.replay.interval.is_zero() {
            return Err(ConfigError::out_of_range("replay.interval", "must be non-zero"));
        }
        self.endpoints.validate_replay(&self.replay.chains)?;

        Ok(())
    }
}

/// Prometheus naming, histogram layout and alert webhooks.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringConfig {
    pub metrics_prefix: String,
    pub metrics_buckets: Vec<f64>,
    pub webhooks: WebhookUrls,
    pub webhook_timeout: Duration,
    /// Minimum level that triggers webhook alerts.
    pub alert_level: RiskLevel,
    /// How often the pipeline recorder is wiped. Per-trace series grow with
    /// every event, so long-running processes should set this.
    pub reset_interval: Option<Duration>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_prefix: "chainwatch".to_string(),
            metrics_buckets: vec![0.1, 0.5, 1.0, 2.0, 5.0],
            webhooks: WebhookUrls::default(),
            webhook_timeout: Duration::from_secs(10),
            alert_level: RiskLevel::High,
            reset_interval: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookUrls {
    pub slack: Option<String>,
    pub dingtalk: Option<String>,
    pub feishu: Option<String>,
}

/// Ascending score thresholds separating the risk levels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium: 0.4,
            high: 0.7,
            critical: 0.9,
        }
    }
}

impl RiskThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("thresholds.medium", self.medium),
            ("thresholds.high", self.high),
            ("thresholds.critical", self.critical),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::out_of_range(field, "must be within [0, 1]"));
            }
        }
        if !(self.medium < self.high && self.high < self.critical) {
            return Err(ConfigError::out_of_range(
                "thresholds",
                "must be strictly ascending (medium < high < critical)",
            ));
        }
        Ok(())
    }
}

/// Per-signal weights of the risk score; must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalWeights {
    pub amount: f64,
    pub history: f64,
    pub blacklist: f64,
    pub time_pattern: f64,
    pub contract: f64,
    pub behavior: f64,
    pub ml: f64,
    pub pattern: f64,
    pub mev: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            amount: 0.25,
            history: 0.10,
            blacklist: 0.15,
            time_pattern: 0.05,
            contract: 0.10,
            behavior: 0.10,
            ml: 0.10,
            pattern: 0.10,
            mev: 0.05,
        }
    }
}

impl SignalWeights {
    const TOLERANCE: f64 = 1e-6;

    fn as_array(&self) -> [f64; 9] {
        [
            self.amount,
            self.history,
            self.blacklist,
            self.time_pattern,
            self.contract,
            self.behavior,
            self.ml,
            self.pattern,
            self.mev,
        ]
    }

    pub fn sum(&self) -> f64 {
        self.as_array().iter().sum()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.as_array().iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::out_of_range(
                "analyzer.weights",
                "weights must be finite and non-negative",
            ));
        }
        if (self.sum() - 1.0).abs() > Self::TOLERANCE {
            return Err(ConfigError::out_of_range(
                "analyzer.weights",
                "weights must sum to 1",
            ));
        }
        Ok(())
    }
}

/// Chain-specific value cutoffs in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountThresholds {
    pub low: u128,
    pub medium: u128,
    pub high: u128,
}

impl AmountThresholds {
    pub const fn in_ether(low: u128, medium: u128, high: u128) -> Self {
        Self {
            low: ether(low),
            medium: ether(medium),
            high: ether(high),
        }
    }
}

/// Well-known mixer contracts flagged by default.
pub const DEFAULT_KNOWN_RISK_ADDRESSES: [&str; 4] = [
    "0x8589427373d6d84e98730d7795d8f6f8731fda16",
    "0x722122df12d4e14e13ac3b6895a86e84145b6967",
    "0xd90e2f925da726b50c4ed8d0fb90ad053324f31b",
    "0x169ad27a470d064dede56a2d3ff727986b15d52b",
];

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    pub weights: SignalWeights,
    pub amount_thresholds: HashMap<u64, AmountThresholds>,
    pub known_risk_addresses: Vec<String>,
    /// Transaction count at which the frequency component saturates.
    pub history_tx_cap: u64,
    /// Number of related addresses at which the diversity component saturates.
    pub diversity_cap: usize,
    /// Accounts younger than this are flagged as new.
    pub new_account_age: Duration,
    /// Window used for "recent high-value activity".
    pub recent_activity_window: Duration,
    pub mev_confirm_score: f64,
    pub min_confidence: f64,
}

impl AnalyzerConfig {
    pub const DEFAULT_CHAIN: u64 = 1;

    /// Cutoffs for `chain_id`, falling back to mainnet values.
    pub fn amount_thresholds_for(&self, chain_id: u64) -> AmountThresholds {
        self.amount_thresholds
            .get(&chain_id)
            .or_else(|| self.amount_thresholds.get(&Self::DEFAULT_CHAIN))
            .copied()
            .unwrap_or(AmountThresholds::in_ether(10, 100, 1_000))
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            amount_thresholds: HashMap::from([
                (1, AmountThresholds::in_ether(10, 100, 1_000)),
                (56, AmountThresholds::in_ether(100, 1_000, 10_000)),
                (137, AmountThresholds::in_ether(1_000, 10_000, 100_000)),
            ]),
            known_risk_addresses: DEFAULT_KNOWN_RISK_ADDRESSES
                .iter()
                .map(|a| a.to_string())
                .collect(),
            history_tx_cap: 1_000,
            diversity_cap: 50,
            new_account_age: Duration::from_secs(7 * 24 * 3600),
            recent_activity_window: Duration::from_secs(24 * 3600),
            mev_confirm_score: 0.5,
            min_confidence: 0.5,
        }
    }
}

/// Routing, throttling, batching and emergency rules for notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationConfig {
    pub channels: BTreeMap<RiskLevel, Vec<String>>,
    pub receivers: Vec<ReceiverConfig>,
    pub throttle_window: Duration,
    pub cleanup_interval: Duration,
    pub emergency: EmergencyRules,
    pub batch: BatchRules,
}

impl NotificationConfig {
    pub fn channels_for(&self, level: RiskLevel) -> &[String] {
        self.channels.get(&level).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        let channels = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        Self {
            channels: BTreeMap::from([
                (RiskLevel::Low, Vec::new()),
                (RiskLevel::Medium, channels(&["slack"])),
                (RiskLevel::High, channels(&["slack", "dingtalk"])),
                (RiskLevel::Critical, channels(&["slack", "dingtalk", "feishu"])),
            ]),
            receivers: vec![ReceiverConfig::operations(&WebhookUrls::default())],
            throttle_window: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
            emergency: EmergencyRules::default(),
            batch: BatchRules::default(),
        }
    }
}

/// A notification subscriber and where to reach it on each channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    pub id: String,
    /// Chain ids as strings; `*` matches every chain.
    pub chains: Vec<String>,
    pub risk_levels: Vec<RiskLevel>,
    /// Event kinds (`TRANSFER`, ...); `*` matches every kind.
    pub event_kinds: Vec<String>,
    /// Channel name -> destination (URL, chat id, address).
    pub destinations: BTreeMap<String, String>,
}

impl ReceiverConfig {
    pub const WILDCARD: &'static str = "*";

    /// The default on-call receiver, reachable through whichever webhooks
    /// are configured.
    pub fn operations(webhooks: &WebhookUrls) -> Self {
        let mut destinations = BTreeMap::new();
        for (channel, url) in [
            ("slack", &webhooks.slack),
            ("dingtalk", &webhooks.dingtalk),
            ("feishu", &webhooks.feishu),
        ] {
            if let Some(url) = url {
                destinations.insert(channel.to_string(), url.clone());
            }
        }

        Self {
            id: "ops".to_string(),
            chains: vec![Self::WILDCARD.to_string()],
            risk_levels: vec![RiskLevel::Medium, RiskLevel::High, RiskLevel::Critical],
            event_kinds: vec![Self::WILDCARD.to_string()],
            destinations,
        }
    }

    pub fn subscribes_to(&self, chain_id: u64, level: RiskLevel, event_kind: &str) -> bool {
        let chain = chain_id.to_string();
        let chain_match = self
            .chains
            .iter()
            .any(|c| c == Self::WILDCARD || *c == chain);
        let kind_match = self
            .event_kinds
            .iter()
            .any(|k| k == Self::WILDCARD || k.eq_ignore_ascii_case(event_kind));
        chain_match && kind_match && self.risk_levels.contains(&level)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyRules {
    pub risk_score: f64,
    /// Per-chain value (wei) above which an event is an emergency.
    pub amount_thresholds: HashMap<u64, u128>,
}

impl Default for EmergencyRules {
    fn default() -> Self {
        Self {
            risk_score: 0.95,
            amount_thresholds: HashMap::from([
                (1, ether(1_000)),
                (56, ether(10_000)),
                (137, ether(100_000)),
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRules {
    pub window: Duration,
    pub min_operations: usize,
    pub max_operations: usize,
}

impl Default for BatchRules {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            min_operations: 3,
            max_operations: 10,
        }
    }
}

/// Address profile service access and cache behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileConfig {
    pub api_url: String,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
    pub fetch_timeout: Duration,
    pub fetch_retries: u32,
    pub min_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub batch_size: usize,
    /// Cached profiles at or above this score are re-fetched on every lookup.
    pub force_refresh_risk_score: f64,
}

impl ProfileConfig {
    /// Longest cache lifetime accepted; the cache refuses anything near its
    /// internal thousand-year ceiling.
    pub const MAX_CACHE_TTL: Duration = Duration::from_secs(365 * 24 * 3600);
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000".to_string(),
            cache_ttl: Duration::from_secs(3600),
            cache_capacity: 100_000,
            fetch_timeout: Duration::from_millis(15_000),
            fetch_retries: 3,
            min_retry_delay: Duration::from_millis(1_000),
            max_retry_delay: Duration::from_millis(5_000),
            batch_size: 10,
            force_refresh_risk_score: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    pub chains: Vec<u64>,
    /// Number of trailing blocks replayed per run.
    pub lookback_blocks: u64,
    /// Blocks fetched per chain read.
    pub batch_size: u64,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub interval: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            chains: vec![1],
            lookback_blocks: 5_760,
            batch_size: 100,
            max_retries: 3,
            retry_delay: Duration::from_secs(300),
            interval: Duration::from_secs(3600),
        }
    }
}

/// Optional external services; absent entries disable the integration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Shared node endpoint. Only valid when it serves a single chain.
    pub chain_rpc_url: Option<String>,
    /// `CHAIN_RPC_URL_<id>` entries, keyed by chain id.
    pub chain_rpc_urls: BTreeMap<u64, String>,
    pub ml_evaluator_url: Option<String>,
    pub pattern_evaluator_url: Option<String>,
    pub mev_evaluator_url: Option<String>,
}

impl EndpointConfig {
    /// Replay is enabled as soon as any node endpoint is configured.
    pub fn replay_enabled(&self) -> bool {
        self.chain_rpc_url.is_some() || !self.chain_rpc_urls.is_empty()
    }

    pub fn rpc_url_for(&self, chain_id: u64) -> Option<&str> {
        self.chain_rpc_urls
            .get(&chain_id)
            .or(self.chain_rpc_url.as_ref())
            .map(String::as_str)
    }

    /// Resolved endpoint for every replayed chain that has one.
    pub fn rpc_urls(&self, chains: &[u64]) -> BTreeMap<u64, String> {
        chains
            .iter()
            .filter_map(|chain| self.rpc_url_for(*chain).map(|url| (*chain, url.to_string())))
            .collect()
    }

    fn validate_replay(&self, chains: &[u64]) -> Result<(), ConfigError> {
        if !self.replay_enabled() {
            return Ok(());
        }
        if let Some(chain) = chains.iter().find(|c| self.rpc_url_for(**c).is_none()) {
            return Err(ConfigError::out_of_range(
                "endpoints.chain_rpc_urls",
                format!("chain {chain} has no node endpoint; set CHAIN_RPC_URL_{chain}"),
            ));
        }
        let shared = chains
            .iter()
            .filter(|c| !self.chain_rpc_urls.contains_key(*c))
            .count();
        if shared > 1 {
            return Err(ConfigError::out_of_range(
                "endpoints.chain_rpc_url",
                "a shared endpoint can serve only one chain; set CHAIN_RPC_URL_<id> per chain",
            ));
        }
        Ok(())
    }
}

fn validate_buckets(buckets: &[f64]) -> Result<(), ConfigError> {
    if buckets.is_empty() {
        return Err(ConfigError::out_of_range(
            "monitoring.metrics_buckets",
            "must not be empty",
        ));
    }
    if buckets.iter().any(|b| !b.is_finite()) {
        return Err(ConfigError::out_of_range(
            "monitoring.metrics_buckets",
            "must be finite",
        ));
    }
    if buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(ConfigError::out_of_range(
            "monitoring.metrics_buckets",
            "must be strictly ascending",
        ));
    }
    Ok(())
}

fn get_optional_var(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse()
        .map_err(|source| ConfigError::InvalidNumber { key, source })
}

fn parse_f64_list(key: &'static str, value: &str) -> Result<Vec<f64>, ConfigError> {
    split_list(value)
        .iter()
        .map(|item| {
            item.parse()
                .map_err(|source| ConfigError::InvalidFloat { key, source })
        })
        .collect()
}

fn override_f64(target: &mut f64, key: &'static str) -> Result<(), ConfigError> {
    if let Some(value) = get_optional_var(key) {
        *target = value
            .parse()
            .map_err(|source| ConfigError::InvalidFloat { key, source })?;
    }
    Ok(())
}

fn override_u64(target: &mut u64, key: &'static str) -> Result<(), ConfigError> {
    if let Some(value) = get_optional_var(key) {
        *target = parse_u64(key, &value)?;
    }
    Ok(())
}

fn override_u32(target: &mut u32, key: &'static str) -> Result<(), ConfigError> {
    if let Some(value) = get_optional_var(key) {
        *target = value
            .parse()
            .map_err(|source| ConfigError::InvalidNumber { key, source })?;
    }
    Ok(())
}

fn override_secs(target: &mut Duration, key: &'static str) -> Result<(), ConfigError> {
    if let Some(value) = get_optional_var(key) {
        *target = Duration::from_secs(parse_u64(key, &value)?);
    }
    Ok(())
}

fn override_millis(target: &mut Duration, key: &'static str) -> Result<(), ConfigError> {
    if let Some(value) = get_optional_var(key) {
        *target = Duration::from_millis(parse_u64(key, &value)?);
    }
    Ok(())
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("CHAINWATCH_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration, environment parsing or range
/// validation fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("invalid number in `{key}`: {source}")]
    InvalidFloat {
        key: &'static str,
        #[source]
        source: std::num::ParseFloatError,
    },
    #[error("`{field}` out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}

impl ConfigError {
    fn out_of_range(field: &'static str, reason: impl Into<String>) -> Self {
        Self::OutOfRange {
            field,
            reason: reason.into(),
        }
    }
}
