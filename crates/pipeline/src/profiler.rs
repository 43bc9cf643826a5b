//! Address reputation lookups with a TTL cache in front of the upstream
//! profile service.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chainwatch_domain::{canonical_address, AddressProfile, ProfileConfig};
use metrics::counter;
use moka::future::Cache;
use thiserror::Error;
use tokio::{task::JoinSet, time::sleep};
use tracing::{debug, warn};

/// Failure of a single upstream call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProfileSourceError {
    #[error("profile request failed: {0}")]
    Http(String),
    #[error("profile service returned status {0}")]
    Status(u16),
    #[error("invalid profile payload: {0}")]
    Decode(String),
    #[error("profile request timed out after {0:?}")]
    Timeout(Duration),
}

/// Raised once every retry for an address has been used up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to fetch profile for {address} after {attempts} attempt(s): {last_error}")]
pub struct ProfileFetchError {
    pub address: String,
    pub attempts: u32,
    #[source]
    pub last_error: ProfileSourceError,
}

/// Upstream reputation service.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(&self, address: &str) -> Result<AddressProfile, ProfileSourceError>;
}

/// `GET {base_url}/profiles/{address}` returning a camelCase JSON profile.
pub struct HttpProfileSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProfileSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProfileSourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProfileSourceError::Http(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ProfileSource for HttpProfileSource {
    async fn fetch_profile(&self, address: &str) -> Result<AddressProfile, ProfileSourceError> {
        let url = format!("{}/profiles/{}", self.base_url, address);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| ProfileSourceError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProfileSourceError::Status(status.as_u16()));
        }

        response
            .json::<AddressProfile>()
            .await
            .map_err(|err| ProfileSourceError::Decode(err.to_string()))
    }
}

/// How a lookup was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    /// A cached entry existed but crossed the force-refresh score.
    Refreshed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileLookup {
    pub profile: AddressProfile,
    pub outcome: CacheOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchRefreshReport {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}

/// Owns the profile cache. Concurrent lookups for the same address share one
/// upstream fetch.
pub struct AddressProfiler {
    source: Arc<dyn ProfileSource>,
    cache: Cache<String, AddressProfile>,
    config: ProfileConfig,
}

impl AddressProfiler {
    pub fn new(source: Arc<dyn ProfileSource>, config: ProfileConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity.max(1))
            .time_to_live(config.cache_ttl)
            .build();
        Self {
            source,
            cache,
            config,
        }
    }

    pub async fn get_profile(&self, address: &str) -> Result<AddressProfile, ProfileFetchError> {
        self.lookup(address).await.map(|lookup| lookup.profile)
    }

    pub async fn lookup(&self, address: &str) -> Result<ProfileLookup, ProfileFetchError> {
        let key = canonical_address(address);

        let mut outcome = CacheOutcome::Miss;
        if let Some(cached) = self.cache.get(&key).await {
            if cached.risk_score < self.config.force_refresh_risk_score {
                return Ok(ProfileLookup {
                    profile: cached,
                    outcome: CacheOutcome::Hit,
                });
            }
            debug!(address = %key, risk_score = cached.risk_score, "forcing profile refresh");
            self.cache.invalidate(&key).await;
            outcome = CacheOutcome::Refreshed;
        }

        let profile = self
            .cache
            .try_get_with(key.clone(), self.fetch_with_retry(&key))
            .await
            .map_err(|err| (*err).clone())?;

        Ok(ProfileLookup { profile, outcome })
    }

    pub async fn invalidate(&self, address: &str) {
        self.cache.invalidate(&canonical_address(address)).await;
    }

    /// Re-fetches every address in chunks of `batch_size`. One failing
    /// address never aborts the batch.
    pub async fn batch_refresh(self: &Arc<Self>, addresses: &[String]) -> BatchRefreshReport {
        let mut report = BatchRefreshReport {
            total: addresses.len(),
            ..Default::default()
        };

        for chunk in addresses.chunks(self.config.batch_size.max(1)) {
            let mut tasks = JoinSet::new();
            for address in chunk {
                let profiler = Arc::clone(self);
                let address = address.clone();
                tasks.spawn(async move {
                    profiler.invalidate(&address).await;
                    profiler.get_profile(&address).await
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(_)) => report.success += 1,
                    Ok(Err(err)) => {
                        warn!(address = %err.address, error = %err, "batch profile refresh failed");
                        report.failed += 1;
                    }
                    Err(err) => {
                        warn!(error = %err, "batch profile refresh task aborted");
                        report.failed += 1;
                    }
                }
            }
        }

        debug!(
            total = report.total,
            success = report.success,
            failed = report.failed,
            "batch profile refresh finished"
        );
        report
    }

    pub fn cached_entries(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Delay before retry number `retry` (1-based): exponential from
    /// `min_retry_delay`, capped at `max_retry_delay`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.config
            .min_retry_delay
            .saturating_mul(factor)
            .min(self.config.max_retry_delay)
    }

    async fn fetch_with_retry(&self, address: &str) -> Result<AddressProfile, ProfileFetchError> {
        let attempts = self.config.fetch_retries.saturating_add(1);
        let mut last_error = ProfileSourceError::Http("no attempt made".to_string());

        for attempt in 1..=attempts {
            if attempt > 1 {
                sleep(self.backoff_delay(attempt - 1)).await;
            }

            let fetched = tokio::time::timeout(
                self.config.fetch_timeout,
                self.source.fetch_profile(address),
            )
            .await
            .unwrap_or(Err(ProfileSourceError::Timeout(self.config.fetch_timeout)));

            match fetched {
                Ok(mut profile) => {
                    counter!("profile_fetch_attempts_total", "result" => "ok").increment(1);
                    profile.address = canonical_address(&profile.address);
                    if profile.address.is_empty() {
                        profile.address = address.to_string();
                    }
                    return Ok(profile);
                }
                Err(err) => {
                    counter!("profile_fetch_attempts_total", "result" => "error").increment(1);
                    warn!(address, attempt, attempts, error = %err, "profile fetch attempt failed");
                    last_error = err;
                }
            }
        }

        Err(ProfileFetchError {
            address: address.to_string(),
            attempts,
            last_error,
        })
    }
}
