use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chainwatch_domain::RiskLevel;
use metrics::{counter, gauge};
use tracing::debug;

type RateKey = (String, String, RiskLevel);

/// Allows at most one send per `(receiver, channel, level)` per window.
///
/// Check-and-record happens under a single lock so concurrent callers can
/// never both pass for the same key.
#[derive(Clone)]
pub struct RateLimiter {
    window: Duration,
    entries: Arc<Mutex<HashMap<RateKey, Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns `true` and records the send when the key is outside its
    /// window; returns `false` (suppressed) otherwise.
    pub fn can_send(&self, receiver: &str, channel: &str, level: RiskLevel) -> bool {
        let key = (receiver.to_string(), channel.to_string(), level);
        let now = Instant::now();
        let mut guard = self.entries.lock().expect("mutex poisoned");

        if let Some(last_sent) = guard.get(&key) {
            if now.duration_since(*last_sent) < self.window {
                counter!("notification_throttled_total", "channel" => channel.to_string())
                    .increment(1);
                debug!(receiver, channel, %level, "notification throttled");
                return false;
            }
        }

        guard.insert(key, now);
        true
    }

    /// Purges entries whose window has elapsed. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.entries.lock().expect("mutex poisoned");
        let before = guard.len();
        guard.retain(|_, last_sent| now.duration_since(*last_sent) < self.window);
        let removed = before - guard.len();
        gauge!("notification_rate_limiter_entries").set(guard.len() as f64);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
