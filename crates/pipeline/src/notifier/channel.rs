use std::time::Duration;

use async_trait::async_trait;
use chainwatch_domain::RiskLevel;
use serde::Serialize;
use tracing::info;

use super::NotificationError;

/// Summary attached to a notification that stands for several batched
/// operations by one operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub operator: String,
    pub operations: usize,
    pub transaction_hashes: Vec<String>,
    /// Sum of the batched values in wei (saturating).
    pub total_value: String,
}

/// Payload handed to every delivery channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub receiver: String,
    pub chain_id: u64,
    pub transaction_hash: String,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
    pub level: RiskLevel,
    pub score: f64,
    pub factors: Vec<String>,
    pub summary: String,
    pub is_emergency: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchSummary>,
}

/// A named delivery mechanism (webhook, log, ...).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn deliver(
        &self,
        destination: &str,
        notification: &Notification,
    ) -> Result<(), NotificationError>;
}

/// POSTs the notification as JSON to the receiver's destination URL.
pub struct WebhookChannel {
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(timeout: Duration) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| NotificationError::Delivery(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn deliver(
        &self,
        destination: &str,
        notification: &Notification,
    ) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(destination)
            .json(notification)
            .send()
            .await
            .map_err(|err| NotificationError::Delivery(err.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::Delivery(format!(
                "status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn deliver(
        &self,
        destination: &str,
        notification: &Notification,
    ) -> Result<(), NotificationError> {
        info!(
            destination,
            receiver = %notification.receiver,
            tx_hash = %notification.transaction_hash,
            level = %notification.level,
            score = notification.score,
            emergency = notification.is_emergency,
            batched = notification.batch.as_ref().map_or(0, |b| b.operations),
            "{}",
            notification.summary
        );
        Ok(())
    }
}
