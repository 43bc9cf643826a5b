use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chainwatch_domain::MonitoringConfig;
use serde_json::{json, Value};
use strum_macros::{AsRefStr, Display};

use super::MonitorError;

/// Chat-ops flavours with their own payload envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum WebhookKind {
    Slack,
    DingTalk,
    Feishu,
}

impl WebhookKind {
    pub fn payload(self, text: &str) -> Value {
        match self {
            WebhookKind::Slack => json!({ "text": text }),
            WebhookKind::DingTalk => json!({ "msgtype": "text", "text": { "content": text } }),
            WebhookKind::Feishu => json!({ "msg_type": "text", "content": { "text": text } }),
        }
    }
}

/// One independently configured alert destination.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, message: &str) -> Result<(), MonitorError>;
}

pub struct WebhookSink {
    kind: WebhookKind,
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(kind: WebhookKind, url: impl Into<String>, timeout: Duration) -> Result<Self, MonitorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| MonitorError::Webhook {
                sink: kind.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            kind,
            url: url.into(),
            client,
        })
    }

    /// Builds a sink for every webhook URL present in `config`.
    pub fn from_config(config: &MonitoringConfig) -> Result<Vec<Arc<dyn AlertSink>>, MonitorError> {
        let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();
        for (kind, url) in [
            (WebhookKind::Slack, &config.webhooks.slack),
            (WebhookKind::DingTalk, &config.webhooks.dingtalk),
            (WebhookKind::Feishu, &config.webhooks.feishu),
        ] {
            if let Some(url) = url {
                sinks.push(Arc::new(Self::new(kind, url.clone(), config.webhook_timeout)?));
            }
        }
        Ok(sinks)
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        self.kind.as_ref()
    }

    async fn send(&self, message: &str) -> Result<(), MonitorError> {
        let response = self
            .client
            .post(&self.url)
            .json(&self.kind.payload(message))
            .send()
            .await
            .map_err(|err| MonitorError::Webhook {
                sink: self.kind.to_string(),
                reason: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(MonitorError::Webhook {
                sink: self.kind.to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        Ok(())
    }
}
