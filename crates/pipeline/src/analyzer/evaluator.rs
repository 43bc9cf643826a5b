use std::time::Duration;

use async_trait::async_trait;
use chainwatch_domain::{AddressProfile, NormalizedEvent};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of an external scorer (ML model, pattern analyzer, MEV detector).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorOutput {
    pub score: f64,
    #[serde(default)]
    pub factors: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

impl EvaluatorOutput {
    pub fn neutral() -> Self {
        Self {
            score: 0.0,
            factors: Vec::new(),
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvaluatorError {
    #[error("evaluator request failed: {0}")]
    Request(String),
    #[error("evaluator returned status {0}")]
    Status(u16),
    #[error("invalid evaluator response: {0}")]
    Decode(String),
}

/// Pluggable black-box scorer consumed by the risk analyzer.
#[async_trait]
pub trait RiskEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        event: &NormalizedEvent,
        profile: &AddressProfile,
    ) -> Result<EvaluatorOutput, EvaluatorError>;
}

/// Stand-in used when no external model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeutralEvaluator;

#[async_trait]
impl RiskEvaluator for NeutralEvaluator {
    async fn evaluate(
        &self,
        _event: &NormalizedEvent,
        _profile: &AddressProfile,
    ) -> Result<EvaluatorOutput, EvaluatorError> {
        Ok(EvaluatorOutput::neutral())
    }
}

#[derive(Serialize)]
struct EvaluationRequest<'a> {
    event: &'a NormalizedEvent,
    profile: &'a AddressProfile,
}

/// POSTs `{event, profile}` to an external model endpoint and expects
/// `{score, factors, confidence}` back.
pub struct HttpEvaluator {
    client: reqwest::Client,
    url: String,
}

impl HttpEvaluator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, EvaluatorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| EvaluatorError::Request(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RiskEvaluator for HttpEvaluator {
    async fn evaluate(
        &self,
        event: &NormalizedEvent,
        profile: &AddressProfile,
    ) -> Result<EvaluatorOutput, EvaluatorError> {
        let response = self
            .client
            .post(&self.url)
            .json(&EvaluationRequest { event, profile })
            .send()
            .await
            .map_err(|err| EvaluatorError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EvaluatorError::Status(status.as_u16()));
        }

        response
            .json::<EvaluatorOutput>()
            .await
            .map_err(|err| EvaluatorError::Decode(err.to_string()))
    }
}
