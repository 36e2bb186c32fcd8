//! Penalty trigger.
//!
//! The engine never talks to a payment API. On every terminal outcome it
//! emits one [`PenaltyNotice`]; whoever receives it decides what money moves.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::commitment::Outcome;
use crate::error::PenaltyError;

/// Notice sent once per terminal outcome. `is_success: true` carries no
/// monetary effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PenaltyNotice {
    pub commitment_id: String,
    pub displacement_meters: f64,
    pub is_success: bool,
}

impl PenaltyNotice {
    pub fn from_outcome(commitment_id: &str, outcome: &Outcome) -> Self {
        Self {
            commitment_id: commitment_id.to_string(),
            displacement_meters: outcome.displacement_meters(),
            is_success: outcome.is_success(),
        }
    }
}

/// Receiver of penalty notices.
#[async_trait]
pub trait PenaltyTrigger: Send + Sync {
    /// Identifier used in logs (e.g. "webhook", "log").
    fn name(&self) -> &str;

    async fn emit(&self, notice: &PenaltyNotice) -> Result<(), PenaltyError>;
}

/// Penalty delivery settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// Endpoint receiving notices as JSON. Notices are only logged when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

/// Trigger described by `config`.
///
/// # Errors
///
/// Returns an error if the webhook URL is invalid or the HTTP client cannot be built.
pub fn trigger_from_config(config: &PenaltyConfig) -> Result<Arc<dyn PenaltyTrigger>, PenaltyError> {
    match config.webhook_url.as_deref() {
        Some(url) => {
            let timeout = Duration::from_secs(config.timeout_secs.max(1));
            Ok(Arc::new(WebhookPenaltyTrigger::new(url, timeout)?))
        }
        None => Ok(Arc::new(LogPenaltyTrigger)),
    }
}

/// Records notices in the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPenaltyTrigger;

#[async_trait]
impl PenaltyTrigger for LogPenaltyTrigger {
    fn name(&self) -> &str {
        "log"
    }

    async fn emit(&self, notice: &PenaltyNotice) -> Result<(), PenaltyError> {
        info!(
            commitment_id = %notice.commitment_id,
            displacement_m = notice.displacement_meters,
            is_success = notice.is_success,
            "penalty notice"
        );
        Ok(())
    }
}

/// POSTs each notice as JSON to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct WebhookPenaltyTrigger {
    client: reqwest::Client,
    url: url::Url,
}

impl WebhookPenaltyTrigger {
    /// # Errors
    ///
    /// Returns an error if `url` does not parse or the client cannot be built.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, PenaltyError> {
        let url = url::Url::parse(url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }
}

#[async_trait]
impl PenaltyTrigger for WebhookPenaltyTrigger {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn emit(&self, notice: &PenaltyNotice) -> Result<(), PenaltyError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(notice)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PenaltyError::Rejected {
                status: status.as_u16(),
            });
        }
        info!(
            commitment_id = %notice.commitment_id,
            is_success = notice.is_success,
            "penalty notice delivered"
        );
        Ok(())
    }
}
