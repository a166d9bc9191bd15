//! Taqnyat SMS gateway adapter.
//!
//! REST API with a bearer token; supports a native multi-recipient call
//! (recipients array on one request).

use async_trait::async_trait;
use courtline_core::config::TaqnyatConfig;
use courtline_core::error::{CourtlineError, Result};

use crate::provider::SmsProvider;

const API_URL: &str = "https://api.taqnyat.sa/v1/messages";
const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

pub struct TaqnyatProvider {
    config: TaqnyatConfig,
    sender: String,
    client: reqwest::Client,
}

impl TaqnyatProvider {
    pub fn new(config: TaqnyatConfig, sender: String) -> Result<Self> {
        if config.bearer_token.is_empty() {
            return Err(CourtlineError::config("Taqnyat bearer_token not configured"));
        }
        Ok(Self {
            config,
            sender,
            client: reqwest::Client::new(),
        })
    }

    async fn post(&self, recipients: &[String], body: &str) -> Result<()> {
        let payload = serde_json::json!({
            "recipients": recipients,
            "body": body,
            "sender": self.sender,
        });

        let response = self
            .client
            .post(API_URL)
            .header("Authorization", format!("Bearer {}", self.config.bearer_token))
            .json(&payload)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await
            .map_err(|e| CourtlineError::provider(format!("Taqnyat request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("Taqnyat accepted {} recipient(s)", recipients.len());
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(CourtlineError::config(format!(
                "Taqnyat rejected credentials: {detail}"
            ))),
            400 | 412 | 422 => Err(CourtlineError::rejected(format!(
                "Taqnyat rejected message: {detail}"
            ))),
            _ => Err(CourtlineError::provider(format!(
                "Taqnyat error {status}: {detail}"
            ))),
        }
    }
}

#[async_trait]
impl SmsProvider for TaqnyatProvider {
    fn id(&self) -> &str {
        "taqnyat"
    }

    fn supports_bulk(&self) -> bool {
        true
    }

    async fn send(&self, to: &str, body: &str) -> Result<()> {
        let recipients = [to.to_string()];
        self.post(&recipients, body).await
    }

    async fn send_batch(&self, to: &[String], body: &str) -> Result<()> {
        self.post(to, body).await
    }
}
