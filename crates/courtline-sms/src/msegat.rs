//! Msegat SMS gateway adapter.
//!
//! JSON POST with username/apiKey credentials. Msegat reports outcomes as a
//! numeric code in a 200 response, so status normalization happens on the
//! response body rather than the HTTP status.

use async_trait::async_trait;
use courtline_core::config::MsegatConfig;
use courtline_core::error::{CourtlineError, Result};

use crate::provider::SmsProvider;

const API_URL: &str = "https://www.msegat.com/gw/sendsms.php";
const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

pub struct MsegatProvider {
    config: MsegatConfig,
    sender: String,
    client: reqwest::Client,
}

impl MsegatProvider {
    pub fn new(config: MsegatConfig, sender: String) -> Result<Self> {
        if config.username.is_empty() || config.api_key.is_empty() {
            return Err(CourtlineError::config("Msegat username/api_key not configured"));
        }
        Ok(Self {
            config,
            sender,
            client: reqwest::Client::new(),
        })
    }

    /// Map Msegat result codes onto the error taxonomy.
    fn classify(code: &str, message: &str) -> Result<()> {
        match code {
            "1" | "M0000" => Ok(()),
            // Credentials / account problems — fatal, never retried
            "1020" | "1050" | "1110" => Err(CourtlineError::config(format!(
                "Msegat credentials rejected ({code}): {message}"
            ))),
            // Bad recipient or sender name — hard rejection
            "1060" | "1064" | "M0002" => Err(CourtlineError::rejected(format!(
                "Msegat rejected recipient ({code}): {message}"
            ))),
            other => Err(CourtlineError::provider(format!(
                "Msegat error ({other}): {message}"
            ))),
        }
    }
}

#[async_trait]
impl SmsProvider for MsegatProvider {
    fn id(&self) -> &str {
        "msegat"
    }

    async fn send(&self, to: &str, body: &str) -> Result<()> {
        let payload = serde_json::json!({
            "userName": self.config.username,
            "apiKey": self.config.api_key,
            "userSender": self.sender,
            "numbers": to,
            "msg": body,
        });

        let response = self
            .client
            .post(API_URL)
            .json(&payload)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await
            .map_err(|e| CourtlineError::provider(format!("Msegat request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(CourtlineError::provider(format!("Msegat error {status}: {detail}")));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CourtlineError::provider(format!("Invalid Msegat response: {e}")))?;

        let code = result["code"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| result["code"].to_string());
        let message = result["message"].as_str().unwrap_or("").to_string();
        Self::classify(&code, &message)
    }
}
