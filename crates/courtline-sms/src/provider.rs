//! The `SmsProvider` seam and gateway construction from config.
//!
//! Each adapter is responsible only for request/response translation and
//! status normalization; failover lives in the gateway and stays
//! provider-agnostic.

use std::sync::Arc;

use async_trait::async_trait;
use courtline_core::config::SmsConfig;
use courtline_core::error::{CourtlineError, Result};

use crate::gateway::SmsGateway;
use crate::msegat::MsegatProvider;
use crate::taqnyat::TaqnyatProvider;

/// One concrete SMS gateway vendor.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Provider id as configured ("taqnyat", "msegat").
    fn id(&self) -> &str;

    /// Whether the vendor exposes a native multi-recipient call.
    fn supports_bulk(&self) -> bool {
        false
    }

    /// Send one message to one canonical-format number.
    async fn send(&self, to: &str, body: &str) -> Result<()>;

    /// Send one body to many recipients in a single provider request.
    /// Only called when `supports_bulk()` is true.
    async fn send_batch(&self, to: &[String], body: &str) -> Result<()> {
        let _ = (to, body);
        Err(CourtlineError::provider(format!(
            "{} has no native bulk call",
            self.id()
        )))
    }
}

/// Build a provider adapter by id from the SMS config section.
pub fn build_provider(id: &str, config: &SmsConfig) -> Result<Arc<dyn SmsProvider>> {
    match id {
        "taqnyat" => {
            let creds = config.taqnyat.as_ref().ok_or_else(|| {
                CourtlineError::config("taqnyat selected but [sms.taqnyat] is not configured")
            })?;
            Ok(Arc::new(TaqnyatProvider::new(creds.clone(), config.sender.clone())?))
        }
        "msegat" => {
            let creds = config.msegat.as_ref().ok_or_else(|| {
                CourtlineError::config("msegat selected but [sms.msegat] is not configured")
            })?;
            Ok(Arc::new(MsegatProvider::new(creds.clone(), config.sender.clone())?))
        }
        other => Err(CourtlineError::config(format!("unknown SMS provider '{other}'"))),
    }
}

/// Build the failover gateway from config: active provider plus an optional
/// distinct fallback.
pub fn build_gateway(config: &SmsConfig) -> Result<SmsGateway> {
    let primary = build_provider(&config.active_provider, config)?;
    let fallback = match &config.fallback_provider {
        Some(id) if id == &config.active_provider => {
            tracing::warn!("Fallback provider equals primary ('{id}'), ignoring");
            None
        }
        Some(id) => Some(build_provider(id, config)?),
        None => None,
    };
    Ok(SmsGateway::new(
        primary,
        fallback,
        config.country_code.clone(),
        config.per_segment_rate,
        std::time::Duration::from_millis(config.pacing_millis),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtline_core::config::{MsegatConfig, TaqnyatConfig};

    fn config_with_both() -> SmsConfig {
        SmsConfig {
            active_provider: "taqnyat".into(),
            fallback_provider: Some("msegat".into()),
            taqnyat: Some(TaqnyatConfig { bearer_token: "tok".into() }),
            msegat: Some(MsegatConfig { username: "academy".into(), api_key: "key".into() }),
            ..SmsConfig::default()
        }
    }

    #[test]
    fn test_build_gateway_with_fallback() {
        let gateway = build_gateway(&config_with_both()).unwrap();
        assert!(gateway.has_fallback());
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        let config = SmsConfig::default(); // taqnyat selected, no creds
        let err = build_gateway(&config).err().expect("gateway built without credentials");
        assert!(matches!(err, CourtlineError::Config(_)));
    }

    #[test]
    fn test_same_fallback_ignored() {
        let mut config = config_with_both();
        config.fallback_provider = Some("taqnyat".into());
        let gateway = build_gateway(&config).unwrap();
        assert!(!gateway.has_fallback());
    }
}
