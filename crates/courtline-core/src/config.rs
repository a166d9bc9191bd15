//! Courtline configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CourtlineError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourtlineConfig {
    /// Fixed UTC offset of the academy's timezone in hours.
    /// Asia/Riyadh is UTC+3 with no DST.
    #[serde(default = "default_tz_offset")]
    pub timezone_offset_hours: i32,
    #[serde(default)]
    pub sms: SmsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_tz_offset() -> i32 {
    3
}

impl Default for CourtlineConfig {
    fn default() -> Self {
        Self {
            timezone_offset_hours: default_tz_offset(),
            sms: SmsConfig::default(),
            scheduler: SchedulerConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl CourtlineConfig {
    /// Load config from the default path (~/.courtline/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CourtlineError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CourtlineError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CourtlineError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Courtline home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".courtline")
    }

    /// The academy timezone as a chrono offset.
    pub fn timezone(&self) -> chrono::FixedOffset {
        chrono::FixedOffset::east_opt(self.timezone_offset_hours * 3600)
            .unwrap_or_else(|| chrono::FixedOffset::east_opt(0).expect("zero offset is valid"))
    }
}

/// SMS delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    /// Primary provider id: "taqnyat" or "msegat".
    #[serde(default = "default_provider")]
    pub active_provider: String,
    /// Optional distinct fallback provider id.
    #[serde(default)]
    pub fallback_provider: Option<String>,
    /// Registered sender identity.
    #[serde(default = "default_sender")]
    pub sender: String,
    /// Country calling code enforced during normalization.
    #[serde(default = "default_country_code")]
    pub country_code: String,
    /// Cost per message segment, in the provider's billing currency.
    #[serde(default = "default_segment_rate")]
    pub per_segment_rate: f64,
    /// Delay between sequential sends in large batches.
    #[serde(default = "default_pacing_millis")]
    pub pacing_millis: u64,
    /// Shared secret for verifying provider delivery-status callbacks.
    #[serde(default)]
    pub status_secret: String,
    #[serde(default)]
    pub taqnyat: Option<TaqnyatConfig>,
    #[serde(default)]
    pub msegat: Option<MsegatConfig>,
}

fn default_provider() -> String {
    "taqnyat".into()
}
fn default_sender() -> String {
    "COURTLINE".into()
}
fn default_country_code() -> String {
    "966".into()
}
fn default_segment_rate() -> f64 {
    0.05
}
fn default_pacing_millis() -> u64 {
    150
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            active_provider: default_provider(),
            fallback_provider: None,
            sender: default_sender(),
            country_code: default_country_code(),
            per_segment_rate: default_segment_rate(),
            pacing_millis: default_pacing_millis(),
            status_secret: String::new(),
            taqnyat: None,
            msegat: None,
        }
    }
}

/// Taqnyat gateway credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaqnyatConfig {
    pub bearer_token: String,
}

/// Msegat gateway credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsegatConfig {
    pub username: String,
    pub api_key: String,
}

/// Trigger scheduler cadences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Local time-of-day for the coarse (daily) tick, "HH:MM".
    #[serde(default = "default_daily_time")]
    pub daily_time: String,
    /// Fine cadence period for announcement-style rules.
    #[serde(default = "default_fine_interval")]
    pub fine_interval_secs: u64,
    /// Rule run-state database path.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_daily_time() -> String {
    "09:00".into()
}
fn default_fine_interval() -> u64 {
    60
}
fn default_db_path() -> String {
    "~/.courtline/engine.db".into()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_time: default_daily_time(),
            fine_interval_secs: default_fine_interval(),
            db_path: default_db_path(),
        }
    }
}

/// Realtime gateway server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8090
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CourtlineConfig::default();
        assert_eq!(config.timezone_offset_hours, 3);
        assert_eq!(config.scheduler.daily_time, "09:00");
        assert_eq!(config.scheduler.fine_interval_secs, 60);
        assert_eq!(config.sms.country_code, "966");
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
            [sms]
            active_provider = "msegat"
            fallback_provider = "taqnyat"

            [sms.msegat]
            username = "academy"
            api_key = "secret"
        "#;
        let config: CourtlineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.sms.active_provider, "msegat");
        assert_eq!(config.sms.fallback_provider.as_deref(), Some("taqnyat"));
        assert_eq!(config.sms.sender, "COURTLINE");
        assert!(config.sms.msegat.is_some());
    }

    #[test]
    fn test_timezone_offset() {
        let config = CourtlineConfig::default();
        let tz = config.timezone();
        assert_eq!(tz.local_minus_utc(), 3 * 3600);
    }
}
