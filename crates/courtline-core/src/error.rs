//! Unified error types for Courtline.

use thiserror::Error;

/// Result type alias using CourtlineError.
pub type Result<T> = std::result::Result<T, CourtlineError>;

#[derive(Error, Debug)]
pub enum CourtlineError {
    // Configuration errors — fatal for the operation, never retried
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Provider errors — transient, eligible for the fallback path
    #[error("Provider error: {0}")]
    Provider(String),

    // Hard per-recipient rejection (invalid number, blocked sender)
    #[error("Recipient rejected: {0}")]
    Rejected(String),

    // Both the primary and (if configured) fallback provider failed
    #[error("Delivery failed (primary: {primary}, fallback: {})", .fallback.as_deref().unwrap_or("not configured"))]
    DeliveryFailed {
        primary: String,
        fallback: Option<String>,
    },

    // Rule run-state store errors
    #[error("Store error: {0}")]
    Store(String),

    // Realtime channel errors
    #[error("Channel error: {0}")]
    Channel(String),

    // Inbound webhook/callback authenticity failures
    #[error("Signature verification failed: {0}")]
    Signature(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl CourtlineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    /// Whether this failure class should trigger the fallback provider.
    /// Configuration errors and hard rejections are not retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Provider(_) | Self::Io(_))
    }
}
