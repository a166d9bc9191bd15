//! Inbound delivery-status callbacks from SMS providers.
//!
//! Providers POST status updates back to the gateway. The payload is only
//! trusted after its HMAC-SHA256 signature (hex, over the raw body) checks
//! out against the shared secret; a bad signature is rejected outright with
//! no retry and no state mutation.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use courtline_core::error::{CourtlineError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Provider-reported delivery status for one message.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryStatus {
    pub message_id: String,
    pub address: String,
    /// Provider vocabulary, e.g. "delivered", "failed", "expired".
    pub status: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Verify the callback signature over the raw request body.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(signature) = decode_hex(signature_hex.trim()) else {
        return false;
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// Parse a verified status callback body.
pub fn parse_status(body: &[u8]) -> Result<DeliveryStatus> {
    serde_json::from_slice(body)
        .map_err(|e| CourtlineError::channel(format!("Malformed status callback: {e}")))
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    // Only ASCII hex digits are slicable in byte pairs; anything else is an
    // invalid signature, not a panic.
    if !s.is_ascii() || s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
