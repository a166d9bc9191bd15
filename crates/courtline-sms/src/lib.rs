//! # Courtline SMS
//!
//! The delivery channel abstraction: phone normalization, per-vendor
//! adapters, and the failover gateway.
//!
//! ```text
//! SmsGateway.send(address, body)
//!   ├── normalize to international format
//!   ├── primary provider (Taqnyat / Msegat)
//!   └── on transient failure → fallback provider (tagged fallback=true)
//!
//! SmsGateway.send_bulk(messages)
//!   ├── identical bodies + bulk-capable primary → 1 native call per ≤1000 recipients
//!   └── otherwise → sequential sends with pacing when batch > 10
//! ```

pub mod gateway;
pub mod msegat;
pub mod phone;
pub mod provider;
pub mod taqnyat;
pub mod webhook;

pub use gateway::{BatchResult, DeliveryAttempt, OutboundSms, SmsGateway};
pub use provider::{build_gateway, SmsProvider};
pub use webhook::{parse_status, verify_signature, DeliveryStatus};
