//! # Courtline Core
//!
//! Shared foundation for the Courtline notification dispatch engine:
//! - Unified error types and `Result` alias
//! - TOML configuration (providers, cadences, timezone)
//! - Domain snapshot types (users, players, subscriptions)
//! - Audience descriptors and recipient resolution
//! - Message template rendering

pub mod audience;
pub mod config;
pub mod error;
pub mod template;
pub mod types;

pub use audience::{resolve, Audience, Recipient};
pub use config::CourtlineConfig;
pub use error::{CourtlineError, Result};
pub use types::{PlayerRecord, Role, Snapshot, SubscriptionRecord, UserRecord};
