//! # Courtline Engine
//!
//! The trigger scheduler: periodically evaluates declarative rules and, when
//! one is due, resolves its audience, composes messages, and dispatches
//! through the SMS gateway and/or the realtime hub.
//!
//! ```text
//! Ticker (coarse: daily / fine: per minute)
//!   └── DispatchEngine.tick(cadence, now)
//!         ├── TickGate: skip when the previous tick is still running
//!         ├── per enabled rule:
//!         │     ├── already fired today? → skip
//!         │     ├── send_time minute match + schedule window
//!         │     ├── domain condition (expiring/overdue records)
//!         │     ├── audience → recipients → rendered messages
//!         │     └── SmsGateway.send_bulk / Hub.broadcast
//!         └── record_fire / mark_checked (run-state persistence)
//! ```
//!
//! A rule fires at most once per calendar day in the configured timezone,
//! no matter how often the tickers run.

pub mod clock;
pub mod engine;
pub mod rules;
pub mod store;

pub use clock::{Cadence, TickGate};
pub use engine::{spawn_ticker, DispatchEngine, InMemoryDirectory, SnapshotSource, TickReport};
pub use rules::{RuleKind, Schedule, TriggerRule};
pub use store::{MemoryRuleStore, MessageRecord, RuleStore, SqliteRuleStore};
