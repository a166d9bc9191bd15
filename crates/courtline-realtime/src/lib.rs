//! # Courtline Realtime
//!
//! Room-based broadcast hub and the WebSocket/HTTP gateway around it.
//!
//! Room naming is a wire contract shared with every client build:
//! `role-{role}`, `branch-{branchId}`, `role-{role}-branch-{branchId}`,
//! `user-{userId}`, plus the feature rooms `attendance-updates` and
//! `schedule-updates`. Delivery is best-effort fire-and-forget: clients
//! must be connected and joined at broadcast time.

pub mod hub;
pub mod server;
pub mod ws;

pub use hub::{ClientIdentity, Hub, ATTENDANCE_ROOM, GLOBAL_ROOM, SCHEDULE_ROOM};
pub use server::{build_router, AppState};
