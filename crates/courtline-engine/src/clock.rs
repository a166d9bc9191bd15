//! Tick cadences and the overlapping-tick guard.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime, Timelike};

use crate::rules::RuleKind;

/// The two evaluation cadences. Slow-moving rule kinds only need the daily
/// pass; announcement-style rules need minute resolution on `send_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Once daily at the configured time.
    Coarse,
    /// Once per minute.
    Fine,
}

impl Cadence {
    pub fn kinds(&self) -> &'static [RuleKind] {
        match self {
            Cadence::Coarse => &[RuleKind::SubscriptionExpiring, RuleKind::PaymentOverdue],
            Cadence::Fine => &[RuleKind::SessionReminder, RuleKind::CustomAnnouncement],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Coarse => "coarse",
            Cadence::Fine => "fine",
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Idle,
    Running,
}

/// Test-and-set guard against overlapping ticks on one cadence.
///
/// A tick that finds the gate `Running` is skipped entirely, never queued.
/// The permit releases the gate on drop, so an evaluation pass that errors
/// or panics still frees the gate for the next tick.
pub struct TickGate {
    state: Mutex<GateState>,
}

impl TickGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Idle),
        }
    }

    pub fn try_acquire(&self) -> Option<TickPermit<'_>> {
        let mut state = self.state.lock().expect("gate lock poisoned");
        match *state {
            GateState::Running => None,
            GateState::Idle => {
                *state = GateState::Running;
                Some(TickPermit { gate: self })
            }
        }
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock().expect("gate lock poisoned") == GateState::Running
    }
}

impl Default for TickGate {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle for one in-flight tick.
pub struct TickPermit<'a> {
    gate: &'a TickGate,
}

impl Drop for TickPermit<'_> {
    fn drop(&mut self) {
        *self.gate.state.lock().expect("gate lock poisoned") = GateState::Idle;
    }
}

/// Delay from `now` until the next occurrence of `target` local time.
/// Used to align the daily ticker with the configured send hour.
pub fn until_next(now: DateTime<FixedOffset>, target: NaiveTime) -> Duration {
    let today_target = now
        .date_naive()
        .and_time(target)
        .and_local_timezone(*now.offset())
        .single();
    let next = match today_target {
        Some(t) if t > now => t,
        // Target already passed (or ambiguous): tomorrow.
        _ => (now + chrono::Duration::days(1))
            .date_naive()
            .and_time(target)
            .and_local_timezone(*now.offset())
            .single()
            .unwrap_or(now + chrono::Duration::days(1)),
    };
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Delay from `now` until the next whole minute, so the fine ticker
/// evaluates `send_time` on minute boundaries.
pub fn until_next_minute(now: DateTime<FixedOffset>) -> Duration {
    let into_minute = now.second() as u64 * 1000 + now.timestamp_subsec_millis() as u64;
    Duration::from_millis(60_000u64.saturating_sub(into_minute) % 60_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_gate_skips_while_running() {
        let gate = TickGate::new();
        let permit = gate.try_acquire().expect("idle gate acquires");
        assert!(gate.is_running());
        assert!(gate.try_acquire().is_none());
        drop(permit);
        assert!(!gate.is_running());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_until_next_same_day() {
        let tz = FixedOffset::east_opt(3 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 8, 17, 7, 30, 0).unwrap();
        let target = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert_eq!(until_next(now, target), Duration::from_secs(90 * 60));
    }

    #[test]
    fn test_until_next_rolls_to_tomorrow() {
        let tz = FixedOffset::east_opt(3 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 8, 17, 9, 0, 0).unwrap();
        let target = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        // Exactly at the target counts as passed.
        assert_eq!(until_next(now, target), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_until_next_minute() {
        let tz = FixedOffset::east_opt(3 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 8, 17, 9, 0, 45).unwrap();
        assert_eq!(until_next_minute(now), Duration::from_secs(15));

        let on_boundary = tz.with_ymd_and_hms(2026, 8, 17, 9, 1, 0).unwrap();
        assert_eq!(until_next_minute(on_boundary), Duration::ZERO);
    }
}
