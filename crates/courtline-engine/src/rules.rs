//! Trigger rule definitions and firing conditions.
//!
//! A rule is a declarative (condition, schedule, message) triple managed by
//! academy admins. The engine only decides whether a rule is *due* at a given
//! instant; what happens on fire lives in [`crate::engine`].

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use courtline_core::audience::Audience;

/// The rule kinds the engine knows how to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    /// A subscription's end date is `offset_days` away.
    SubscriptionExpiring,
    /// A subscription ended `offset_days` ago with an outstanding balance.
    PaymentOverdue,
    /// Training session reminder on scheduled days.
    SessionReminder,
    /// Free-form announcement to a configured audience.
    CustomAnnouncement,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::SubscriptionExpiring => "subscription-expiring",
            RuleKind::PaymentOverdue => "payment-overdue",
            RuleKind::SessionReminder => "session-reminder",
            RuleKind::CustomAnnouncement => "custom-announcement",
        }
    }

    pub fn parse(s: &str) -> Option<RuleKind> {
        match s {
            "subscription-expiring" => Some(RuleKind::SubscriptionExpiring),
            "payment-overdue" => Some(RuleKind::PaymentOverdue),
            "session-reminder" => Some(RuleKind::SessionReminder),
            "custom-announcement" => Some(RuleKind::CustomAnnouncement),
            _ => None,
        }
    }

    /// Kinds whose firing condition consults domain records rather than the
    /// audience descriptor alone.
    pub fn is_condition_bearing(&self) -> bool {
        matches!(self, RuleKind::SubscriptionExpiring | RuleKind::PaymentOverdue)
    }

    /// Announcement-style kinds also fan out through the realtime hub.
    pub fn is_announcement(&self) -> bool {
        matches!(self, RuleKind::SessionReminder | RuleKind::CustomAnnouncement)
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a rule is active, independent of its send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Schedule {
    /// Active between two dates, inclusive on both ends. A missing bound is
    /// unbounded on that side.
    DateRange {
        #[serde(default)]
        start: Option<NaiveDate>,
        #[serde(default)]
        end: Option<NaiveDate>,
    },
    /// Active on the listed weekdays (lowercase English names).
    Weekdays { days: BTreeSet<String> },
    /// Active on exactly one date.
    SpecificDate { date: NaiveDate },
}

impl Schedule {
    pub fn matches(&self, today: NaiveDate) -> bool {
        match self {
            Schedule::DateRange { start, end } => {
                start.map(|s| today >= s).unwrap_or(true) && end.map(|e| today <= e).unwrap_or(true)
            }
            Schedule::Weekdays { days } => days.contains(weekday_name(today.weekday())),
            Schedule::SpecificDate { date } => today == *date,
        }
    }
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// A persisted trigger rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRule {
    pub id: String,
    pub kind: RuleKind,
    pub schedule: Schedule,
    /// Local time-of-day the rule fires, "HH:MM".
    pub send_time: String,
    /// Days before (positive, upcoming events) or after (overdue events) the
    /// reference date. Ignored for `Schedule::SpecificDate`.
    #[serde(default)]
    pub offset_days: i64,
    pub audience: Audience,
    pub message_template: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub last_fired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_fired_count: u32,
}

fn default_enabled() -> bool {
    true
}

impl TriggerRule {
    /// Whether the rule already fired on `today` in the academy timezone.
    /// At-most-once-per-day hinges on this check.
    pub fn fired_on(&self, today: NaiveDate, tz: FixedOffset) -> bool {
        self.last_fired_at
            .map(|at| at.with_timezone(&tz).date_naive() == today)
            .unwrap_or(false)
    }

    pub fn send_minute(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.send_time, "%H:%M").ok()
    }

    /// Time-based firing decision: enabled, not yet fired today, current
    /// minute equals `send_time`, and the schedule window covers today.
    /// There is no catch-up window — a missed minute stays missed until the
    /// next scheduled day.
    pub fn due(&self, now: DateTime<FixedOffset>) -> bool {
        if !self.enabled {
            return false;
        }
        let today = now.date_naive();
        if self.fired_on(today, *now.offset()) {
            return false;
        }
        let Some(send) = self.send_minute() else {
            tracing::warn!("Rule {} has unparseable send_time '{}'", self.id, self.send_time);
            return false;
        };
        if (now.hour(), now.minute()) != (send.hour(), send.minute()) {
            return false;
        }
        self.schedule.matches(today)
    }
}

/// Decode an audience column that may hold either the tagged JSON form or a
/// bare legacy token ("all", "staff", ...). Conversion happens here, at
/// ingestion — downstream code only ever sees the tagged form.
pub fn parse_audience(value: serde_json::Value) -> Audience {
    match value {
        serde_json::Value::String(token) => Audience::from_legacy(&token),
        other => serde_json::from_value(other).unwrap_or_else(|e| {
            tracing::warn!("Malformed audience descriptor, resolves to nobody: {e}");
            Audience::Roles {
                roles: BTreeSet::new(),
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use courtline_core::types::Role;

    fn riyadh() -> FixedOffset {
        FixedOffset::east_opt(3 * 3600).unwrap()
    }

    fn rule(kind: RuleKind, schedule: Schedule, send_time: &str) -> TriggerRule {
        TriggerRule {
            id: "r1".into(),
            kind,
            schedule,
            send_time: send_time.into(),
            offset_days: 3,
            audience: Audience::roles([Role::Parent]),
            message_template: "hello {parent_name}".into(),
            enabled: true,
            last_fired_at: None,
            last_fired_count: 0,
        }
    }

    // 2026-08-17 is a Monday; 09:00 in Riyadh is 06:00 UTC.
    fn monday_nine() -> DateTime<FixedOffset> {
        riyadh().with_ymd_and_hms(2026, 8, 17, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_weekday_rule_due_on_matching_minute() {
        let r = rule(
            RuleKind::SessionReminder,
            Schedule::Weekdays {
                days: BTreeSet::from(["monday".to_string()]),
            },
            "09:00",
        );
        assert!(r.due(monday_nine()));
        assert!(!r.due(monday_nine() + chrono::Duration::minutes(1)));
        assert!(!r.due(monday_nine() + chrono::Duration::days(1)));
    }

    #[test]
    fn test_empty_weekday_list_never_fires() {
        let r = rule(
            RuleKind::SessionReminder,
            Schedule::Weekdays { days: BTreeSet::new() },
            "09:00",
        );
        assert!(!r.due(monday_nine()));
    }

    #[test]
    fn test_date_range_end_is_inclusive() {
        let r = rule(
            RuleKind::SubscriptionExpiring,
            Schedule::DateRange {
                start: None,
                end: Some(NaiveDate::from_ymd_opt(2026, 8, 17).unwrap()),
            },
            "09:00",
        );
        assert!(r.due(monday_nine()));
        assert!(!r.due(monday_nine() + chrono::Duration::days(1)));
    }

    #[test]
    fn test_specific_date() {
        let r = rule(
            RuleKind::CustomAnnouncement,
            Schedule::SpecificDate {
                date: NaiveDate::from_ymd_opt(2026, 8, 17).unwrap(),
            },
            "09:00",
        );
        assert!(r.due(monday_nine()));
        assert!(!r.due(monday_nine() - chrono::Duration::days(1)));
    }

    #[test]
    fn test_already_fired_today_blocks_refire() {
        let mut r = rule(
            RuleKind::SessionReminder,
            Schedule::Weekdays {
                days: BTreeSet::from(["monday".to_string()]),
            },
            "09:00",
        );
        r.last_fired_at = Some(monday_nine().with_timezone(&Utc));
        assert!(!r.due(monday_nine()));

        // A fire recorded yesterday does not block today.
        r.last_fired_at = Some((monday_nine() - chrono::Duration::days(7)).with_timezone(&Utc));
        assert!(r.due(monday_nine()));
    }

    #[test]
    fn test_fired_on_compares_dates_in_local_timezone() {
        // 22:30 UTC is already the next day in Riyadh.
        let mut r = rule(
            RuleKind::SessionReminder,
            Schedule::DateRange { start: None, end: None },
            "01:30",
        );
        r.last_fired_at = Some(Utc.with_ymd_and_hms(2026, 8, 16, 22, 30, 0).unwrap());
        assert!(r.fired_on(NaiveDate::from_ymd_opt(2026, 8, 17).unwrap(), riyadh()));
        assert!(!r.fired_on(NaiveDate::from_ymd_opt(2026, 8, 16).unwrap(), riyadh()));
    }

    #[test]
    fn test_disabled_rule_never_due() {
        let mut r = rule(
            RuleKind::SessionReminder,
            Schedule::DateRange { start: None, end: None },
            "09:00",
        );
        r.enabled = false;
        assert!(!r.due(monday_nine()));
    }

    #[test]
    fn test_kind_wire_names_round_trip() {
        for kind in [
            RuleKind::SubscriptionExpiring,
            RuleKind::PaymentOverdue,
            RuleKind::SessionReminder,
            RuleKind::CustomAnnouncement,
        ] {
            assert_eq!(RuleKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn test_parse_audience_accepts_legacy_and_tagged() {
        assert_eq!(parse_audience(serde_json::json!("parents")), Audience::roles([Role::Parent]));
        assert_eq!(
            parse_audience(serde_json::json!({"kind": "roles", "roles": ["coach"]})),
            Audience::roles([Role::Coach])
        );
        assert_eq!(
            parse_audience(serde_json::json!(42)),
            Audience::Roles { roles: BTreeSet::new() }
        );
    }

    #[test]
    fn test_schedule_serde_round_trip() {
        let schedule = Schedule::Weekdays {
            days: BTreeSet::from(["monday".to_string(), "thursday".to_string()]),
        };
        let json = serde_json::to_string(&schedule).unwrap();
        assert!(json.contains("\"mode\":\"weekdays\""));
        let back: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(schedule, back);
    }
}
