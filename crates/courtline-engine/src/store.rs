//! Rule run-state persistence.
//!
//! The engine owns only run-state (last fire, message log); rule definitions
//! are admin-edited rows it reads back each tick. SQLite keeps the single
//! scheduler instance self-contained with no external database to stand up.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use courtline_core::error::{CourtlineError, Result};

use crate::rules::{parse_audience, RuleKind, Schedule, TriggerRule};

/// A row in the sent-message log, written once per rule fire.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    pub rule_id: String,
    pub kind: RuleKind,
    pub body: String,
    pub recipients: u32,
    pub cost: f64,
    pub sent_at: DateTime<Utc>,
}

/// Storage seam between the engine and its rule rows.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Enabled rules of the given kinds.
    async fn load_enabled(&self, kinds: &[RuleKind]) -> Result<Vec<TriggerRule>>;
    /// Record a successful fire: stamp `last_fired_at`, add to the
    /// cumulative recipient count.
    async fn record_fire(&self, id: &str, at: DateTime<Utc>, recipients: u32) -> Result<()>;
    /// Stamp `last_fired_at` without counting recipients — used when a
    /// condition-bearing rule matched its minute but found no records, so it
    /// is not re-evaluated again the same day.
    async fn mark_checked(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
    async fn upsert(&self, rule: &TriggerRule) -> Result<()>;
    async fn log_message(&self, record: &MessageRecord) -> Result<()>;
}

/// SQLite-backed store. All access funnels through one connection behind a
/// mutex; tick volume is a handful of statements per minute.
pub struct SqliteRuleStore {
    conn: Mutex<Connection>,
}

impl SqliteRuleStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| CourtlineError::store(format!("Failed to open {}: {e}", path.display())))?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, handy for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CourtlineError::store(format!("Failed to open in-memory db: {e}")))?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS trigger_rules (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                schedule TEXT NOT NULL,
                send_time TEXT NOT NULL,
                offset_days INTEGER NOT NULL DEFAULT 0,
                audience TEXT NOT NULL,
                message_template TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                last_fired_at TEXT,
                last_fired_count INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS sent_messages (
                id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                body TEXT NOT NULL,
                recipients INTEGER NOT NULL,
                cost REAL NOT NULL,
                sent_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sent_messages_rule ON sent_messages(rule_id);
            "#,
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<TriggerRule> {
        let kind_str: String = row.get("kind")?;
        let schedule_json: String = row.get("schedule")?;
        let audience_json: String = row.get("audience")?;
        let last_fired_at: Option<String> = row.get("last_fired_at")?;

        let kind = RuleKind::parse(&kind_str).unwrap_or_else(|| {
            tracing::warn!("Unknown rule kind '{kind_str}', treating as custom announcement");
            RuleKind::CustomAnnouncement
        });
        let schedule: Schedule = serde_json::from_str(&schedule_json).unwrap_or_else(|e| {
            tracing::warn!("Malformed schedule, rule will never match: {e}");
            Schedule::Weekdays {
                days: Default::default(),
            }
        });
        // The audience column may still hold a bare legacy token from old
        // rows; conversion to the tagged form happens here, once.
        let audience_value: serde_json::Value =
            serde_json::from_str(&audience_json).unwrap_or(serde_json::Value::Null);
        let audience = parse_audience(audience_value);

        Ok(TriggerRule {
            id: row.get("id")?,
            kind,
            schedule,
            send_time: row.get("send_time")?,
            offset_days: row.get("offset_days")?,
            audience,
            message_template: row.get("message_template")?,
            enabled: row.get::<_, i64>("enabled")? != 0,
            last_fired_at: last_fired_at.and_then(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .ok()
            }),
            last_fired_count: row.get("last_fired_count")?,
        })
    }
}

fn store_err(e: rusqlite::Error) -> CourtlineError {
    CourtlineError::store(e.to_string())
}

#[async_trait]
impl RuleStore for SqliteRuleStore {
    async fn load_enabled(&self, kinds: &[RuleKind]) -> Result<Vec<TriggerRule>> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn
            .prepare("SELECT * FROM trigger_rules WHERE enabled = 1")
            .map_err(store_err)?;
        let rules = stmt
            .query_map([], Self::row_to_rule)
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(rules.into_iter().filter(|r| kinds.contains(&r.kind)).collect())
    }

    async fn record_fire(&self, id: &str, at: DateTime<Utc>, recipients: u32) -> Result<()> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "UPDATE trigger_rules
             SET last_fired_at = ?1, last_fired_count = last_fired_count + ?2
             WHERE id = ?3",
            params![at.to_rfc3339(), recipients, id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn mark_checked(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "UPDATE trigger_rules SET last_fired_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn upsert(&self, rule: &TriggerRule) -> Result<()> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "INSERT INTO trigger_rules
               (id, kind, schedule, send_time, offset_days, audience,
                message_template, enabled, last_fired_at, last_fired_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
               kind = excluded.kind,
               schedule = excluded.schedule,
               send_time = excluded.send_time,
               offset_days = excluded.offset_days,
               audience = excluded.audience,
               message_template = excluded.message_template,
               enabled = excluded.enabled,
               last_fired_at = excluded.last_fired_at,
               last_fired_count = excluded.last_fired_count",
            params![
                rule.id,
                rule.kind.as_str(),
                serde_json::to_string(&rule.schedule)?,
                rule.send_time,
                rule.offset_days,
                serde_json::to_string(&rule.audience)?,
                rule.message_template,
                rule.enabled as i64,
                rule.last_fired_at.map(|t| t.to_rfc3339()),
                rule.last_fired_count,
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn log_message(&self, record: &MessageRecord) -> Result<()> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "INSERT INTO sent_messages (id, rule_id, kind, body, recipients, cost, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.rule_id,
                record.kind.as_str(),
                record.body,
                record.recipients,
                record.cost,
                record.sent_at.to_rfc3339(),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }
}

/// In-memory store for engine tests.
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: Mutex<HashMap<String, TriggerRule>>,
    messages: Mutex<Vec<MessageRecord>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<TriggerRule> {
        self.rules.lock().expect("store lock poisoned").get(id).cloned()
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.messages.lock().expect("store lock poisoned").clone()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn load_enabled(&self, kinds: &[RuleKind]) -> Result<Vec<TriggerRule>> {
        let rules = self.rules.lock().expect("store lock poisoned");
        let mut out: Vec<TriggerRule> = rules
            .values()
            .filter(|r| r.enabled && kinds.contains(&r.kind))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn record_fire(&self, id: &str, at: DateTime<Utc>, recipients: u32) -> Result<()> {
        let mut rules = self.rules.lock().expect("store lock poisoned");
        if let Some(rule) = rules.get_mut(id) {
            rule.last_fired_at = Some(at);
            rule.last_fired_count += recipients;
        }
        Ok(())
    }

    async fn mark_checked(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut rules = self.rules.lock().expect("store lock poisoned");
        if let Some(rule) = rules.get_mut(id) {
            rule.last_fired_at = Some(at);
        }
        Ok(())
    }

    async fn upsert(&self, rule: &TriggerRule) -> Result<()> {
        self.rules
            .lock()
            .expect("store lock poisoned")
            .insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn log_message(&self, record: &MessageRecord) -> Result<()> {
        self.messages.lock().expect("store lock poisoned").push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtline_core::audience::Audience;
    use courtline_core::types::Role;

    fn sample_rule(id: &str) -> TriggerRule {
        TriggerRule {
            id: id.into(),
            kind: RuleKind::SubscriptionExpiring,
            schedule: Schedule::DateRange { start: None, end: None },
            send_time: "09:00".into(),
            offset_days: 3,
            audience: Audience::roles([Role::Parent]),
            message_template: "{parent_name}: {days} days left".into(),
            enabled: true,
            last_fired_at: None,
            last_fired_count: 0,
        }
    }

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let store = SqliteRuleStore::open_in_memory().unwrap();
        store.upsert(&sample_rule("r1")).await.unwrap();

        let rules = store
            .load_enabled(&[RuleKind::SubscriptionExpiring])
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].send_time, "09:00");
        assert_eq!(rules[0].audience, Audience::roles([Role::Parent]));
        assert!(rules[0].last_fired_at.is_none());
    }

    #[tokio::test]
    async fn test_load_filters_by_kind_and_enabled() {
        let store = SqliteRuleStore::open_in_memory().unwrap();
        store.upsert(&sample_rule("r1")).await.unwrap();
        let mut announcement = sample_rule("r2");
        announcement.kind = RuleKind::CustomAnnouncement;
        store.upsert(&announcement).await.unwrap();
        let mut disabled = sample_rule("r3");
        disabled.enabled = false;
        store.upsert(&disabled).await.unwrap();

        let coarse = store
            .load_enabled(&[RuleKind::SubscriptionExpiring, RuleKind::PaymentOverdue])
            .await
            .unwrap();
        assert_eq!(coarse.len(), 1);
        assert_eq!(coarse[0].id, "r1");
    }

    #[tokio::test]
    async fn test_record_fire_accumulates_count() {
        let store = SqliteRuleStore::open_in_memory().unwrap();
        store.upsert(&sample_rule("r1")).await.unwrap();

        let now = Utc::now();
        store.record_fire("r1", now, 5).await.unwrap();
        store.record_fire("r1", now, 3).await.unwrap();

        let rules = store
            .load_enabled(&[RuleKind::SubscriptionExpiring])
            .await
            .unwrap();
        assert_eq!(rules[0].last_fired_count, 8);
        assert_eq!(
            rules[0].last_fired_at.unwrap().timestamp(),
            now.timestamp()
        );
    }

    #[tokio::test]
    async fn test_mark_checked_stamps_without_counting() {
        let store = SqliteRuleStore::open_in_memory().unwrap();
        store.upsert(&sample_rule("r1")).await.unwrap();
        store.mark_checked("r1", Utc::now()).await.unwrap();

        let rules = store
            .load_enabled(&[RuleKind::SubscriptionExpiring])
            .await
            .unwrap();
        assert!(rules[0].last_fired_at.is_some());
        assert_eq!(rules[0].last_fired_count, 0);
    }

    #[tokio::test]
    async fn test_legacy_audience_column_converted_on_read() {
        let store = SqliteRuleStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO trigger_rules
                   (id, kind, schedule, send_time, offset_days, audience, message_template)
                 VALUES ('old', 'session-reminder', ?1, '17:00', 0, ?2, 'training today')",
                params![
                    serde_json::to_string(&Schedule::Weekdays {
                        days: std::collections::BTreeSet::from(["sunday".to_string()]),
                    })
                    .unwrap(),
                    "\"parents\"",
                ],
            )
            .unwrap();
        }
        let rules = store.load_enabled(&[RuleKind::SessionReminder]).await.unwrap();
        assert_eq!(rules[0].audience, Audience::roles([Role::Parent]));
    }

    #[tokio::test]
    async fn test_message_log_insert() {
        let store = SqliteRuleStore::open_in_memory().unwrap();
        store
            .log_message(&MessageRecord {
                id: "m1".into(),
                rule_id: "r1".into(),
                kind: RuleKind::SessionReminder,
                body: "training at 5pm".into(),
                recipients: 12,
                cost: 0.6,
                sent_at: Utc::now(),
            })
            .await
            .unwrap();
        let count: i64 = store
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM sent_messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
