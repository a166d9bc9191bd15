//! The dispatch engine: tick orchestration, condition evaluation, message
//! composition, and fan-out to SMS and the realtime hub.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, Utc};

use courtline_core::audience;
use courtline_core::error::Result;
use courtline_core::template;
use courtline_core::types::Snapshot;
use courtline_realtime::hub::Hub;
use courtline_sms::gateway::{OutboundSms, SmsGateway};

use crate::clock::{Cadence, TickGate};
use crate::rules::{RuleKind, TriggerRule};
use crate::store::{MessageRecord, RuleStore};

/// Read-only access to the academy's domain data. The engine never writes
/// through this seam; it consumes a consistent snapshot per tick.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self) -> Result<Snapshot>;
}

/// Snapshot source backed by a value swapped in from outside — used in tests
/// and by deployments that sync domain data through the API layer.
#[derive(Default)]
pub struct InMemoryDirectory {
    snapshot: std::sync::RwLock<Snapshot>,
}

impl InMemoryDirectory {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: std::sync::RwLock::new(snapshot),
        }
    }

    pub fn replace(&self, snapshot: Snapshot) {
        *self.snapshot.write().expect("directory lock poisoned") = snapshot;
    }
}

#[async_trait]
impl SnapshotSource for InMemoryDirectory {
    async fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.snapshot.read().expect("directory lock poisoned").clone())
    }
}

/// Outcome of one evaluation pass.
#[derive(Debug, Default)]
pub struct TickReport {
    pub cadence: &'static str,
    pub evaluated: usize,
    pub fired: usize,
    /// Condition-bearing rules that matched their minute but had no records.
    pub checked: usize,
    pub errors: usize,
    /// The previous tick on this cadence was still running.
    pub skipped_busy: bool,
}

impl std::fmt::Display for TickReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.skipped_busy {
            return write!(f, "{} tick skipped (previous tick still running)", self.cadence);
        }
        write!(
            f,
            "{} tick: {} evaluated, {} fired, {} checked, {} errors",
            self.cadence, self.evaluated, self.fired, self.checked, self.errors
        )
    }
}

enum FireOutcome {
    Dispatched(u32),
    NoMatches,
}

pub struct DispatchEngine {
    store: Arc<dyn RuleStore>,
    directory: Arc<dyn SnapshotSource>,
    /// Absent in realtime-only deployments; rules then count recipients but
    /// send nothing over SMS.
    sms: Option<Arc<SmsGateway>>,
    hub: Arc<Hub>,
    tz: FixedOffset,
    coarse_gate: TickGate,
    fine_gate: TickGate,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn RuleStore>,
        directory: Arc<dyn SnapshotSource>,
        sms: Option<Arc<SmsGateway>>,
        hub: Arc<Hub>,
        tz: FixedOffset,
    ) -> Self {
        Self {
            store,
            directory,
            sms,
            hub,
            tz,
            coarse_gate: TickGate::new(),
            fine_gate: TickGate::new(),
        }
    }

    fn gate(&self, cadence: Cadence) -> &TickGate {
        match cadence {
            Cadence::Coarse => &self.coarse_gate,
            Cadence::Fine => &self.fine_gate,
        }
    }

    /// One evaluation pass over the cadence's rule kinds.
    ///
    /// Never fails as a whole: a rule that errors is logged and counted, and
    /// the remaining rules in the same tick still run.
    pub async fn tick(&self, cadence: Cadence, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport {
            cadence: cadence.as_str(),
            ..TickReport::default()
        };
        let Some(_permit) = self.gate(cadence).try_acquire() else {
            tracing::warn!("Skipping {cadence} tick: previous tick still running");
            report.skipped_busy = true;
            return report;
        };

        let local = now.with_timezone(&self.tz);
        let rules = match self.store.load_enabled(cadence.kinds()).await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::error!("Failed to load rules for {cadence} tick: {e}");
                report.errors += 1;
                return report;
            }
        };
        if rules.is_empty() {
            return report;
        }
        let snapshot = match self.directory.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!("Failed to load domain snapshot: {e}");
                report.errors += 1;
                return report;
            }
        };

        for rule in &rules {
            report.evaluated += 1;
            if !rule.due(local) {
                continue;
            }
            match self.fire(rule, &snapshot, local.date_naive(), now).await {
                Ok(FireOutcome::Dispatched(count)) => {
                    tracing::info!("Rule {} ({}) fired for {count} recipient(s)", rule.id, rule.kind);
                    report.fired += 1;
                }
                Ok(FireOutcome::NoMatches) => {
                    tracing::debug!("Rule {} matched its minute but had no records", rule.id);
                    report.checked += 1;
                }
                Err(e) => {
                    tracing::error!("Rule {} failed: {e}", rule.id);
                    report.errors += 1;
                }
            }
        }
        report
    }

    async fn fire(
        &self,
        rule: &TriggerRule,
        snapshot: &Snapshot,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<FireOutcome> {
        let messages = if rule.kind.is_condition_bearing() {
            let messages = compose_condition_messages(rule, snapshot, today);
            if messages.is_empty() {
                // Stamp the check so the rule is not re-evaluated again
                // today, but count nothing and send nothing.
                self.store.mark_checked(&rule.id, now).await?;
                return Ok(FireOutcome::NoMatches);
            }
            messages
        } else {
            compose_audience_messages(rule, snapshot)
        };
        let count = messages.len() as u32;

        let mut cost = 0.0;
        if let Some(sms) = &self.sms {
            let batch = sms.send_bulk(&messages).await;
            cost = batch.total_cost;
            for (address, error) in &batch.errors {
                tracing::warn!("Rule {}: delivery to {address} failed: {error}", rule.id);
            }
            tracing::info!(
                "Rule {}: SMS batch {} ok / {} failed, cost {:.2}",
                rule.id,
                batch.successful,
                batch.failed,
                batch.total_cost
            );
        }

        if rule.kind.is_announcement() {
            let body = template::render(&rule.message_template, &base_context(rule));
            let delivered = self.hub.broadcast(
                rule.kind.as_str(),
                serde_json::json!({ "rule_id": rule.id, "message": body }),
                &rule.audience,
            );
            tracing::debug!("Rule {}: realtime fanout reached {delivered} connection(s)", rule.id);
        }

        self.store.record_fire(&rule.id, now, count).await?;
        self.store
            .log_message(&MessageRecord {
                id: uuid::Uuid::new_v4().to_string(),
                rule_id: rule.id.clone(),
                kind: rule.kind,
                body: rule.message_template.clone(),
                recipients: count,
                cost,
                sent_at: now,
            })
            .await?;
        Ok(FireOutcome::Dispatched(count))
    }
}

fn base_context(rule: &TriggerRule) -> HashMap<String, String> {
    template::context([("days", rule.offset_days.abs().to_string())])
}

/// Compose announcement-style messages: one per resolved recipient.
fn compose_audience_messages(rule: &TriggerRule, snapshot: &Snapshot) -> Vec<OutboundSms> {
    audience::resolve(&rule.audience, snapshot)
        .into_iter()
        .map(|recipient| {
            let mut ctx = base_context(rule);
            ctx.insert("parent_name".into(), recipient.name);
            OutboundSms {
                to: recipient.address,
                body: template::render(&rule.message_template, &ctx),
            }
        })
        .collect()
}

/// One accumulated message group per delivery address.
#[derive(Default)]
struct MatchGroup {
    name: String,
    players: Vec<String>,
    total_due: f64,
    sessions: u32,
}

/// Compose messages for condition-bearing kinds from the subscription
/// records matching the rule's reference date. Multiple matching records
/// pointing to the same phone (two siblings, one parent) collapse into one
/// message.
fn compose_condition_messages(
    rule: &TriggerRule,
    snapshot: &Snapshot,
    today: NaiveDate,
) -> Vec<OutboundSms> {
    let target = match rule.kind {
        RuleKind::SubscriptionExpiring => today + ChronoDuration::days(rule.offset_days),
        RuleKind::PaymentOverdue => today - ChronoDuration::days(rule.offset_days),
        _ => return Vec::new(),
    };

    let mut groups: HashMap<String, MatchGroup> = HashMap::new();
    for sub in snapshot.subscriptions.iter().filter(|s| s.end_date == target) {
        match rule.kind {
            RuleKind::SubscriptionExpiring if !sub.active => continue,
            RuleKind::PaymentOverdue if sub.amount_due <= 0.0 => continue,
            _ => {}
        }
        let player = snapshot.player(&sub.player_id);
        let player_name = player
            .map(|p| p.name.clone())
            .unwrap_or_else(|| sub.player_id.clone());

        // Delivery address: the parent's phone when a parent account exists,
        // otherwise the player's emergency contact.
        let parent = sub
            .parent_id
            .as_deref()
            .and_then(|id| snapshot.user(id))
            .filter(|u| u.active);
        let (address, name) = match parent {
            Some(parent) => match &parent.phone {
                Some(phone) => (phone.clone(), parent.name.clone()),
                None => continue,
            },
            None => match player.and_then(|p| p.emergency_phone.clone()) {
                Some(phone) => (phone, player_name.clone()),
                None => {
                    tracing::debug!(
                        "Subscription {} has no reachable contact, skipping",
                        sub.id
                    );
                    continue;
                }
            },
        };

        let group = groups.entry(address).or_default();
        if group.name.is_empty() {
            group.name = name;
        }
        group.players.push(player_name);
        group.total_due += sub.amount_due;
        group.sessions += sub.sessions_left;
    }

    let mut entries: Vec<(String, MatchGroup)> = groups.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
        .into_iter()
        .map(|(address, group)| {
            let mut ctx = base_context(rule);
            ctx.insert("parent_name".into(), group.name);
            ctx.insert("players".into(), group.players.join(", "));
            ctx.insert("end_date".into(), target.to_string());
            ctx.insert("total_due".into(), format!("{:.2}", group.total_due));
            ctx.insert("sessions".into(), group.sessions.to_string());
            OutboundSms {
                to: address,
                body: template::render(&rule.message_template, &ctx),
            }
        })
        .collect()
}

/// Run one cadence's ticker until the task is aborted. The engine's tick
/// logic takes `now` as an argument, so tests drive it with synthetic
/// instants instead of this timer.
pub fn spawn_ticker(
    engine: Arc<DispatchEngine>,
    cadence: Cadence,
    initial_delay: Duration,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            "Starting {cadence} ticker: first tick in {initial_delay:?}, period {period:?}"
        );
        tokio::time::sleep(initial_delay).await;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let report = engine.tick(cadence, Utc::now()).await;
            if report.fired > 0 || report.errors > 0 {
                tracing::info!("{report}");
            } else {
                tracing::debug!("{report}");
            }
        }
    })
}
