//! Audience descriptors and recipient resolution.
//!
//! An `Audience` says *who* a message is for without naming anyone. Legacy
//! string tokens from older rule records are converted exactly once, at the
//! boundary where a rule is ingested (`Audience::from_legacy`) — resolution
//! and broadcast never re-interpret strings.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{Role, Snapshot};

/// Who should receive a message or event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Audience {
    /// Every active recipient across all roles.
    All,
    /// Every active recipient holding one of the listed roles.
    Roles { roles: BTreeSet<Role> },
    /// Per-branch role scoping plus explicit user ids.
    Scoped {
        #[serde(default)]
        branches: BTreeMap<String, BTreeSet<Role>>,
        #[serde(default)]
        users: Vec<String>,
    },
}

impl Audience {
    pub fn roles(roles: impl IntoIterator<Item = Role>) -> Self {
        Audience::Roles {
            roles: roles.into_iter().collect(),
        }
    }

    /// Map a historical string audience to the tagged form. Called once when
    /// a legacy rule record is ingested, never at resolution time.
    pub fn from_legacy(token: &str) -> Self {
        match token {
            "all" => Audience::All,
            "staff" => Audience::roles([Role::BranchAdmin, Role::Accountant, Role::Coach]),
            "parents" => Audience::roles([Role::Parent]),
            "coaches" => Audience::roles([Role::Coach]),
            other => match Role::parse(other) {
                Some(role) => Audience::roles([role]),
                None => {
                    tracing::warn!("Unknown legacy audience token '{other}', resolves to nobody");
                    Audience::Roles {
                        roles: BTreeSet::new(),
                    }
                }
            },
        }
    }
}

/// A concrete recipient with a usable delivery address.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    /// Phone number (raw, normalized at send time).
    pub address: String,
    /// User id when the recipient has a login; `None` for derived player
    /// recipients reached via an emergency contact.
    pub user_id: Option<String>,
    pub name: String,
}

/// Resolve an audience against a domain snapshot into a deduplicated
/// recipient list. Pure and deterministic: the same descriptor over the
/// same snapshot always yields the same set.
pub fn resolve(audience: &Audience, snapshot: &Snapshot) -> Vec<Recipient> {
    let mut out = Vec::new();
    match audience {
        Audience::All => {
            collect_users(snapshot, None, &mut out);
            collect_players(snapshot, None, &mut out);
        }
        Audience::Roles { roles } => {
            for user in snapshot.users.iter().filter(|u| u.active) {
                if roles.contains(&user.role) {
                    push_user(user, &mut out);
                }
            }
            if roles.contains(&Role::Player) {
                collect_players(snapshot, None, &mut out);
            }
        }
        Audience::Scoped { branches, users } => {
            for (branch_id, roles) in branches {
                for user in snapshot.users.iter().filter(|u| u.active) {
                    if !roles.contains(&user.role) {
                        continue;
                    }
                    if user.branch_id.as_deref() == Some(branch_id.as_str()) {
                        push_user(user, &mut out);
                    }
                }
                // Parents belong to a branch through their children, not
                // only through their own branch_id.
                if roles.contains(&Role::Parent) {
                    for player in snapshot
                        .players
                        .iter()
                        .filter(|p| p.active && p.branch_id == *branch_id)
                    {
                        if let Some(parent_id) = &player.parent_id {
                            if let Some(parent) = snapshot.user(parent_id) {
                                if parent.active {
                                    push_user(parent, &mut out);
                                }
                            }
                        }
                    }
                }
                if roles.contains(&Role::Player) {
                    collect_players(snapshot, Some(branch_id), &mut out);
                }
            }
            for id in users {
                if let Some(user) = snapshot.user(id) {
                    if user.active {
                        push_user(user, &mut out);
                    }
                }
            }
        }
    }
    dedup_by_address(out)
}

fn collect_users(snapshot: &Snapshot, branch: Option<&str>, out: &mut Vec<Recipient>) {
    for user in snapshot.users.iter().filter(|u| u.active) {
        if branch.is_some() && user.branch_id.as_deref() != branch {
            continue;
        }
        push_user(user, out);
    }
}

/// Players have no login; their emergency contact is the delivery address.
fn collect_players(snapshot: &Snapshot, branch: Option<&str>, out: &mut Vec<Recipient>) {
    for player in snapshot.players.iter().filter(|p| p.active) {
        if let Some(branch) = branch {
            if player.branch_id != branch {
                continue;
            }
        }
        if let Some(phone) = &player.emergency_phone {
            out.push(Recipient {
                address: phone.clone(),
                user_id: None,
                name: player.name.clone(),
            });
        }
    }
}

fn push_user(user: &crate::types::UserRecord, out: &mut Vec<Recipient>) {
    if let Some(phone) = &user.phone {
        out.push(Recipient {
            address: phone.clone(),
            user_id: Some(user.id.clone()),
            name: user.name.clone(),
        });
    }
}

/// A person reachable through two matching paths (explicit id plus role
/// match, or two children in one branch) must receive exactly one message.
fn dedup_by_address(recipients: Vec<Recipient>) -> Vec<Recipient> {
    let mut seen = HashSet::new();
    recipients
        .into_iter()
        .filter(|r| seen.insert(r.address.clone()))
        .collect()
}
