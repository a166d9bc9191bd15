//! Domain snapshot types — read-only views over the academy's relational
//! store (users, players, subscriptions). The engine never writes these;
//! they are produced by a `SnapshotSource` adapter at tick time.

use serde::{Deserialize, Serialize};

/// Academy roles, in the order clients know them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    BranchAdmin,
    Accountant,
    Coach,
    Parent,
    Player,
}

/// All known roles. Room fanout for `Audience::All` iterates this.
pub const ALL_ROLES: [Role; 5] = [
    Role::BranchAdmin,
    Role::Accountant,
    Role::Coach,
    Role::Parent,
    Role::Player,
];

impl Role {
    /// Canonical wire name — must match the room naming convention
    /// (`role-{role}`) bit-for-bit.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::BranchAdmin => "branch_admin",
            Role::Accountant => "accountant",
            Role::Coach => "coach",
            Role::Parent => "parent",
            Role::Player => "player",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "branch_admin" => Some(Role::BranchAdmin),
            "accountant" => Some(Role::Accountant),
            "coach" => Some(Role::Coach),
            "parent" => Some(Role::Parent),
            "player" => Some(Role::Player),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user with a login account (staff or parent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    /// Raw phone number as stored; normalized at send time.
    pub phone: Option<String>,
    pub role: Role,
    /// Home branch. Parents are additionally reachable through their
    /// children's branches regardless of this field.
    pub branch_id: Option<String>,
    pub active: bool,
}

/// A registered player. Players have no login of their own; their delivery
/// address is the emergency contact number on file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: String,
    pub name: String,
    pub branch_id: String,
    /// Owning parent account, if registered.
    pub parent_id: Option<String>,
    pub emergency_phone: Option<String>,
    pub active: bool,
}

/// A program subscription — the reference record for expiry/overdue rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: String,
    pub player_id: String,
    pub parent_id: Option<String>,
    pub branch_id: String,
    pub end_date: chrono::NaiveDate,
    pub sessions_left: u32,
    pub amount_due: f64,
    pub active: bool,
}

/// A consistent read-only snapshot of the domain at one instant.
/// Audience resolution is pure over this value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub players: Vec<PlayerRecord>,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionRecord>,
}

impl Snapshot {
    pub fn user(&self, id: &str) -> Option<&UserRecord> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn player(&self, id: &str) -> Option<&PlayerRecord> {
        self.players.iter().find(|p| p.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in ALL_ROLES {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("referee"), None);
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(Role::BranchAdmin.as_str(), "branch_admin");
        assert_eq!(Role::Parent.as_str(), "parent");
    }
}
