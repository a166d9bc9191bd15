//! The broadcast hub — live connections, room membership, and audience
//! fanout.
//!
//! Membership is in-memory only; a restart drops every connection and
//! clients rejoin. A broadcast resolves an `Audience` to a *room set* (not
//! individual recipients) and emits one envelope per distinct connection.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use courtline_core::audience::Audience;
use courtline_core::types::{Role, ALL_ROLES};

/// Every connection joins this room on connect.
pub const GLOBAL_ROOM: &str = "global";
/// Live attendance check-in/out updates.
pub const ATTENDANCE_ROOM: &str = "attendance-updates";
/// Training schedule changes.
pub const SCHEDULE_ROOM: &str = "schedule-updates";

pub type ConnId = u64;

/// What a client declares about itself when joining.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    pub role: Option<Role>,
    pub branch_id: Option<String>,
    pub user_id: Option<String>,
}

/// Wire envelope for every realtime event.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    #[serde(rename = "type")]
    pub event: &'a str,
    pub data: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

struct Connection {
    sender: UnboundedSender<String>,
    rooms: HashSet<String>,
}

/// Connection and room registry.
pub struct Hub {
    next_id: AtomicU64,
    connections: RwLock<HashMap<ConnId, Connection>>,
    rooms: RwLock<HashMap<String, HashSet<ConnId>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Register a live connection. It starts in the global room only.
    pub fn connect(&self) -> (ConnId, UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.write().expect("hub lock poisoned").insert(
            id,
            Connection {
                sender: tx,
                rooms: HashSet::new(),
            },
        );
        self.join_room(id, GLOBAL_ROOM);
        tracing::debug!("Realtime connection {id} registered");
        (id, rx)
    }

    /// Subscribe a connection to the rooms implied by its identity:
    /// `branch-{b}`, `role-{r}`, `role-{r}-branch-{b}`, `user-{u}` —
    /// whichever parts are present.
    pub fn join(&self, conn: ConnId, identity: &ClientIdentity) {
        if let Some(branch) = &identity.branch_id {
            self.join_room(conn, &format!("branch-{branch}"));
        }
        if let Some(role) = identity.role {
            self.join_room(conn, &format!("role-{role}"));
            if let Some(branch) = &identity.branch_id {
                self.join_room(conn, &format!("role-{role}-branch-{branch}"));
            }
        }
        if let Some(user) = &identity.user_id {
            self.join_room(conn, &format!("user-{user}"));
        }
    }

    pub fn join_room(&self, conn: ConnId, room: &str) {
        let mut connections = self.connections.write().expect("hub lock poisoned");
        let Some(connection) = connections.get_mut(&conn) else {
            return;
        };
        connection.rooms.insert(room.to_string());
        drop(connections);
        self.rooms
            .write()
            .expect("hub lock poisoned")
            .entry(room.to_string())
            .or_default()
            .insert(conn);
    }

    /// Drop a connection and all its memberships.
    pub fn disconnect(&self, conn: ConnId) {
        let removed = self.connections.write().expect("hub lock poisoned").remove(&conn);
        if let Some(connection) = removed {
            let mut rooms = self.rooms.write().expect("hub lock poisoned");
            for room in connection.rooms {
                if let Some(members) = rooms.get_mut(&room) {
                    members.remove(&conn);
                    if members.is_empty() {
                        rooms.remove(&room);
                    }
                }
            }
        }
        tracing::debug!("Realtime connection {conn} dropped");
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.rooms
            .read()
            .expect("hub lock poisoned")
            .get(room)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().expect("hub lock poisoned").len()
    }

    /// Emit an event to one room. Returns how many connections received it.
    pub fn emit(&self, room: &str, event: &str, data: serde_json::Value) -> usize {
        let members: Vec<ConnId> = {
            let rooms = self.rooms.read().expect("hub lock poisoned");
            rooms.get(room).map(|m| m.iter().copied().collect()).unwrap_or_default()
        };
        self.deliver(&members, event, data)
    }

    /// Fan an event out to every room implied by the audience. A connection
    /// matching several target rooms receives the event once.
    pub fn broadcast(&self, event: &str, data: serde_json::Value, audience: &Audience) -> usize {
        let target_rooms = rooms_for(audience);
        let mut targets: Vec<ConnId> = Vec::new();
        let mut seen: HashSet<ConnId> = HashSet::new();
        {
            let rooms = self.rooms.read().expect("hub lock poisoned");
            for room in &target_rooms {
                if let Some(members) = rooms.get(room.as_str()) {
                    for conn in members {
                        if seen.insert(*conn) {
                            targets.push(*conn);
                        }
                    }
                }
            }
        }
        let delivered = self.deliver(&targets, event, data);
        tracing::debug!(
            "Broadcast '{event}' to {} room(s), {delivered} connection(s)",
            target_rooms.len()
        );
        delivered
    }

    fn deliver(&self, targets: &[ConnId], event: &str, data: serde_json::Value) -> usize {
        let envelope = Envelope {
            event,
            data,
            timestamp: chrono::Utc::now(),
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Unserializable event payload: {e}");
                return 0;
            }
        };
        let connections = self.connections.read().expect("hub lock poisoned");
        let mut delivered = 0;
        for conn in targets {
            if let Some(connection) = connections.get(conn) {
                // Fire-and-forget: a closed receiver just misses the event.
                if connection.sender.send(payload.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Map an audience to the room names it implies.
///
/// Targeting role `player` also targets role `parent` in the same scope:
/// parent accounts administer player profiles and must see player-directed
/// announcements.
pub fn rooms_for(audience: &Audience) -> BTreeSet<String> {
    let mut rooms = BTreeSet::new();
    match audience {
        Audience::All => {
            for role in ALL_ROLES {
                rooms.insert(format!("role-{role}"));
            }
        }
        Audience::Roles { roles } => {
            for role in mirror_players(roles) {
                rooms.insert(format!("role-{role}"));
            }
        }
        Audience::Scoped { branches, users } => {
            for (branch, roles) in branches {
                for role in mirror_players(roles) {
                    rooms.insert(format!("role-{role}-branch-{branch}"));
                }
            }
            for user in users {
                rooms.insert(format!("user-{user}"));
            }
        }
    }
    rooms
}

fn mirror_players(roles: &BTreeSet<Role>) -> BTreeSet<Role> {
    let mut mirrored = roles.clone();
    if mirrored.contains(&Role::Player) {
        mirrored.insert(Role::Parent);
    }
    mirrored
}
