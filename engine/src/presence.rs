//! In-memory presence snapshot for one game server.
//!
//! Two feeds keep it current: console join/leave events apply immediately,
//! and the periodic full-roster poll wholesale-replaces the online set,
//! correcting for everything the event stream dropped. Reads are plain map
//! lookups and never block.

use crate::util::now_ms;
use protocol::PlayerRef;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
struct PlayerRecord {
    name: String,
    online: bool,
    last_seen_ms: u64,
}

/// Players whose online flag flipped during a roster replacement.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RosterDiff {
    pub went_online: Vec<String>,
    pub went_offline: Vec<String>,
}

impl RosterDiff {
    pub fn is_empty(&self) -> bool {
        self.went_online.is_empty() && self.went_offline.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// Keyed by stable player id.
    players: HashMap<String, PlayerRecord>,
    /// Display name -> id, for leave lines that carry only a name.
    names: HashMap<String, String>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a player online. Returns true if this flipped their state.
    pub fn mark_online(&mut self, player: &PlayerRef) -> bool {
        self.names.insert(player.name.clone(), player.id.clone());
        let record = self
            .players
            .entry(player.id.clone())
            .or_insert_with(|| PlayerRecord {
                name: player.name.clone(),
                online: false,
                last_seen_ms: 0,
            });
        record.name = player.name.clone();
        record.last_seen_ms = now_ms();
        let flipped = !record.online;
        record.online = true;
        flipped
    }

    /// Marks a player offline by display name. Returns the stable id if
    /// this flipped their state.
    pub fn mark_offline(&mut self, name: &str) -> Option<String> {
        let id = self.names.get(name)?.clone();
        let record = self.players.get_mut(&id)?;
        if !record.online {
            return None;
        }
        record.online = false;
        record.last_seen_ms = now_ms();
        Some(id)
    }

    pub fn is_online(&self, id: &str) -> bool {
        self.players.get(id).map(|r| r.online).unwrap_or(false)
    }

    /// Team presence collapses to this single boolean.
    pub fn any_online(&self, ids: &[String]) -> bool {
        ids.iter().any(|id| self.is_online(id))
    }

    pub fn online_count(&self) -> usize {
        self.players.values().filter(|r| r.online).count()
    }

    /// Wholesale snapshot replacement from a full roster poll. Everyone in
    /// the roster is online, everyone else is offline; the returned diff
    /// lists only the players whose state actually changed.
    pub fn replace_roster(&mut self, roster: &[PlayerRef]) -> RosterDiff {
        let now = now_ms();
        let roster_ids: HashSet<&str> = roster.iter().map(|p| p.id.as_str()).collect();
        let mut diff = RosterDiff::default();

        for (id, record) in self.players.iter_mut() {
            if record.online && !roster_ids.contains(id.as_str()) {
                record.online = false;
                record.last_seen_ms = now;
                diff.went_offline.push(id.clone());
            }
        }

        for player in roster {
            self.names.insert(player.name.clone(), player.id.clone());
            let record = self
                .players
                .entry(player.id.clone())
                .or_insert_with(|| PlayerRecord {
                    name: player.name.clone(),
                    online: false,
                    last_seen_ms: 0,
                });
            record.name = player.name.clone();
            record.last_seen_ms = now;
            if !record.online {
                record.online = true;
                diff.went_online.push(player.id.clone());
            }
        }

        diff
    }
}
