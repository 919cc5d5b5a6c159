//! Zone domain model and the in-memory per-server registry.
//!
//! The registry is the authoritative in-memory view for one server. It is
//! hydrated from the store at supervisor start and every mutation is
//! written back immediately, so the two views only diverge when a write
//! fails, a divergence the reconciliation sweeper closes.

use crate::util::now_ms;
use protocol::PlayerRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ZoneId = String;

/// Prefix for every in-game object the engine owns. Reconciliation never
/// touches live zones outside this namespace.
pub const ZONE_ID_PREFIX: &str = "zorp_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneState {
    Online,
    Delay,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub server_id: String,
    pub owner: PlayerRef,
    /// Team roster by stable player id, owner included. Refreshed from the
    /// live team API during reconciliation.
    pub members: Vec<String>,
    pub team_id: Option<u64>,
    pub position: Position,
    pub radius: f32,
    pub color_online: String,
    pub color_delay: String,
    pub color_offline: String,
    pub delay_seconds: u64,
    pub expire_seconds: u64,
    pub created_at_ms: u64,
    /// Mutated only on the supervisor's evaluation path.
    pub state: ZoneState,
    pub pending_delay_deadline_ms: Option<u64>,
}

impl Zone {
    /// Deterministic in-game id: one owner, one zone, one object. Replaying
    /// a create for the same owner can never produce a second object.
    pub fn zone_id_for(owner_id: &str) -> ZoneId {
        format!("{}{}", ZONE_ID_PREFIX, owner_id)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms
            >= self
                .created_at_ms
                .saturating_add(self.expire_seconds.saturating_mul(1000))
    }

    /// The color the live object should show for the current state.
    pub fn active_color(&self) -> &str {
        match self.state {
            ZoneState::Online => &self.color_online,
            ZoneState::Delay => &self.color_delay,
            ZoneState::Offline => &self.color_offline,
        }
    }
}

/// Per-server zone defaults, admin-configured through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneDefaults {
    pub enabled: bool,
    pub radius: f32,
    pub color_online: String,
    pub color_delay: String,
    pub color_offline: String,
    pub delay_seconds: u64,
    pub expire_seconds: u64,
}

impl Default for ZoneDefaults {
    fn default() -> Self {
        Self {
            enabled: true,
            radius: 25.0,
            color_online: "#00FF00".to_string(),
            color_delay: "#FFA500".to_string(),
            color_offline: "#FF0000".to_string(),
            delay_seconds: 300,
            expire_seconds: 129_600,
        }
    }
}

#[derive(Debug, Default)]
pub struct ZoneRegistry {
    zones: HashMap<ZoneId, Zone>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the registry content wholesale (store hydration).
    pub fn hydrate(&mut self, zones: Vec<Zone>) {
        self.zones = zones.into_iter().map(|z| (z.id.clone(), z)).collect();
    }

    pub fn insert(&mut self, zone: Zone) {
        self.zones.insert(zone.id.clone(), zone);
    }

    pub fn remove(&mut self, id: &str) -> Option<Zone> {
        self.zones.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Zone> {
        self.zones.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Zone> {
        self.zones.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.zones.contains_key(id)
    }

    /// The owner's zone, ignoring records already past their lifetime.
    pub fn find_by_owner(&self, owner_id: &str, now_ms: u64) -> Option<&Zone> {
        self.zones
            .values()
            .find(|z| z.owner.id == owner_id && !z.is_expired(now_ms))
    }

    /// The owner's zone regardless of expiry (deletion path).
    pub fn find_by_owner_any(&self, owner_id: &str) -> Option<&Zone> {
        self.zones.values().find(|z| z.owner.id == owner_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn ids(&self) -> Vec<ZoneId> {
        self.zones.keys().cloned().collect()
    }

    pub fn expired_ids(&self, now_ms: u64) -> Vec<ZoneId> {
        self.zones
            .values()
            .filter(|z| z.is_expired(now_ms))
            .map(|z| z.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

/// Builds a fresh zone for an owner from the server defaults.
pub fn zone_from_defaults(
    server_id: &str,
    owner: PlayerRef,
    members: Vec<String>,
    team_id: Option<u64>,
    position: Position,
    defaults: &ZoneDefaults,
) -> Zone {
    Zone {
        id: Zone::zone_id_for(&owner.id),
        server_id: server_id.to_string(),
        owner,
        members,
        team_id,
        position,
        radius: defaults.radius,
        color_online: defaults.color_online.clone(),
        color_delay: defaults.color_delay.clone(),
        color_offline: defaults.color_offline.clone(),
        delay_seconds: defaults.delay_seconds,
        expire_seconds: defaults.expire_seconds,
        created_at_ms: now_ms(),
        state: ZoneState::Online,
        pending_delay_deadline_ms: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_zone(owner_id: &str, name: &str) -> Zone {
        zone_from_defaults(
            "main",
            PlayerRef::new(owner_id, name),
            vec![owner_id.to_string()],
            None,
            Position {
                x: 10.0,
                y: 0.0,
                z: -20.0,
            },
            &ZoneDefaults::default(),
        )
    }

    #[test]
    fn zone_id_is_deterministic_per_owner() {
        assert_eq!(Zone::zone_id_for("42"), "zorp_42");
        assert_eq!(
            test_zone("42", "Alice").id,
            test_zone("42", "Alice-renamed").id
        );
    }

    #[test]
    fn expiry_is_age_based() {
        let mut zone = test_zone("1", "Alice");
        zone.created_at_ms = 1_000;
        zone.expire_seconds = 10;

        assert!(!zone.is_expired(10_999));
        assert!(zone.is_expired(11_000));
        assert!(zone.is_expired(u64::MAX));
    }

    #[test]
    fn active_color_follows_state() {
        let mut zone = test_zone("1", "Alice");
        assert_eq!(zone.active_color(), zone.color_online);
        zone.state = ZoneState::Delay;
        assert_eq!(zone.active_color(), zone.color_delay);
        zone.state = ZoneState::Offline;
        assert_eq!(zone.active_color(), zone.color_offline);
    }

    #[test]
    fn new_zones_start_online() {
        // A zone can only be requested by a connected owner.
        assert_eq!(test_zone("1", "Alice").state, ZoneState::Online);
    }

    #[test]
    fn find_by_owner_skips_expired_records() {
        let mut registry = ZoneRegistry::new();
        let mut zone = test_zone("1", "Alice");
        zone.created_at_ms = 0;
        zone.expire_seconds = 1;
        registry.insert(zone);

        assert!(registry.find_by_owner("1", 500).is_some());
        assert!(registry.find_by_owner("1", 2_000).is_none());
        // the record still exists for the deletion/expiry paths
        assert!(registry.find_by_owner_any("1").is_some());
    }

    #[test]
    fn expired_ids_only_lists_past_lifetime() {
        let mut registry = ZoneRegistry::new();
        let mut old = test_zone("1", "Alice");
        old.created_at_ms = 0;
        old.expire_seconds = 1;
        let fresh = test_zone("2", "Bob");
        registry.insert(old);
        registry.insert(fresh);

        let expired = registry.expired_ids(10_000);
        assert_eq!(expired, vec!["zorp_1".to_string()]);
    }

    #[test]
    fn hydrate_replaces_content() {
        let mut registry = ZoneRegistry::new();
        registry.insert(test_zone("1", "Alice"));
        registry.hydrate(vec![test_zone("2", "Bob")]);

        assert_eq!(registry.len(), 1);
        assert!(registry.get("zorp_2").is_some());
        assert!(registry.get("zorp_1").is_none());
    }

    #[test]
    fn zone_survives_store_round_trip() {
        let zone = test_zone("1", "Alice");
        let raw = serde_json::to_string(&zone).unwrap();
        let back: Zone = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.id, zone.id);
        assert_eq!(back.state, zone.state);
        assert_eq!(back.members, zone.members);
    }
}
