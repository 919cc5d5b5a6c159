//! Drift repair: the reconciliation and expiration sweepers.
//!
//! Both run on the supervisor task, so a sweep can never interleave with
//! an in-flight command batch for the same zone. Reconciliation is the
//! catch-all for every "unknown outcome" the transport produced since the
//! last pass; planning is pure and separately tested, execution applies
//! the plan through the commander and store.

use crate::aggregator::DelayTimers;
use crate::dispatcher::ZoneCommander;
use crate::error::TransportError;
use crate::registry::{
    zone_from_defaults, Position, Zone, ZoneDefaults, ZoneRegistry, ZONE_ID_PREFIX,
};
use crate::store::ZoneStore;
use log::{info, warn};
use protocol::{LiveZone, PlayerRef};
use std::collections::HashSet;

/// An anomaly that needs a human: recorded, logged, never auto-resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewFlag {
    pub zone_id: String,
    pub reason: String,
    pub at_ms: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub orphaned: usize,
    pub adopted: usize,
    pub deleted_live: usize,
    pub flagged: usize,
    pub teams_refreshed: usize,
}

impl SweepStats {
    pub fn is_noop(&self) -> bool {
        *self == SweepStats::default()
    }
}

/// One repair step derived from a (persisted, live) diff.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairAction {
    /// Stored but absent live: the record is orphaned.
    DropStored { zone_id: String },
    /// Live with a recoverable owner but no record: take it over.
    Adopt { live: LiveZone },
    /// Live in our namespace with no recoverable owner: remove the object
    /// and flag it, so the removal is recorded rather than silent.
    DeleteLive { zone_id: String },
}

/// Pure diff of persisted vs live zone sets. Live objects outside the
/// engine's id namespace are never touched.
pub fn plan_reconcile(stored: &[Zone], live: &[LiveZone]) -> Vec<RepairAction> {
    let live_ids: HashSet<&str> = live.iter().map(|z| z.id.as_str()).collect();
    let stored_ids: HashSet<&str> = stored.iter().map(|z| z.id.as_str()).collect();
    let mut actions = Vec::new();

    for zone in stored {
        if !live_ids.contains(zone.id.as_str()) {
            actions.push(RepairAction::DropStored {
                zone_id: zone.id.clone(),
            });
        }
    }

    for live_zone in live {
        if stored_ids.contains(live_zone.id.as_str()) {
            continue;
        }
        if !live_zone.id.starts_with(ZONE_ID_PREFIX) {
            continue;
        }
        if live_zone.owner_id.is_empty() {
            actions.push(RepairAction::DeleteLive {
                zone_id: live_zone.id.clone(),
            });
        } else {
            actions.push(RepairAction::Adopt {
                live: live_zone.clone(),
            });
        }
    }

    actions
}

/// Builds a registry record for an adopted live zone. The expiry clock
/// restarts at adoption since the original creation time is gone.
fn zone_from_live(
    server_id: &str,
    live: &LiveZone,
    defaults: &ZoneDefaults,
) -> Zone {
    let owner_name = if live.owner_name.is_empty() {
        live.owner_id.clone()
    } else {
        live.owner_name.clone()
    };
    let mut zone = zone_from_defaults(
        server_id,
        PlayerRef::new(live.owner_id.clone(), owner_name),
        vec![live.owner_id.clone()],
        None,
        Position {
            x: live.x,
            y: live.y,
            z: live.z,
        },
        defaults,
    );
    zone.id = live.id.clone();
    zone.radius = live.radius;
    zone
}

/// One full reconciliation pass against a fresh live listing.
#[allow(clippy::too_many_arguments)]
pub async fn run_reconcile(
    server_id: &str,
    commander: &ZoneCommander,
    registry: &mut ZoneRegistry,
    store: &dyn ZoneStore,
    defaults: &ZoneDefaults,
    timers: &mut DelayTimers,
    flags: &mut Vec<ReviewFlag>,
    now_ms: u64,
) -> Result<SweepStats, TransportError> {
    let live = commander.live_zones().await?;
    let stored: Vec<Zone> = registry.iter().cloned().collect();
    let mut stats = SweepStats::default();

    for action in plan_reconcile(&stored, &live) {
        match action {
            RepairAction::DropStored { zone_id } => {
                timers.cancel(&zone_id);
                registry.remove(&zone_id);
                if let Err(e) = store.delete_zone(&zone_id) {
                    warn!("[{}] store delete for {} failed: {}", server_id, zone_id, e);
                }
                info!("[{}] dropped orphaned record {}", server_id, zone_id);
                stats.orphaned += 1;
            }
            RepairAction::Adopt { live } => {
                let zone = zone_from_live(server_id, &live, defaults);
                if let Err(e) = store.upsert_zone(&zone) {
                    warn!("[{}] store upsert for {} failed: {}", server_id, zone.id, e);
                }
                info!(
                    "[{}] adopted live zone {} for {}",
                    server_id, zone.id, zone.owner.name
                );
                if let Err(e) = commander.apply_color(&zone).await {
                    warn!("[{}] color sync for {} deferred: {}", server_id, zone.id, e);
                }
                registry.insert(zone);
                stats.adopted += 1;
            }
            RepairAction::DeleteLive { zone_id } => {
                match commander.delete_zone(&zone_id).await {
                    Ok(_) => stats.deleted_live += 1,
                    Err(e) => {
                        warn!("[{}] live delete for {} deferred: {}", server_id, zone_id, e)
                    }
                }
                warn!(
                    "[{}] zone {} has no recoverable owner, flagged for review",
                    server_id, zone_id
                );
                flags.push(ReviewFlag {
                    zone_id,
                    reason: "live zone without recoverable owner".to_string(),
                    at_ms: now_ms,
                });
                stats.flagged += 1;
            }
        }
    }

    stats.teams_refreshed = refresh_teams(server_id, commander, registry, store).await;
    Ok(stats)
}

/// Re-queries the live team API for every zone. A transport failure skips
/// the zone, keeping the last known membership.
async fn refresh_teams(
    server_id: &str,
    commander: &ZoneCommander,
    registry: &mut ZoneRegistry,
    store: &dyn ZoneStore,
) -> usize {
    let mut refreshed = 0;
    for zone_id in registry.ids() {
        let owner = match registry.get(&zone_id) {
            Some(zone) => zone.owner.clone(),
            None => continue,
        };
        let (members, team_id) = match commander.try_team(&owner).await {
            Ok(team) => team,
            Err(e) => {
                warn!(
                    "[{}] team refresh for {} skipped: {}",
                    server_id, zone_id, e
                );
                continue;
            }
        };
        if let Some(zone) = registry.get_mut(&zone_id) {
            if zone.members != members || zone.team_id != team_id {
                zone.members = members;
                zone.team_id = team_id;
                let snapshot = zone.clone();
                if let Err(e) = store.upsert_zone(&snapshot) {
                    warn!("[{}] store upsert for {} failed: {}", server_id, zone_id, e);
                }
                refreshed += 1;
            }
        }
    }
    refreshed
}

/// Deletes every zone past its lifetime, regardless of presence state.
/// The live object goes first: losing that delete keeps the record for a
/// retry, while the reverse order would let reconciliation re-adopt the
/// object.
pub async fn run_expiration(
    server_id: &str,
    commander: &ZoneCommander,
    registry: &mut ZoneRegistry,
    store: &dyn ZoneStore,
    timers: &mut DelayTimers,
    now_ms: u64,
) -> usize {
    let mut removed = 0;
    for zone_id in registry.expired_ids(now_ms) {
        timers.cancel(&zone_id);
        match commander.delete_zone(&zone_id).await {
            Ok(_) => {
                registry.remove(&zone_id);
                if let Err(e) = store.delete_zone(&zone_id) {
                    warn!("[{}] store delete for {} failed: {}", server_id, zone_id, e);
                }
                info!("[{}] expired zone {}", server_id, zone_id);
                removed += 1;
            }
            Err(e) => {
                warn!(
                    "[{}] expiry delete for {} deferred: {}",
                    server_id, zone_id, e
                );
            }
        }
    }
    removed
}
