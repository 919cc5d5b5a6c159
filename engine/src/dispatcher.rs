//! Translates zone state into console commands.
//!
//! Every mutation targets the zone's deterministic in-game id, so the
//! server treats replays as no-ops and a retry can never produce a second
//! object. Transport failures are logged and surfaced to the supervisor,
//! which defers the repair to reconciliation instead of retrying here.

use crate::error::TransportError;
use crate::registry::Zone;
use crate::transport::RconSession;
use log::{debug, warn};
use protocol::events::{parse_roster, parse_team, parse_zone_list};
use protocol::{LiveZone, PlayerRef};
use std::sync::Arc;

pub const LIST_COMMAND: &str = "zone.list";
pub const ROSTER_COMMAND: &str = "playerlist";

pub fn create_command(zone: &Zone) -> String {
    format!(
        "zone.create \"{}\" {:.1} {:.1} {:.1} {:.1}",
        zone.id, zone.position.x, zone.position.y, zone.position.z, zone.radius
    )
}

pub fn color_command(zone: &Zone) -> String {
    format!("zone.edit \"{}\" color \"{}\"", zone.id, zone.active_color())
}

pub fn delete_command(zone_id: &str) -> String {
    format!("zone.delete \"{}\"", zone_id)
}

pub fn team_command(owner_id: &str) -> String {
    format!("teaminfo \"{}\"", owner_id)
}

pub struct ZoneCommander {
    session: Arc<RconSession>,
}

impl ZoneCommander {
    pub fn new(session: Arc<RconSession>) -> Self {
        Self { session }
    }

    /// Creates the live object and paints its initial color.
    pub async fn create_zone(&self, zone: &Zone) -> Result<(), TransportError> {
        self.session.send_command(&create_command(zone)).await?;
        self.session.send_command(&color_command(zone)).await?;
        Ok(())
    }

    /// Re-sends the color for the zone's current state. Safe to repeat.
    pub async fn apply_color(&self, zone: &Zone) -> Result<(), TransportError> {
        self.session.send_command(&color_command(zone)).await?;
        Ok(())
    }

    pub async fn delete_zone(&self, zone_id: &str) -> Result<(), TransportError> {
        self.session.send_command(&delete_command(zone_id)).await?;
        Ok(())
    }

    /// The authoritative live listing.
    pub async fn live_zones(&self) -> Result<Vec<LiveZone>, TransportError> {
        let raw = self.session.send_command(LIST_COMMAND).await?;
        parse_zone_list(&raw).map_err(|e| {
            warn!(
                "[{}] unreadable zone listing: {}",
                self.session.server_id(),
                e
            );
            TransportError::Codec(e.to_string())
        })
    }

    pub async fn roster(&self) -> Result<Vec<PlayerRef>, TransportError> {
        let raw = self.session.send_command(ROSTER_COMMAND).await?;
        parse_roster(&raw).map_err(|e| {
            warn!("[{}] unreadable roster: {}", self.session.server_id(), e);
            TransportError::Codec(e.to_string())
        })
    }

    /// Resolves the owner's team from the live team API. A non-JSON reply
    /// means the owner runs solo; a transport failure is surfaced so the
    /// caller can decide whether stale membership is acceptable.
    pub async fn try_team(
        &self,
        owner: &PlayerRef,
    ) -> Result<(Vec<String>, Option<u64>), TransportError> {
        let raw = self.session.send_command(&team_command(&owner.id)).await?;
        match parse_team(&raw) {
            Ok(team) => {
                let mut members: Vec<String> =
                    team.members.into_iter().map(|m| m.steam_id).collect();
                if !members.iter().any(|id| *id == owner.id) {
                    members.push(owner.id.clone());
                }
                Ok((members, Some(team.team_id)))
            }
            Err(e) => {
                debug!(
                    "[{}] no team roster for {}: {}",
                    self.session.server_id(),
                    owner.name,
                    e
                );
                Ok((vec![owner.id.clone()], None))
            }
        }
    }

    /// Creation-time variant: any failure collapses to owner-only
    /// membership, reconciliation refreshes it later.
    pub async fn team_members(&self, owner: &PlayerRef) -> (Vec<String>, Option<u64>) {
        match self.try_team(owner).await {
            Ok(team) => team,
            Err(e) => {
                warn!(
                    "[{}] team lookup failed for {}: {}",
                    self.session.server_id(),
                    owner.name,
                    e
                );
                (vec![owner.id.clone()], None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{zone_from_defaults, Position, ZoneDefaults, ZoneState};

    fn sample_zone() -> Zone {
        zone_from_defaults(
            "main",
            PlayerRef::new("76561198000000001", "Alice"),
            vec!["76561198000000001".to_string()],
            None,
            Position {
                x: 12.5,
                y: 0.0,
                z: -88.0,
            },
            &ZoneDefaults::default(),
        )
    }

    #[test]
    fn create_command_targets_deterministic_id() {
        let zone = sample_zone();
        assert_eq!(
            create_command(&zone),
            "zone.create \"zorp_76561198000000001\" 12.5 0.0 -88.0 25.0"
        );
    }

    #[test]
    fn color_command_follows_state() {
        let mut zone = sample_zone();
        assert!(color_command(&zone).contains("#00FF00"));
        zone.state = ZoneState::Delay;
        assert!(color_command(&zone).contains("#FFA500"));
        zone.state = ZoneState::Offline;
        assert!(color_command(&zone).contains("#FF0000"));
    }

    #[test]
    fn color_command_is_stable_for_same_state() {
        // Idempotence on the wire starts with byte-identical commands.
        let zone = sample_zone();
        assert_eq!(color_command(&zone), color_command(&zone));
    }

    #[test]
    fn delete_and_team_commands_quote_ids() {
        assert_eq!(delete_command("zorp_1"), "zone.delete \"zorp_1\"");
        assert_eq!(team_command("42"), "teaminfo \"42\"");
    }
}
