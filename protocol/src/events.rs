//! Console line classification.
//!
//! The game server interleaves chat, telemetry, and lifecycle lines on the
//! same console stream. Only a small subset is meaningful for presence
//! tracking; everything else must be dropped without error. Non-player
//! actors (NPCs, animals, spawned `*.entity` objects) produce join/kill
//! lines in the same shape as players and are filtered here so they can
//! never reach the presence tracker.

use crate::{LiveZone, PlayerRef, RosterEntry, TeamInfo};

/// A classified console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    Joined { player: PlayerRef },
    Left { name: String },
    Kill { victim: String, killer: Option<String> },
    Unrecognized,
}

const JOIN_MARKER: &str = " joined [";
const LEAVE_MARKER: &str = " disconnecting:";
const KILL_MARKER: &str = " was killed by ";
const DEATH_MARKER: &str = " died (";

/// Names the game uses for scripted actors and wildlife. Lowercased.
const NON_PLAYER_NAMES: &[&str] = &[
    "scientist",
    "tunneldweller",
    "underwaterdweller",
    "boar",
    "bear",
    "polarbear",
    "wolf",
    "stag",
    "chicken",
    "horse",
    "shark",
    "zombie",
    "murderer",
    "scarecrow",
    "patrolhelicopter",
    "bradleyapc",
];

/// Returns false for anything that should never count as a player:
/// spawned entities (`autoturret_deployed.entity`), parenthesized object
/// labels (`(boar)`), and known NPC/animal names.
pub fn is_player_name(name: &str) -> bool {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.ends_with(".entity") {
        return false;
    }
    if trimmed.starts_with('(') && trimmed.ends_with(')') {
        return false;
    }
    !NON_PLAYER_NAMES.contains(&trimmed.to_ascii_lowercase().as_str())
}

/// Classifies one raw console line. Never fails: anything unparseable or
/// filtered comes back as `Unrecognized` for the caller to count.
pub fn parse_line(line: &str) -> ConsoleEvent {
    let line = line.trim();
    if let Some(event) = parse_join(line) {
        return event;
    }
    if let Some(event) = parse_leave(line) {
        return event;
    }
    if let Some(event) = parse_kill(line) {
        return event;
    }
    ConsoleEvent::Unrecognized
}

// `NAME joined [platform/ID]`. The suffix is machine-generated and always
// terminal, so scan from the right; the display name is taken verbatim.
fn parse_join(line: &str) -> Option<ConsoleEvent> {
    let at = line.rfind(JOIN_MARKER)?;
    if !line.ends_with(']') {
        return None;
    }
    let name = &line[..at];
    let suffix = &line[at + JOIN_MARKER.len()..line.len() - 1];
    let (_platform, id) = suffix.split_once('/')?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !is_player_name(name) {
        return Some(ConsoleEvent::Unrecognized);
    }
    Some(ConsoleEvent::Joined {
        player: PlayerRef::new(id, name),
    })
}

// `NAME disconnecting: reason`
fn parse_leave(line: &str) -> Option<ConsoleEvent> {
    let at = line.rfind(LEAVE_MARKER)?;
    let name = &line[..at];
    if !is_player_name(name) {
        return Some(ConsoleEvent::Unrecognized);
    }
    Some(ConsoleEvent::Left {
        name: name.to_string(),
    })
}

// `VICTIM was killed by KILLER` / `VICTIM died (cause)`
fn parse_kill(line: &str) -> Option<ConsoleEvent> {
    if let Some(at) = line.rfind(KILL_MARKER) {
        let victim = &line[..at];
        let killer = &line[at + KILL_MARKER.len()..];
        if !is_player_name(victim) {
            return Some(ConsoleEvent::Unrecognized);
        }
        let killer = if is_player_name(killer) {
            Some(killer.to_string())
        } else {
            None
        };
        return Some(ConsoleEvent::Kill {
            victim: victim.to_string(),
            killer,
        });
    }
    if let Some(at) = line.rfind(DEATH_MARKER) {
        if !line.ends_with(')') {
            return None;
        }
        let victim = &line[..at];
        if !is_player_name(victim) {
            return Some(ConsoleEvent::Unrecognized);
        }
        return Some(ConsoleEvent::Kill {
            victim: victim.to_string(),
            killer: None,
        });
    }
    None
}

/// Decodes the `playerlist` response into stable player references,
/// dropping any roster entry that fails the player-name filter.
pub fn parse_roster(message: &str) -> Result<Vec<PlayerRef>, serde_json::Error> {
    let entries: Vec<RosterEntry> = serde_json::from_str(message)?;
    Ok(entries
        .into_iter()
        .filter(|e| is_player_name(&e.display_name))
        .map(|e| PlayerRef::new(e.steam_id, e.display_name))
        .collect())
}

/// Decodes the `teaminfo` response.
pub fn parse_team(message: &str) -> Result<TeamInfo, serde_json::Error> {
    serde_json::from_str(message)
}

/// Decodes the `zone.list` response.
pub fn parse_zone_list(message: &str) -> Result<Vec<LiveZone>, serde_json::Error> {
    serde_json::from_str(message)
}
