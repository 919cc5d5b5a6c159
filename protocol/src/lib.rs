use serde::{Deserialize, Serialize};

pub mod events;

/// Client name advertised in every outgoing command frame.
pub const CLIENT_NAME: &str = "ZorpSync";

/// Identifier the game server stamps on unsolicited console output.
pub const EVENT_IDENTIFIER: i64 = 0;

/// Outgoing command frame. The web console expects PascalCase keys and
/// echoes `Identifier` back on the matching response.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct CommandFrame {
    pub identifier: i64,
    pub message: String,
    pub name: String,
}

impl CommandFrame {
    pub fn new(identifier: i64, message: impl Into<String>) -> Self {
        Self {
            identifier,
            message: message.into(),
            name: CLIENT_NAME.to_string(),
        }
    }
}

/// Incoming frame: either a correlated command response (`Identifier > 0`)
/// or uncorrelated console output (`Identifier <= 0`).
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseFrame {
    pub identifier: i64,
    pub message: String,
    #[serde(rename = "Type", default)]
    pub kind: String,
}

impl ResponseFrame {
    pub fn is_event(&self) -> bool {
        self.identifier <= EVENT_IDENTIFIER
    }
}

/// Stable platform identity plus the display name seen in console output.
///
/// All bookkeeping keys off `id`; `name` is a denormalized label that may
/// change between sessions and is never used for identity comparisons.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct PlayerRef {
    pub id: String,
    pub name: String,
}

impl PlayerRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One entry of the `playerlist` roster response.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct RosterEntry {
    pub steam_id: String,
    pub display_name: String,
    #[serde(default)]
    pub ping: u32,
    #[serde(default)]
    pub connected_seconds: u64,
}

/// The `teaminfo` response: the owner's in-game team roster.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct TeamInfo {
    #[serde(default)]
    pub team_id: u64,
    pub leader_id: String,
    pub members: Vec<RosterEntry>,
}

/// One entry of the `zone.list` response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct LiveZone {
    pub id: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub owner_name: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub radius: f32,
    #[serde(default)]
    pub color: String,
}
