//! Engine configuration: the set of game servers to supervise, the store
//! location, and the timing knobs. Loaded once at startup from a JSON file.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub servers: Vec<ServerConfig>,
    pub store_path: PathBuf,
    #[serde(default)]
    pub tuning: EngineTuning,
}

/// One supervised game server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Stable identifier used to key zones and presence state.
    pub id: String,
    pub host: String,
    pub port: u16,
    /// Console password; part of the connect path on the wire.
    pub password: String,
}

impl ServerConfig {
    pub fn endpoint(&self) -> String {
        format!("ws://{}:{}/{}", self.host, self.port, self.password)
    }
}

/// Timing knobs. Production runs on the defaults; tests compress them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineTuning {
    pub command_timeout_ms: u64,
    pub roster_poll_secs: u64,
    pub reconcile_secs: u64,
    pub expire_sweep_secs: u64,
    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,
    /// Consecutive transport failures before the server counts as degraded.
    pub degraded_after_failures: u32,
    /// Multiplier applied to the reconcile cadence while degraded.
    pub degraded_factor: u32,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            command_timeout_ms: 7_000,
            roster_poll_secs: 120,
            reconcile_secs: 420,
            expire_sweep_secs: 300,
            reconnect_min_ms: 1_000,
            reconnect_max_ms: 60_000,
            degraded_after_failures: 5,
            degraded_factor: 4,
        }
    }
}

pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
