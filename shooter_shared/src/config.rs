//! Configuration system.
//!
//! Loads game configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Server listen address, e.g. `127.0.0.1:41000`.
    pub server_addr: String,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// Interval between deferred-binding retries, in milliseconds.
    #[serde(default = "default_bind_retry_ms")]
    pub bind_retry_ms: u64,
    /// Replicate the ragdoll flag like other replicated fields.
    ///
    /// Off by default: observers then learn of ragdoll transitions only
    /// through action responses and their own hp-driven transitions, which
    /// leaves late joiners blind to current ragdoll state.
    #[serde(default)]
    pub replicate_ragdoll: bool,
    /// Player name (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Magazine capacity for the stock rifle.
    #[serde(default = "default_rifle_magazine")]
    pub rifle_magazine: u32,
}

fn default_bind_retry_ms() -> u64 {
    100
}

fn default_player_name() -> String {
    "Player".to_string()
}

fn default_rifle_magazine() -> u32 {
    30
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:41000".to_string(),
            tick_hz: 64,
            bind_retry_ms: default_bind_retry_ms(),
            replicate_ragdoll: false,
            player_name: default_player_name(),
            rifle_magazine: default_rifle_magazine(),
        }
    }
}

impl GameConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
