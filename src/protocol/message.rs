//! Protocol message definitions
//!
//! JSON payloads carried on the config and command channels.

use serde::{Deserialize, Serialize};

use super::{DEFAULT_LANG, DEFAULT_VERSION};

/// Server announcement sent on the config channel when a session opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub lang: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            lang: DEFAULT_LANG.to_string(),
            version: DEFAULT_VERSION.to_string(),
        }
    }
}

/// Client-to-server command on the command channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    #[serde(rename = "type")]
    pub kind: i64,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub id: u64,
}

impl CommandMessage {
    pub fn new(kind: i64, args: serde_json::Value, id: u64) -> Self {
        Self { kind, args, id }
    }
}
