//! Protocol module - Defines the wire protocol between game and companion
//!
//! Every TCP message is a frame:
//! - 4 bytes payload length (little-endian)
//! - 1 byte channel
//! - Variable length payload
//!
//! Channels multiplex heartbeats, configuration, graph updates, local-map
//! data and commands over one connection.

mod codec;
mod message;

pub use codec::*;
pub use message::*;

/// Default TCP port for sessions
pub const TCP_PORT: u16 = 27000;

/// Default UDP port for discovery
pub const UDP_PORT: u16 = 28000;

/// Language announced on the config channel
pub const DEFAULT_LANG: &str = "en";

/// Game version announced on the config channel
pub const DEFAULT_VERSION: &str = "1.1.30.0";
