//! Pipboy - companion-device protocol
//!
//! Mirrors a game's internal state (inventory, map, quests, player stats) to a
//! remote viewer and accepts commands back.
//!
//! - [`format`] converts between wire bytes and flattened `(Id, Value)` items
//! - [`model`] holds the object graph with path addressing and listeners
//! - [`protocol`] defines the channel-multiplexed frame format
//! - [`network`] runs server and client sessions over TCP
//! - [`discovery`] finds peers over UDP broadcast
//! - [`console`] inspects and edits a live model from text commands

pub mod config;
pub mod console;
pub mod discovery;
pub mod format;
pub mod model;
pub mod network;
pub mod protocol;
pub mod snapshot;
