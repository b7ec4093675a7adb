//! Model module - The object graph mirrored between peers
//!
//! Provides:
//! - The [`Value`] sum type and ID-indexed item table
//! - A derived parent index for path addressing (`$.PlayerInfo.PlayerName`)
//! - Listeners notified of updates, commands and map data

mod listener;
mod path;
mod seed;
mod store;
mod value;

pub use listener::{EventKind, Listener, ListenerId, ModelEvent};
pub use path::{parse as parse_path, ROOT_PATH};
pub use seed::startup_document;
pub use store::Model;
pub use value::{Segment, Value};

/// Node identifier, assigned by the remote peer or sequentially when seeding
pub type Id = u32;

/// One `(id, value)` pair of a flattened graph
pub type Item = (Id, Value);

/// ID of the graph root
pub const ROOT: Id = 0;
