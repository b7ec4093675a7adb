//! Listener registry
//!
//! Listeners are kept per event kind in registration order and identified by
//! the [`ListenerId`] handed out on registration.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Id;

/// Kinds of model events listeners can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Update,
    Command,
    MapUpdate,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Update => "update",
            EventKind::Command => "command",
            EventKind::MapUpdate => "map_update",
        };
        f.write_str(name)
    }
}

/// An event delivered to listeners
#[derive(Debug, Clone, Copy)]
pub enum ModelEvent<'a> {
    /// IDs changed by one `update` batch, in batch order
    Update(&'a [Id]),
    /// A command addressed to the game
    Command {
        kind: i64,
        args: &'a serde_json::Value,
    },
    /// Opaque local-map payload
    MapUpdate(&'a [u8]),
}

impl ModelEvent<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            ModelEvent::Update(_) => EventKind::Update,
            ModelEvent::Command { .. } => EventKind::Command,
            ModelEvent::MapUpdate(_) => EventKind::MapUpdate,
        }
    }
}

/// Callback invoked for model events
pub type Listener = Arc<dyn Fn(&ModelEvent<'_>) + Send + Sync>;

/// Opaque registration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Per-kind listener lists
#[derive(Default)]
pub(super) struct Registry {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
}

impl Registry {
    pub(super) fn register(&mut self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.entry(kind).or_default().push((id, listener));
        id
    }

    pub(super) fn unregister(&mut self, kind: EventKind, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(&kind) else {
            return false;
        };
        match list.iter().position(|(registered, _)| *registered == id) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }

    /// Clone the current listeners of `kind` so they can run unlocked
    pub(super) fn snapshot(&self, kind: EventKind) -> Vec<Listener> {
        self.listeners
            .get(&kind)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    pub(super) fn count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Listener {
        Arc::new(|_: &ModelEvent<'_>| {})
    }

    #[test]
    fn test_register_and_unregister() {
        let mut registry = Registry::default();
        let a = registry.register(EventKind::Update, noop());
        let b = registry.register(EventKind::Update, noop());
        assert_ne!(a, b);
        assert_eq!(registry.count(EventKind::Update), 2);

        assert!(registry.unregister(EventKind::Update, a));
        assert_eq!(registry.count(EventKind::Update), 1);
        assert!(!registry.unregister(EventKind::Update, a));
    }

    #[test]
    fn test_unregister_wrong_kind() {
        let mut registry = Registry::default();
        let id = registry.register(EventKind::Command, noop());
        assert!(!registry.unregister(EventKind::MapUpdate, id));
        assert_eq!(registry.count(EventKind::Command), 1);
    }
}
