//! The graph store
//!
//! Items live in an ID-indexed arena. Writing a container records a
//! `(segment, parent)` entry for each child it references, which is all that
//! is needed to turn an ID back into a path. Entries are never pruned: a
//! child dropped from its container stays addressable through its last
//! parent until something overwrites it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::listener::{EventKind, ListenerId, ModelEvent, Registry};
use super::path::{self, ROOT_PATH};
use super::seed::startup_document;
use super::value::{Segment, Value};
use super::{Id, Item, ROOT};
use crate::format::literal;

#[derive(Debug, Clone)]
struct PathEntry {
    segment: Segment,
    parent: Id,
}

#[derive(Default)]
struct Inner {
    items: HashMap<Id, Value>,
    paths: HashMap<Id, PathEntry>,
    listeners: Registry,
}

impl Inner {
    fn clear(&mut self) {
        self.items.clear();
        self.paths.clear();
    }

    fn upsert(&mut self, id: Id, value: Value) {
        for (segment, child) in value.children() {
            if child == ROOT || child == id {
                tracing::debug!("Ignoring back reference {:#x} -> {:#x}", id, child);
                continue;
            }
            self.paths.insert(child, PathEntry { segment, parent: id });
        }
        self.items.insert(id, value);
    }

    /// Upsert a batch, returning the IDs written in order
    fn apply(&mut self, items: Vec<Item>) -> Vec<Id> {
        let mut changed = Vec::with_capacity(items.len());
        for (id, value) in items {
            self.upsert(id, value);
            changed.push(id);
        }
        changed
    }

    fn dump_into(&self, id: Id, recursive: bool, seen: &mut HashSet<Id>, out: &mut Vec<Item>) {
        if !seen.insert(id) {
            return;
        }
        let Some(value) = self.items.get(&id) else {
            tracing::debug!("Skipping unknown item {:#x}", id);
            return;
        };
        if recursive {
            for (_, child) in value.children() {
                self.dump_into(child, recursive, seen, out);
            }
        }
        out.push((id, value.clone()));
    }
}

/// Shared object graph.
///
/// Every mutation (including listener registration) takes the same write
/// lock. Listeners run after the lock is released, in registration order,
/// so they may read from the model; they must not block.
pub struct Model {
    inner: RwLock<Inner>,
}

impl Model {
    /// Create a model seeded with the startup document
    pub fn new() -> Self {
        let model = Self::empty();
        model.load(literal::load(&startup_document()));
        model
    }

    /// Create a model with no items at all
    pub fn empty() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe `listener` to events of `kind`
    pub fn register<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ModelEvent<'_>) + Send + Sync + 'static,
    {
        self.write().listeners.register(kind, Arc::new(listener))
    }

    /// Remove a listener. Unknown registrations are logged and ignored.
    pub fn unregister(&self, kind: EventKind, id: ListenerId) -> bool {
        let removed = self.write().listeners.unregister(kind, id);
        if !removed {
            tracing::warn!(
                "Could not remove listener {:?} from {}, it was not registered",
                id,
                kind
            );
        }
        removed
    }

    /// Number of listeners currently registered for `kind`
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.read().listeners.count(kind)
    }

    /// Upsert a batch of items and notify update listeners once
    pub fn update(&self, items: Vec<Item>) {
        self.write_batch(items, false);
    }

    /// Replace the whole graph with `items`
    pub fn load(&self, items: Vec<Item>) {
        self.write_batch(items, true);
    }

    fn write_batch(&self, items: Vec<Item>, replace: bool) {
        let (changed, listeners) = {
            let mut inner = self.write();
            if replace {
                inner.clear();
            }
            let changed = inner.apply(items);
            (changed, inner.listeners.snapshot(EventKind::Update))
        };

        tracing::debug!("{} {} items", if replace { "Loaded" } else { "Updated" }, changed.len());
        let event = ModelEvent::Update(&changed);
        for listener in &listeners {
            listener(&event);
        }
    }

    pub fn get_item(&self, id: Id) -> Option<Value> {
        self.read().items.get(&id).cloned()
    }

    /// IDs referenced by the container at `id`
    pub fn children(&self, id: Id) -> Vec<Id> {
        self.read()
            .items
            .get(&id)
            .map(|value| value.children().into_iter().map(|(_, child)| child).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().items.is_empty()
    }

    /// Path of `id` from the root, `None` if it was never referenced
    pub fn get_path(&self, id: Id) -> Option<String> {
        if id == ROOT {
            return Some(ROOT_PATH.to_string());
        }

        let inner = self.read();
        let mut segments = Vec::new();
        let mut current = id;
        while current != ROOT {
            let entry = inner.paths.get(&current)?;
            segments.push(entry.segment.to_string());
            if segments.len() > inner.paths.len() {
                tracing::error!("Parent chain of {:#x} does not reach the root", id);
                return None;
            }
            current = entry.parent;
        }

        let mut path = String::from(ROOT_PATH);
        for segment in segments.iter().rev() {
            path.push_str(segment);
        }
        Some(path)
    }

    /// Resolve a path expression; any mismatch yields `None`
    pub fn get_id(&self, path: &str) -> Option<Id> {
        let segments = path::parse(path)?;
        let inner = self.read();

        let mut current = ROOT;
        for segment in &segments {
            current = match (inner.items.get(&current)?, segment) {
                (Value::Dict(entries), Segment::Key(name)) => match entries.get(name) {
                    Some(child) => *child,
                    None => entries
                        .iter()
                        .find(|(key, _)| key.eq_ignore_ascii_case(name))
                        .map(|(_, child)| *child)?,
                },
                (Value::List(ids), Segment::Index(index)) => *ids.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Flatten the item at `id`.
    ///
    /// Recursive dumps emit descendants depth-first before their container;
    /// an item reachable twice is emitted once.
    pub fn dump(&self, id: Id, recursive: bool) -> Option<Vec<Item>> {
        let inner = self.read();
        if !inner.items.contains_key(&id) {
            return None;
        }
        let mut out = Vec::new();
        inner.dump_into(id, recursive, &mut HashSet::new(), &mut out);
        Some(out)
    }

    /// Forward a command to command listeners
    pub fn command(&self, kind: i64, args: &serde_json::Value) {
        let listeners = self.read().listeners.snapshot(EventKind::Command);
        let event = ModelEvent::Command { kind, args };
        for listener in &listeners {
            listener(&event);
        }
    }

    /// Forward local-map data to map listeners
    pub fn map_update(&self, data: &[u8]) {
        let listeners = self.read().listeners.snapshot(EventKind::MapUpdate);
        let event = ModelEvent::MapUpdate(data);
        for listener in &listeners {
            listener(&event);
        }
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn dict(entries: &[(&str, Id)]) -> Value {
        Value::Dict(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn recorder(model: &Model) -> (ListenerId, Arc<Mutex<Vec<Vec<Id>>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let id = model.register(EventKind::Update, move |event| {
            if let ModelEvent::Update(ids) = event {
                sink.lock().unwrap().push(ids.to_vec());
            }
        });
        (id, calls)
    }

    #[test]
    fn test_update_batches_listener_calls() {
        let model = Model::empty();
        let (_, calls_a) = recorder(&model);
        let (_, calls_b) = recorder(&model);

        model.update(vec![(5, Value::Bool(true)), (7, Value::Bool(false))]);

        assert_eq!(model.get_item(5), Some(Value::Bool(true)));
        assert_eq!(model.get_item(7), Some(Value::Bool(false)));
        assert_eq!(*calls_a.lock().unwrap(), vec![vec![5, 7]]);
        assert_eq!(*calls_b.lock().unwrap(), vec![vec![5, 7]]);
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let model = Model::empty();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            model.register(EventKind::Update, move |_| order.lock().unwrap().push(tag));
        }
        model.update(vec![(1, Value::Bool(true))]);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unregister_stops_notifications() {
        let model = Model::empty();
        let (id, calls) = recorder(&model);
        assert!(model.unregister(EventKind::Update, id));
        model.update(vec![(1, Value::Bool(true))]);
        assert!(calls.lock().unwrap().is_empty());

        // Second removal and wrong kind are harmless
        assert!(!model.unregister(EventKind::Update, id));
        assert!(!model.unregister(EventKind::Command, id));
    }

    #[test]
    fn test_listener_may_read_model() {
        let model = Arc::new(Model::empty());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reader = Arc::downgrade(&model);
        let sink = seen.clone();
        model.register(EventKind::Update, move |event| {
            if let (ModelEvent::Update(ids), Some(model)) = (event, reader.upgrade()) {
                for id in ids.iter() {
                    sink.lock().unwrap().push(model.get_path(*id));
                }
            }
        });

        model.update(vec![(0, dict(&[("Name", 1)])), (1, Value::from("X"))]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("$".to_string()), Some("$.Name".to_string())]
        );
    }

    #[test]
    fn test_paths() {
        let model = Model::empty();
        model.update(vec![
            (0, dict(&[("Inventory", 1), ("PlayerInfo", 2)])),
            (1, Value::List(vec![3, 4])),
            (2, dict(&[("PlayerName", 5)])),
            (3, Value::UInt8(1)),
            (4, Value::UInt8(2)),
            (5, Value::from("Nate")),
        ]);

        assert_eq!(model.get_path(0).as_deref(), Some("$"));
        assert_eq!(model.get_path(4).as_deref(), Some("$.Inventory[1]"));
        assert_eq!(model.get_path(5).as_deref(), Some("$.PlayerInfo.PlayerName"));
        assert_eq!(model.get_path(99), None);

        assert_eq!(model.get_id("$"), Some(0));
        assert_eq!(model.get_id("$.inventory[0]"), Some(3));
        assert_eq!(model.get_id("$.PLAYERINFO.playername"), Some(5));
    }

    #[test]
    fn test_exact_key_wins_over_case_folding() {
        let model = Model::empty();
        model.update(vec![
            (0, dict(&[("A", 1), ("a", 2)])),
            (1, Value::UInt8(1)),
            (2, Value::UInt8(2)),
        ]);

        for id in [1, 2] {
            let path = model.get_path(id).unwrap();
            assert_eq!(model.get_id(&path), Some(id), "path {}", path);
        }
    }

    #[test]
    fn test_get_id_misses() {
        let model = Model::empty();
        model.update(vec![
            (0, dict(&[("List", 1), ("Leaf", 2)])),
            (1, Value::List(vec![2])),
            (2, Value::Bool(true)),
        ]);

        assert_eq!(model.get_id("$.Missing"), None);
        assert_eq!(model.get_id("$.List[1]"), None);
        assert_eq!(model.get_id("$.List.Name"), None);
        assert_eq!(model.get_id("$[0]"), None);
        assert_eq!(model.get_id("$.Leaf.Deeper"), None);
        assert_eq!(model.get_id("List"), None);
        assert_eq!(model.get_id("$.List[x]"), None);
    }

    #[test]
    fn test_path_id_duality_on_seed() {
        let model = Model::new();
        let mut pending = vec![ROOT];
        let mut visited = 0;
        while let Some(id) = pending.pop() {
            let path = model.get_path(id).unwrap();
            assert_eq!(model.get_id(&path), Some(id), "path {}", path);
            pending.extend(model.children(id));
            visited += 1;
        }
        assert_eq!(visited, model.len());
    }

    #[test]
    fn test_seed_is_idempotent() {
        let model = Model::new();
        let first = model.dump(ROOT, true).unwrap();
        let paths: Vec<_> = (0..model.len() as Id).map(|id| model.get_path(id)).collect();

        model.load(literal::load(&startup_document()));
        assert_eq!(model.dump(ROOT, true).unwrap(), first);
        let again: Vec<_> = (0..model.len() as Id).map(|id| model.get_path(id)).collect();
        assert_eq!(paths, again);
    }

    #[test]
    fn test_seed_status_flags() {
        let model = Model::new();
        let flag = |name: &str| model.get_id(&format!("$.Status.{}", name)).and_then(|id| model.get_item(id));
        assert_eq!(flag("IsDataUnavailable"), Some(Value::Bool(true)));
        assert_eq!(flag("IsPipboyNotEquipped"), Some(Value::Bool(true)));
        assert_eq!(flag("IsPlayerDead"), Some(Value::Bool(false)));

        let color = model.get_id("$.Status.EffectColor[1]").unwrap();
        assert_eq!(model.get_item(color), Some(Value::Float32(1.0)));
    }

    #[test]
    fn test_dump_orders_descendants_first() {
        let model = Model::empty();
        model.update(vec![
            (0, Value::List(vec![1, 2])),
            (1, dict(&[("a", 3)])),
            (2, Value::Int8(-1)),
            (3, Value::from("leaf")),
        ]);

        let ids: Vec<Id> = model.dump(0, true).unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![3, 1, 2, 0]);
        assert_eq!(model.dump(1, false).unwrap(), vec![(1, dict(&[("a", 3)]))]);
        assert_eq!(model.dump(42, true), None);
    }

    #[test]
    fn test_load_clears_previous_state() {
        let model = Model::new();
        model.load(vec![(0, dict(&[("Only", 1)])), (1, Value::Bool(true))]);
        assert_eq!(model.len(), 2);
        assert_eq!(model.get_id("$.Status"), None);
        assert_eq!(model.get_id("$.Only"), Some(1));
    }

    #[test]
    fn test_load_notifies_once() {
        let model = Model::empty();
        model.update(vec![(0, Value::List(vec![99])), (99, Value::Bool(true))]);
        let (_, calls) = recorder(&model);

        model.load(vec![(0, dict(&[("A", 1)])), (1, Value::UInt8(3))]);

        assert_eq!(*calls.lock().unwrap(), vec![vec![0, 1]]);
        assert_eq!(model.get_item(99), None);
        assert_eq!(model.get_path(99), None);
    }

    #[test]
    fn test_stale_paths_are_kept() {
        let model = Model::empty();
        model.update(vec![(0, Value::List(vec![1, 2])), (1, Value::Bool(true)), (2, Value::Bool(false))]);
        model.update(vec![(0, Value::List(vec![1]))]);

        assert_eq!(model.get_path(2).as_deref(), Some("$[1]"));
        assert_eq!(model.get_id("$[1]"), None);
    }

    #[test]
    fn test_self_reference_is_not_indexed() {
        let model = Model::empty();
        model.update(vec![(0, Value::List(vec![1])), (1, Value::List(vec![1, 0]))]);
        assert_eq!(model.get_path(1).as_deref(), Some("$[0]"));
        assert_eq!(model.dump(0, true).unwrap().len(), 2);
    }

    #[test]
    fn test_end_to_end_subtree_copy() {
        let model = Model::new();
        let inventory = model.get_id("$.Inventory").unwrap();
        let next = model.len() as Id;
        model.update(vec![
            (inventory, dict(&[("Item", next)])),
            (next, dict(&[("name", next + 1)])),
            (next + 1, Value::from("X")),
        ]);

        assert_eq!(model.get_path(next + 1).as_deref(), Some("$.Inventory.Item.name"));

        let subtree = model.dump(next, true).unwrap();
        let copy = Model::empty();
        copy.update(subtree.clone());
        assert_eq!(copy.dump(next, true).unwrap(), subtree);
        assert_eq!(copy.get_item(next + 1), Some(Value::from("X")));
        assert_eq!(copy.get_path(next + 1), None);
    }

    #[test]
    fn test_command_and_map_fan_out() {
        let model = Model::empty();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        model.register(EventKind::Command, move |event| {
            if let ModelEvent::Command { kind, args } = event {
                sink.lock().unwrap().push(format!("{} {}", kind, args));
            }
        });
        let sink = seen.clone();
        model.register(EventKind::MapUpdate, move |event| {
            if let ModelEvent::MapUpdate(data) = event {
                sink.lock().unwrap().push(format!("map {}", data.len()));
            }
        });

        model.command(9, &serde_json::json!([1, 2]));
        model.map_update(&[0u8; 4]);
        assert_eq!(*seen.lock().unwrap(), vec!["9 [1,2]", "map 4"]);
        assert!(model.is_empty());
    }
}
