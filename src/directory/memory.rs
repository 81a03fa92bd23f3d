//! In-process `RemoteDirectory` with per-connection transport simulation.
//!
//! DESIGN
//! ======
//! One `MemoryDirectory` is the shared store; each client talks to it
//! through its own `MemoryConnection`. A connection can be taken offline
//! (calls fail with `Unavailable`), slowed down (every call sleeps first),
//! or disconnected outright, which runs its `on_disconnect_remove` hooks and
//! drops its subscribers exactly like a server noticing a dead socket.
//!
//! Callbacks run synchronously after the store lock is released, inside the
//! writer's call. Only subscribers whose snapshot actually changed are told.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use super::{ChangeCallback, RemoteDirectory, Subscription, paths};
use crate::error::DirectoryError;

// =============================================================================
// STORE
// =============================================================================

struct Subscriber {
    connection: u64,
    path: Vec<String>,
    callback: ChangeCallback,
}

struct Store {
    root: Value,
    subscribers: HashMap<u64, Subscriber>,
    disconnect_hooks: HashMap<u64, Vec<String>>,
    offline: HashSet<u64>,
    latency: HashMap<u64, Duration>,
    next_id: u64,
    mutations: u64,
}

impl Store {
    fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
            subscribers: HashMap::new(),
            disconnect_hooks: HashMap::new(),
            offline: HashSet::new(),
            latency: HashMap::new(),
            next_id: 1,
            mutations: 0,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn ensure_online(&self, connection: u64) -> Result<(), DirectoryError> {
        if self.offline.contains(&connection) {
            return Err(DirectoryError::Unavailable(format!("connection {connection} is offline")));
        }
        Ok(())
    }

    /// Apply a write (or a removal when `value` is `None`) and collect the
    /// notifications it causes.
    fn mutate(&mut self, segs: &[&str], value: Option<Value>) -> Vec<(ChangeCallback, Option<Value>)> {
        let affected: Vec<(u64, Option<Value>)> = self
            .subscribers
            .iter()
            .filter(|(_, sub)| overlaps(&sub.path, segs))
            .map(|(id, sub)| (*id, get_at(&self.root, &sub.path).cloned()))
            .collect();

        match value.map(strip_nulls) {
            Some(v) if !is_empty_node(&v) => set_at(&mut self.root, segs, v),
            _ => remove_at(&mut self.root, segs),
        }
        self.mutations += 1;

        affected
            .into_iter()
            .filter_map(|(id, before)| {
                let sub = self.subscribers.get(&id)?;
                let after = get_at(&self.root, &sub.path).cloned();
                (before != after).then(|| (Arc::clone(&sub.callback), after))
            })
            .collect()
    }
}

fn lock(store: &Mutex<Store>) -> MutexGuard<'_, Store> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

fn notify(pending: Vec<(ChangeCallback, Option<Value>)>) {
    for (callback, value) in pending {
        callback(value);
    }
}

// =============================================================================
// TREE HELPERS
// =============================================================================

/// True when one path is a prefix of the other.
fn overlaps(sub_path: &[String], segs: &[&str]) -> bool {
    sub_path.iter().zip(segs.iter()).all(|(a, b)| a == b)
}

fn get_at<'a, S: AsRef<str>>(root: &'a Value, segs: &[S]) -> Option<&'a Value> {
    let mut cur = root;
    for seg in segs {
        cur = cur.as_object()?.get(seg.as_ref())?;
    }
    if is_empty_node(cur) { None } else { Some(cur) }
}

fn set_at(root: &mut Value, segs: &[&str], value: Value) {
    let Some((last, parents)) = segs.split_last() else {
        *root = if value.is_object() { value } else { Value::Object(Map::new()) };
        return;
    };
    let mut cur = root;
    for seg in parents {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        let Some(obj) = cur.as_object_mut() else {
            return;
        };
        cur = obj.entry((*seg).to_owned()).or_insert_with(|| Value::Object(Map::new()));
    }
    if !cur.is_object() {
        *cur = Value::Object(Map::new());
    }
    if let Some(obj) = cur.as_object_mut() {
        obj.insert((*last).to_owned(), value);
    }
}

/// Remove the node at `segs` and prune parents left empty.
fn remove_at(node: &mut Value, segs: &[&str]) {
    let Some((first, rest)) = segs.split_first() else {
        *node = Value::Object(Map::new());
        return;
    };
    let Some(obj) = node.as_object_mut() else {
        return;
    };
    if rest.is_empty() {
        obj.remove(*first);
        return;
    }
    if let Some(child) = obj.get_mut(*first) {
        remove_at(child, rest);
        if is_empty_node(child) {
            obj.remove(*first);
        }
    }
}

fn is_empty_node(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(obj) => obj.is_empty(),
        _ => false,
    }
}

/// Nulls are absence in a keyed store; drop them before storing.
fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.into_iter()
                .map(|(k, v)| (k, strip_nulls(v)))
                .filter(|(_, v)| !is_empty_node(v))
                .collect(),
        ),
        other => other,
    }
}

// =============================================================================
// DIRECTORY
// =============================================================================

/// Shared in-memory store. Clone to share between clients.
#[derive(Clone)]
pub struct MemoryDirectory {
    store: Arc<Mutex<Store>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self { store: Arc::new(Mutex::new(Store::new())) }
    }

    /// Open a new client connection to this store.
    #[must_use]
    pub fn connect(&self) -> MemoryConnection {
        let id = lock(&self.store).allocate_id();
        MemoryConnection { id, store: Arc::clone(&self.store) }
    }

    /// Simulate the transport of `connection` dropping: its subscribers go
    /// away, its disconnect hooks run, and it stays offline until
    /// `set_online(true)`.
    pub fn disconnect(&self, connection: &MemoryConnection) {
        let pending = {
            let mut store = lock(&self.store);
            store.subscribers.retain(|_, sub| sub.connection != connection.id);
            store.offline.insert(connection.id);
            let hooks = store.disconnect_hooks.remove(&connection.id).unwrap_or_default();
            debug!(connection = connection.id, hooks = hooks.len(), "transport dropped; running disconnect hooks");
            let mut pending = Vec::new();
            for path in hooks {
                pending.extend(store.mutate(&paths::segments(&path), None));
            }
            pending
        };
        notify(pending);
    }

    /// Server-side write that bypasses every connection.
    pub fn put(&self, path: &str, value: Value) {
        let pending = lock(&self.store).mutate(&paths::segments(path), Some(value));
        notify(pending);
    }

    /// Current value at `path`, read directly from the store.
    #[must_use]
    pub fn snapshot(&self, path: &str) -> Option<Value> {
        get_at(&lock(&self.store).root, &paths::segments(path)).cloned()
    }

    /// Number of writes and removals applied so far.
    #[must_use]
    pub fn mutation_count(&self) -> u64 {
        lock(&self.store).mutations
    }

    /// Paths registered for removal when `connection` drops.
    #[must_use]
    pub fn disconnect_hooks(&self, connection: &MemoryConnection) -> Vec<String> {
        lock(&self.store).disconnect_hooks.get(&connection.id).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.store).subscribers.len()
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

/// One client's view of a `MemoryDirectory`.
pub struct MemoryConnection {
    id: u64,
    store: Arc<Mutex<Store>>,
}

impl MemoryConnection {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Toggle whether calls on this connection reach the store.
    pub fn set_online(&self, online: bool) {
        let mut store = lock(&self.store);
        if online {
            store.offline.remove(&self.id);
        } else {
            store.offline.insert(self.id);
        }
    }

    /// Delay every subsequent call on this connection by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.store).latency.insert(self.id, latency);
    }

    async fn round_trip(&self) {
        let latency = lock(&self.store).latency.get(&self.id).copied();
        if let Some(latency) = latency.filter(|d| !d.is_zero()) {
            tokio::time::sleep(latency).await;
        }
    }

    fn apply(&self, path: &str, value: Option<Value>) -> Result<(), DirectoryError> {
        let segs = paths::segments(path);
        if segs.is_empty() {
            return Err(DirectoryError::InvalidPath(path.to_owned()));
        }
        let pending = {
            let mut store = lock(&self.store);
            store.ensure_online(self.id)?;
            store.mutate(&segs, value)
        };
        notify(pending);
        Ok(())
    }
}

#[async_trait]
impl RemoteDirectory for MemoryConnection {
    async fn write(&self, path: &str, value: Value) -> Result<(), DirectoryError> {
        self.round_trip().await;
        self.apply(path, Some(value))
    }

    async fn read(&self, path: &str) -> Result<Option<Value>, DirectoryError> {
        self.round_trip().await;
        let store = lock(&self.store);
        store.ensure_online(self.id)?;
        Ok(get_at(&store.root, &paths::segments(path)).cloned())
    }

    async fn remove(&self, path: &str) -> Result<(), DirectoryError> {
        self.round_trip().await;
        self.apply(path, None)
    }

    fn subscribe(&self, path: &str, on_change: ChangeCallback) -> Result<Subscription, DirectoryError> {
        let mut store = lock(&self.store);
        store.ensure_online(self.id)?;
        let id = store.allocate_id();
        store.subscribers.insert(
            id,
            Subscriber {
                connection: self.id,
                path: paths::segments(path).into_iter().map(ToOwned::to_owned).collect(),
                callback: on_change,
            },
        );
        let weak: Weak<Mutex<Store>> = Arc::downgrade(&self.store);
        Ok(Subscription::new(move || {
            if let Some(store) = weak.upgrade() {
                lock(&store).subscribers.remove(&id);
            }
        }))
    }

    async fn on_disconnect_remove(&self, path: &str) -> Result<(), DirectoryError> {
        self.round_trip().await;
        let mut store = lock(&self.store);
        store.ensure_online(self.id)?;
        let hooks = store.disconnect_hooks.entry(self.id).or_default();
        if !hooks.iter().any(|p| p == path) {
            hooks.push(path.to_owned());
        }
        Ok(())
    }

    async fn cancel_disconnect_remove(&self, path: &str) -> Result<(), DirectoryError> {
        self.round_trip().await;
        let mut store = lock(&self.store);
        store.ensure_online(self.id)?;
        if let Some(hooks) = store.disconnect_hooks.get_mut(&self.id) {
            hooks.retain(|p| p != path);
            if hooks.is_empty() {
                store.disconnect_hooks.remove(&self.id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
