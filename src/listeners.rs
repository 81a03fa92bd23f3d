//! Callback registry shared by the session service, the sync engine, and
//! the room store.
//!
//! Registering returns a `Subscription`; dropping it removes the callback.
//! Callbacks are invoked in registration order from a snapshot taken outside
//! the lock, so a callback may register or drop listeners without deadlock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::directory::Subscription;

struct Registry<F: ?Sized> {
    next_id: u64,
    entries: BTreeMap<u64, Arc<F>>,
}

pub struct ListenerSet<F: ?Sized> {
    inner: Arc<Mutex<Registry<F>>>,
}

impl<F: ?Sized> Clone for ListenerSet<F> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<F: ?Sized + Send + Sync + 'static> Default for ListenerSet<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized + Send + Sync + 'static> ListenerSet<F> {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Registry { next_id: 1, entries: BTreeMap::new() })) }
    }

    fn lock(&self) -> MutexGuard<'_, Registry<F>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, listener: Arc<F>) -> Subscription {
        let id = {
            let mut registry = self.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.insert(id, listener);
            id
        };
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().unwrap_or_else(PoisonError::into_inner).entries.remove(&id);
            }
        })
    }

    /// Current listeners in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.lock().entries.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}
