// ── Stream registry ──
//
// The table of live entity connections, keyed by entity. Every mutation is
// a single DashMap entry operation, so a connect racing a disconnect or a
// scheduled reconnect for the same key resolves under one shard lock.
//
// Invariant: at most one non-closed connection per key.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::connection::EntityConnection;

/// Process-wide table of entity connections.
///
/// Cheaply cloneable; clones share the same table. Constructed explicitly
/// (there is no global instance), so tests can use a fresh one per case.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    entries: DashMap<String, Arc<EntityConnection>>,
    next_generation: AtomicU64,
}

/// Non-owning handle held by read loops.
#[derive(Clone)]
pub(crate) struct WeakRegistry(Weak<RegistryInner>);

impl WeakRegistry {
    pub(crate) fn upgrade(&self) -> Option<StreamRegistry> {
        self.0.upgrade().map(|inner| StreamRegistry { inner })
    }
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live connection for `key`, or insert the one built by `open`.
    ///
    /// `open` receives the generation number for the new connection and runs
    /// while the key's shard is locked, so it must not touch the registry.
    /// The boolean is `true` when a new connection was inserted.
    pub fn connect_or_reuse<F>(&self, key: &str, open: F) -> (Arc<EntityConnection>, bool)
    where
        F: FnOnce(u64) -> Arc<EntityConnection>,
    {
        let entry = self.inner.entries.entry(key.to_owned());

        if let Entry::Occupied(ref occupied) = entry {
            let existing = occupied.get();
            if existing.status().is_live() && !existing.is_closed() {
                return (Arc::clone(existing), false);
            }
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let connection = open(generation);
        entry.insert(Arc::clone(&connection));
        (connection, true)
    }

    /// Close and remove the connection for `key`.
    ///
    /// Returns `false` (and does nothing) if there was none.
    pub fn disconnect(&self, key: &str) -> bool {
        match self.inner.entries.remove(key) {
            Some((_, connection)) => {
                connection.close();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<EntityConnection>> {
        self.inner
            .entries
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// `true` if `key` still maps to the open connection of `generation`.
    pub fn is_current(&self, key: &str, generation: u64) -> bool {
        self.inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.generation() == generation && !entry.is_closed())
    }

    /// Remove `key` only if it still maps to `generation`.
    ///
    /// Used by a read loop cleaning up after itself; a newer connection for
    /// the same key is never touched.
    pub fn remove_if_current(&self, key: &str, generation: u64) -> bool {
        self.inner
            .entries
            .remove_if(key, |_, connection| connection.generation() == generation)
            .is_some()
    }

    /// Keys with a registered connection, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Remove every connection, returning them without closing them.
    pub fn drain(&self) -> Vec<Arc<EntityConnection>> {
        self.keys()
            .iter()
            .filter_map(|key| self.inner.entries.remove(key))
            .map(|(_, connection)| connection)
            .collect()
    }

    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry(Arc::downgrade(&self.inner))
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
