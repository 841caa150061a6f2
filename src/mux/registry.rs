//! Shared connection and subscriber registries.
//!
//! Both maps live behind one lock so create-or-join and last-detach are
//! atomic:
//!
//! ```text
//! ┌──────────────────────── Registry ─────────────────────────┐
//! │  connections: endpoint → SharedEntry { handle, keep_alive }│
//! │  subscribers: endpoint → { SubscriberId → record }         │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Invariants:
//! - An endpoint is in `subscribers` if and only if it is in `connections`.
//! - A subscriber set is never empty.
//! - Exclusive connections are never registered.
//!
//! No subscriber callback runs while the lock is held.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::identifiers::{ConnectionId, SubscriberId};
use crate::transport::ConnectionHandle;

use super::heartbeat::KeepAlive;
use super::subscriber::SubscriberRecord;

// ============================================================================
// Types
// ============================================================================

/// Registered shared connection.
pub(crate) struct SharedEntry {
    pub(crate) handle: ConnectionHandle,
    pub(crate) keep_alive: Option<KeepAlive>,
}

type SubscriberSet = FxHashMap<SubscriberId, Arc<SubscriberRecord>>;

// ============================================================================
// RegistryState
// ============================================================================

/// Registry contents, accessed under the registry lock.
#[derive(Default)]
pub(crate) struct RegistryState {
    connections: FxHashMap<String, SharedEntry>,
    subscribers: FxHashMap<String, SubscriberSet>,
}

impl RegistryState {
    /// Returns the handle registered for `endpoint`.
    pub(crate) fn handle(&self, endpoint: &str) -> Option<&ConnectionHandle> {
        self.connections.get(endpoint).map(|entry| &entry.handle)
    }

    /// Registers a new shared connection together with its first subscriber.
    pub(crate) fn insert(&mut self, endpoint: &str, entry: SharedEntry, record: Arc<SubscriberRecord>) {
        self.connections.insert(endpoint.to_string(), entry);
        self.subscribers
            .entry(endpoint.to_string())
            .or_default()
            .insert(record.id(), record);
    }

    /// Adds a subscriber to an existing shared connection.
    ///
    /// Returns `false` if `endpoint` has no connection.
    pub(crate) fn join(&mut self, endpoint: &str, record: Arc<SubscriberRecord>) -> bool {
        if !self.connections.contains_key(endpoint) {
            return false;
        }
        self.subscribers
            .entry(endpoint.to_string())
            .or_default()
            .insert(record.id(), record);
        true
    }

    /// Removes a subscriber of connection `connection`.
    ///
    /// If it was the last one, the connection entry is removed as well and
    /// returned so the caller can close it outside the lock.
    pub(crate) fn leave(
        &mut self,
        endpoint: &str,
        subscriber: SubscriberId,
        connection: ConnectionId,
    ) -> Option<SharedEntry> {
        if self.handle(endpoint).map(ConnectionHandle::id) != Some(connection) {
            return None;
        }

        let set = self.subscribers.get_mut(endpoint)?;
        set.remove(&subscriber);
        if !set.is_empty() {
            return None;
        }

        self.subscribers.remove(endpoint);
        self.connections.remove(endpoint)
    }

    /// Returns the current subscribers of connection `connection`.
    ///
    /// Empty if `endpoint` is now served by a different connection.
    pub(crate) fn subscribers_of(
        &self,
        endpoint: &str,
        connection: ConnectionId,
    ) -> Vec<Arc<SubscriberRecord>> {
        if self.handle(endpoint).map(ConnectionHandle::id) != Some(connection) {
            return Vec::new();
        }

        self.subscribers
            .get(endpoint)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes connection `connection` and returns its subscribers.
    ///
    /// Used when the connection closed on its own; the endpoint is free for a
    /// new connection before anyone is notified.
    pub(crate) fn retire(
        &mut self,
        endpoint: &str,
        connection: ConnectionId,
    ) -> (Vec<Arc<SubscriberRecord>>, Option<SharedEntry>) {
        if self.handle(endpoint).map(ConnectionHandle::id) != Some(connection) {
            return (Vec::new(), None);
        }

        let records = self
            .subscribers
            .remove(endpoint)
            .map(|set| set.into_values().collect())
            .unwrap_or_default();
        (records, self.connections.remove(endpoint))
    }

    /// Checks the registry invariants.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        self.connections.len() == self.subscribers.len()
            && self
                .subscribers
                .iter()
                .all(|(endpoint, set)| !set.is_empty() && self.connections.contains_key(endpoint))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of shared connections, keyed by exact endpoint string.
///
/// Cheap to clone; clones share the same state. Starts empty and only holds
/// endpoints that have at least one subscriber.
#[derive(Clone, Default)]
pub struct Registry {
    state: Arc<Mutex<RegistryState>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("endpoints", &self.endpoints())
            .finish()
    }
}

impl Registry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of shared connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Returns the number of subscribers on `endpoint`.
    #[must_use]
    pub fn subscriber_count(&self, endpoint: &str) -> usize {
        self.state.lock().subscribers.get(endpoint).map_or(0, |set| set.len())
    }

    /// Returns `true` if `endpoint` has a shared connection.
    #[inline]
    #[must_use]
    pub fn contains(&self, endpoint: &str) -> bool {
        self.state.lock().connections.contains_key(endpoint)
    }

    /// Returns the shared connection for `endpoint`.
    #[must_use]
    pub fn handle(&self, endpoint: &str) -> Option<ConnectionHandle> {
        self.state.lock().handle(endpoint).cloned()
    }

    /// Returns all endpoints with a shared connection, sorted.
    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self.state.lock().connections.keys().cloned().collect();
        endpoints.sort_unstable();
        endpoints
    }

    /// Closes every shared connection and empties the registry.
    ///
    /// Subscribers are not notified; their attachments become inert.
    pub fn clear(&self) {
        let (entries, records) = {
            let mut state = self.state.lock();
            let records: Vec<_> = state
                .subscribers
                .drain()
                .flat_map(|(_, set)| set.into_values())
                .collect();
            let entries: Vec<_> = state.connections.drain().map(|(_, entry)| entry).collect();
            (entries, records)
        };

        for record in records {
            record.deactivate();
        }

        for entry in entries {
            debug!(endpoint = %entry.handle.endpoint(), "Closing shared connection on clear");
            entry.handle.close_intentionally();
        }
    }

    /// Locks the registry state.
    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock()
    }

    /// Returns a reference that does not keep the registry alive.
    #[inline]
    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry(Arc::downgrade(&self.state))
    }

    /// Checks the registry invariants.
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        self.state.lock().is_consistent()
    }
}

// ============================================================================
// WeakRegistry
// ============================================================================

/// Registry reference held by connection listeners.
#[derive(Clone)]
pub(crate) struct WeakRegistry(Weak<Mutex<RegistryState>>);

impl WeakRegistry {
    /// Returns the current subscribers of connection `connection`.
    pub(crate) fn subscribers_of(
        &self,
        endpoint: &str,
        connection: ConnectionId,
    ) -> Vec<Arc<SubscriberRecord>> {
        self.0
            .upgrade()
            .map(|state| state.lock().subscribers_of(endpoint, connection))
            .unwrap_or_default()
    }

    /// Retires connection `connection`; see [`RegistryState::retire`].
    ///
    /// The removed entry is dropped after the lock is released.
    pub(crate) fn retire(&self, endpoint: &str, connection: ConnectionId) -> Vec<Arc<SubscriberRecord>> {
        let Some(state) = self.0.upgrade() else {
            return Vec::new();
        };

        let (records, entry) = state.lock().retire(endpoint, connection);
        if entry.is_some() {
            debug!(endpoint, connection_id = %connection, subscribers = records.len(), "Shared connection retired");
        }
        drop(entry);
        records
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::mux::options::Options;
    use crate::mux::subscriber::Subscriber;
    use crate::transport::{MemoryTransport, TransportKind};

    fn entry(endpoint: &str) -> SharedEntry {
        let transport = Arc::new(MemoryTransport::new(endpoint, TransportKind::Socket));
        SharedEntry {
            handle: ConnectionHandle::new(endpoint, TransportKind::Socket, transport),
            keep_alive: None,
        }
    }

    fn record(endpoint: &str) -> Arc<SubscriberRecord> {
        Arc::new(SubscriberRecord::new(
            endpoint,
            Subscriber::new(),
            Options::shared().into_shared(),
        ))
    }

    #[test]
    fn test_join_requires_connection() {
        let registry = Registry::new();
        assert!(!registry.lock().join("mem://a", record("mem://a")));
        assert_eq!(registry.subscriber_count("mem://a"), 0);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_last_leave_returns_entry() {
        let registry = Registry::new();
        let first = record("mem://a");
        let second = record("mem://a");
        let shared = entry("mem://a");
        let id = shared.handle.id();

        {
            let mut state = registry.lock();
            state.insert("mem://a", shared, Arc::clone(&first));
            assert!(state.join("mem://a", Arc::clone(&second)));
        }
        assert_eq!(registry.subscriber_count("mem://a"), 2);

        assert!(registry.lock().leave("mem://a", first.id(), id).is_none());
        assert!(registry.contains("mem://a"));

        let removed = registry.lock().leave("mem://a", second.id(), id);
        assert_eq!(removed.map(|entry| entry.handle.id()), Some(id));
        assert!(!registry.contains("mem://a"));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_stale_connection_is_ignored() {
        let registry = Registry::new();
        let old = entry("mem://a");
        let old_id = old.handle.id();
        let current = entry("mem://a");
        let current_id = current.handle.id();
        let subscriber = record("mem://a");

        registry.lock().insert("mem://a", current, Arc::clone(&subscriber));
        drop(old);

        assert!(registry.lock().subscribers_of("mem://a", old_id).is_empty());
        assert!(registry.lock().leave("mem://a", subscriber.id(), old_id).is_none());
        assert_eq!(registry.lock().subscribers_of("mem://a", current_id).len(), 1);
    }

    #[test]
    fn test_weak_registry_outlives_state() {
        let registry = Registry::new();
        let weak = registry.downgrade();
        let shared = entry("mem://a");
        let id = shared.handle.id();
        registry.lock().insert("mem://a", shared, record("mem://a"));

        assert_eq!(weak.subscribers_of("mem://a", id).len(), 1);
        drop(registry);
        assert!(weak.subscribers_of("mem://a", id).is_empty());
    }

    #[test]
    fn test_retire_frees_endpoint() {
        let registry = Registry::new();
        let shared = entry("mem://a");
        let id = shared.handle.id();
        registry.lock().insert("mem://a", shared, record("mem://a"));

        let records = registry.downgrade().retire("mem://a", id);

        assert_eq!(records.len(), 1);
        assert!(!registry.contains("mem://a"));
        assert!(registry.downgrade().retire("mem://a", id).is_empty());
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_clear_closes_connections() {
        let registry = Registry::new();
        let shared = entry("mem://a");
        let handle = shared.handle.clone();
        registry.lock().insert("mem://a", shared, record("mem://a"));

        registry.clear();

        assert_eq!(registry.connection_count(), 0);
        assert!(handle.ready_state().is_closed());
        assert!(registry.is_consistent());
    }
}
