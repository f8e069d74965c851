//! Connection manager
//!
//! Tracks all live connections using DashMap for thread-safe access.

use super::{Connection, ConnectionId};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A registered connection and the replay-cache version its replay covered
struct Registered {
    connection: Arc<Connection>,
    replayed_through: u64,
}

/// Registry of live connections
///
/// Connections remove themselves through their teardown hook; the manager never
/// writes to a connection's socket.
pub struct ConnectionManager {
    /// Active connections by id
    connections: DashMap<ConnectionId, Registered>,

    next_id: AtomicU64,
}

impl ConnectionManager {
    /// Create a new connection manager
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id for a connection about to be spawned
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a connection whose replay covered cache updates up to
    /// `replayed_through`
    ///
    /// Returns `false` if the connection already ended before it could be
    /// registered; it is not kept in that case.
    pub fn add_connection(&self, connection: Arc<Connection>, replayed_through: u64) -> bool {
        let id = connection.id();
        self.connections.insert(
            id,
            Registered {
                connection: connection.clone(),
                replayed_through,
            },
        );

        // Its teardown hook may have fired before the insert
        if connection.is_closed() {
            self.connections.remove(&id);
            return false;
        }

        tracing::debug!(connection_id = %id, total = self.connections.len(), "Connection added");
        true
    }

    /// Remove a connection, returning it if it was registered
    pub fn remove_connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.connections.remove(&id).map(|(_, entry)| entry.connection);

        if removed.is_some() {
            tracing::debug!(connection_id = %id, total = self.connections.len(), "Connection removed");
        }

        removed
    }

    #[cfg(test)]
    pub(crate) fn get_connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|r| r.connection.clone())
    }

    /// Clone out the connections a frame should go to
    ///
    /// With `cache_version`, connections whose replay already carried that
    /// update are left out. Callers iterate the result, so a connection tearing
    /// itself down mid-way never contends with the map lock.
    fn recipients(&self, cache_version: Option<u64>) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|r| cache_version.is_none_or(|version| r.replayed_through < version))
            .map(|r| r.connection.clone())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.recipients(None)
    }

    /// Queue one encoded frame on every live connection
    ///
    /// `cache_version` marks a frame carrying a replay-cache update; it skips
    /// connections that already got that update replayed. A connection that
    /// cannot take the frame tears itself down; the others are unaffected.
    pub fn broadcast_frame(&self, frame: &Bytes, cache_version: Option<u64>) -> usize {
        let mut sent = 0;

        for connection in self.recipients(cache_version) {
            match connection.send_encoded(frame.clone()) {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::debug!(connection_id = %connection.id(), error = %e, "Broadcast skipped connection");
                }
            }
        }

        tracing::debug!(sent = sent, "Frame broadcast to all connections");

        sent
    }

    /// Remove and return every connection
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|r| *r.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.remove_connection(id))
            .collect()
    }

    /// Get the total number of active connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    #[cfg(test)]
    pub(crate) fn has_connection(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connections.len())
            .finish()
    }
}
