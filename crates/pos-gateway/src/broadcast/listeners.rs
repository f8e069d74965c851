//! In-process event listeners
//!
//! Same-process observers of gateway events, independent of any network client.

use crate::events::{EventKind, GatewayEvent};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked synchronously for every matching event
pub type Listener = Arc<dyn Fn(&GatewayEvent) + Send + Sync>;

/// Handle returned by [`ListenerRegistry::on`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    kind: EventKind,
    listener: Listener,
}

/// Listener table keyed by event kind
pub struct ListenerRegistry {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to one kind of event
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push(Entry {
            id,
            kind,
            listener: Arc::new(listener),
        });
        id
    }

    /// Unsubscribe; returns `false` for an unknown id
    pub fn off(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    /// Call every listener of the event's kind, in registration order
    ///
    /// Listeners run outside the table lock, so they may subscribe, unsubscribe
    /// or publish from inside the callback.
    pub fn dispatch(&self, event: &GatewayEvent) -> usize {
        let kind = event.kind();
        let matching: Vec<Listener> = self
            .entries
            .read()
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| entry.listener.clone())
            .collect();

        for listener in &matching {
            listener(event);
        }

        matching.len()
    }

    #[cfg(test)]
    fn listener_count(&self, kind: &EventKind) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|entry| &entry.kind == kind)
            .count()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.entries.read().len())
            .finish()
    }
}
