//! Registry of live connections.
//!
//! Connections are looked up by [`ConnectionId`]. The registry is an
//! explicit object handed to clients, so several independent registries can
//! coexist in one process.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::{ConnectionHandle, ConnectionId};

/// Cloneable, shared map of connection handles.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<Mutex<HashMap<ConnectionId, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle, replacing any entry with the same id.
    pub fn insert(&self, handle: ConnectionHandle) {
        self.connections.lock().insert(handle.id(), handle);
    }

    /// Add a handle and remove it again once the connection is closed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn track(&self, handle: ConnectionHandle) {
        let id = handle.id();
        self.insert(handle.clone());

        let registry = self.clone();
        tokio::spawn(async move {
            handle.wait_closed().await;
            registry.remove(id);
            tracing::debug!("connection {} unregistered", id);
        });
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.lock().get(&id).cloned()
    }

    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.lock().remove(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Ask every registered connection to stop.
    pub fn stop_all(&self) {
        let handles: Vec<_> = self.connections.lock().values().cloned().collect();
        for handle in handles {
            handle.stop();
        }
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
