//! Connection registry
//!
//! Tracks every currently-upgraded connection, paired or waiting. Only used
//! for cleanup bookkeeping and the online-users count.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::connection::Connection;
use crate::types::ConnectionId;

/// Set of live connections behind a read/write lock
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection
    pub fn add(&self, conn: Arc<Connection>) {
        let mut connections = self.connections.write();
        connections.insert(conn.id(), conn);
        debug!("Total connections: {}", connections.len());
    }

    /// Deregister a connection
    ///
    /// Returns whether it was present. Removing an unknown connection is a
    /// no-op.
    pub fn remove(&self, conn: &Connection) -> bool {
        self.connections.write().remove(&conn.id()).is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    /// Point-in-time number of registered connections
    pub fn count(&self) -> usize {
        self.connections.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::connection;

    #[tokio::test]
    async fn test_add_and_count() {
        let registry = ConnectionRegistry::new();
        let (a, _pa) = connection("10.0.0.1:1");
        let (b, _pb) = connection("10.0.0.2:2");

        registry.add(a.clone());
        registry.add(b.clone());
        // Re-adding the same handle does not double count
        registry.add(a.clone());

        assert_eq!(registry.count(), 2);
        assert!(registry.contains(a.id()));
        assert!(registry.contains(b.id()));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (a, _pa) = connection("10.0.0.1:1");
        let (b, _pb) = connection("10.0.0.2:2");
        let (never_added, _pc) = connection("10.0.0.3:3");

        registry.add(a.clone());
        registry.add(b.clone());

        assert!(registry.remove(&a));
        assert!(!registry.remove(&a));
        assert!(!registry.remove(&never_added));

        assert_eq!(registry.count(), 1);
        assert!(registry.contains(b.id()));
    }
}
