//! Connection registry: the set of open connections.
//!
//! Membership is guarded by one `RwLock`. Iteration always works on a
//! cloned snapshot, so callbacks may unregister members freely.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;

use super::connection::{Connection, ConnectionId};

/// Open connections keyed by id, in accept order.
pub struct ConnectionRegistry {
    connections: RwLock<BTreeMap<ConnectionId, Arc<Connection>>>,
    len_tx: watch::Sender<usize>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            connections: RwLock::new(BTreeMap::new()),
            len_tx,
        }
    }

    /// Add a connection. Returns the new size.
    pub fn register(&self, conn: Arc<Connection>) -> usize {
        self.register_with(conn, |_, _| {})
    }

    /// Add a connection and run `on_registered` while the write lock is held.
    ///
    /// No broadcast can observe the connection before `on_registered` returns.
    pub fn register_with<F>(&self, conn: Arc<Connection>, on_registered: F) -> usize
    where
        F: FnOnce(&Connection, usize),
    {
        let mut connections = self.connections.write();
        let _ = connections.insert(conn.id(), Arc::clone(&conn));
        let len = connections.len();
        on_registered(&conn, len);
        let _ = self.len_tx.send_replace(len);
        len
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write();
        let removed = connections.remove(&id).is_some();
        if removed {
            let _ = self.len_tx.send_replace(connections.len());
        }
        removed
    }

    /// Look up a connection by id.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    /// Current members in accept order.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Apply `f` to a snapshot of the current members.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Connection>),
    {
        for conn in &self.snapshot() {
            f(conn);
        }
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Watch the registry size.
    pub fn subscribe_len(&self) -> watch::Receiver<usize> {
        self.len_tx.subscribe()
    }

    /// Wait until the registry is empty. Returns `false` on timeout.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe_len();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|len| *len == 0)).await,
            Ok(Ok(_))
        )
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
