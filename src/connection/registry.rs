use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::BridgeError;

use super::stats::RegistryStats;
use super::types::{ConnectionHandle, ConnectionId, Outgoing};

/// Process-wide table of live connections
pub struct ConnectionRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    next_id: AtomicU64,
    /// Slots reserved by registered (or registering) connections
    live: AtomicUsize,
    max_connections: Option<usize>,
    total_registered: AtomicU64,
    total_rejected: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_limits(None)
    }

    pub fn with_limits(max_connections: Option<usize>) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            live: AtomicUsize::new(0),
            max_connections,
            total_registered: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Register a new connection and assign it a fresh id.
    ///
    /// `sender` feeds the connection's writer.
    pub fn register(
        &self,
        sender: mpsc::Sender<Outgoing>,
    ) -> Result<Arc<ConnectionHandle>, BridgeError> {
        self.reserve_slot()?;

        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(ConnectionHandle::new(id, sender));
        self.connections.insert(id, handle.clone());
        self.total_registered.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(connection_id = %id, "Connection registered");

        Ok(handle)
    }

    /// Whether a registration right now would be refused.
    ///
    /// Advisory only: `register` makes the binding check.
    pub fn check_capacity(&self) -> Result<(), BridgeError> {
        match self.max_connections {
            Some(max) => {
                let current = self.live.load(Ordering::Acquire);
                if current >= max {
                    Err(BridgeError::CapacityExceeded { current, max })
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }

    fn reserve_slot(&self) -> Result<(), BridgeError> {
        let Some(max) = self.max_connections else {
            self.live.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        };

        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .map(|_| ())
            .map_err(|current| {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                BridgeError::CapacityExceeded { current, max }
            })
    }

    /// Remove a connection. Removing an absent id is a no-op.
    pub fn remove(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let removed = self.connections.remove(&connection_id).map(|(_, h)| h);
        if removed.is_some() {
            self.live.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!(connection_id = %connection_id, "Connection removed");
        }
        removed
    }

    /// Get connection by ID
    pub fn lookup(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    /// Like [`lookup`](Self::lookup), but a miss is a `RegistryMiss` error
    pub fn get(&self, connection_id: ConnectionId) -> Result<Arc<ConnectionHandle>, BridgeError> {
        self.lookup(connection_id)
            .ok_or(BridgeError::RegistryMiss(connection_id))
    }

    /// Ids of all live connections, sorted
    pub fn snapshot(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Handles of all live connections
    pub fn snapshot_handles(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live_connections: self.connections.len(),
            total_registered: self.total_registered.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            max_connections: self.max_connections,
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
