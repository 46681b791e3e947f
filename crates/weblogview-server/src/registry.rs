//! Bookkeeping of live WebSocket connections.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Public view of a registered connection
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub peer: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
}

struct Entry {
    info: ConnectionInfo,
    cancel: CancellationToken,
}

/// Registry of connected sessions
///
/// Only ever touched on connect, disconnect and shutdown; never on the data
/// path.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, Entry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection
    ///
    /// The connection stays registered until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, peer: Option<SocketAddr>) -> ConnectionGuard {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let info = ConnectionInfo {
            id,
            peer,
            connected_at: Utc::now(),
        };

        let total = {
            let mut connections = self.connections.write();
            connections.insert(
                id,
                Entry {
                    info,
                    cancel: cancel.clone(),
                },
            );
            connections.len()
        };
        info!(session = %id, peer = ?peer, total, "Client connected");

        ConnectionGuard {
            registry: Arc::clone(self),
            id,
            cancel,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Registered connections, oldest first
    pub fn sessions(&self) -> Vec<ConnectionInfo> {
        let mut sessions: Vec<_> = self
            .connections
            .read()
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        sessions.sort_by_key(|info| info.connected_at);
        sessions
    }

    /// Ask every connection to close; returns how many were signalled
    pub fn shutdown_all(&self) -> usize {
        let connections = self.connections.read();
        for entry in connections.values() {
            entry.cancel.cancel();
        }
        info!(count = connections.len(), "Closing all sessions");
        connections.len()
    }

    fn unregister(&self, id: &Uuid) {
        let removed = self.connections.write().remove(id);
        if let Some(entry) = removed {
            let duration = Utc::now() - entry.info.connected_at;
            info!(session = %id, duration_secs = duration.num_seconds(), "Client disconnected");
        }
    }
}

/// Keeps a connection registered; unregisters on drop, including when the
/// owning task panics or is aborted
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    id: Uuid,
    cancel: CancellationToken,
}

impl ConnectionGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancelled when the server asks this connection to close
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
        debug!(session = %self.id, "Connection guard dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_drop() {
        let registry = Arc::new(ConnectionRegistry::new());
        assert!(registry.is_empty());

        let first = registry.register(None);
        let second = registry.register(Some("127.0.0.1:5000".parse().unwrap()));
        assert_eq!(registry.len(), 2);
        assert_ne!(first.id(), second.id());

        drop(first);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.sessions()[0].id, second.id());

        drop(second);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_shutdown_all_signals_every_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let guards: Vec<_> = (0..3).map(|_| registry.register(None)).collect();

        assert_eq!(registry.shutdown_all(), 3);
        assert!(guards.iter().all(|g| g.shutdown_token().is_cancelled()));

        // Signalling does not unregister; the connections close themselves
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_guard_released_when_task_aborted() {
        let registry = Arc::new(ConnectionRegistry::new());
        let task_registry = Arc::clone(&registry);

        let task = tokio::spawn(async move {
            let _guard = task_registry.register(None);
            std::future::pending::<()>().await;
        });

        while registry.is_empty() {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let registry = Arc::new(ConnectionRegistry::new());
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let guard = registry.register(None);
                    tokio::task::yield_now().await;
                    drop(guard);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_connection_info_json() {
        let registry = Arc::new(ConnectionRegistry::new());
        let _guard = registry.register(Some("10.0.0.1:4000".parse().unwrap()));

        let json = serde_json::to_value(&registry.sessions()[0]).unwrap();
        assert_eq!(json["peer"], "10.0.0.1:4000");
        assert!(json["connectedAt"].is_string());
    }
}
