//! Per-connection outbound queues.

use dashmap::DashMap;
use ferry_core::{ConnectionId, Outbound, ServerEvent};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound queue for one connection
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

/// Registry of open connections' outbound queues
///
/// Implements [`Outbound`] for the relay engine. Each connection's writer
/// task drains its own queue, so emitting never blocks on a slow socket.
#[derive(Debug, Clone, Default)]
pub struct Hub {
    connections: Arc<DashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,
}

impl Hub {
    /// Create an empty hub
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a queue for `connection`
    pub fn register(&self, connection: ConnectionId) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(connection, tx);
        rx
    }

    /// Close the queue for `connection`
    ///
    /// Dropping the sender lets the connection's writer task finish once the
    /// queue is drained.
    pub fn unregister(&self, connection: ConnectionId) {
        self.connections.remove(&connection);
    }

    /// Number of open connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Outbound for Hub {
    fn emit_to(&self, connection: ConnectionId, event: ServerEvent) {
        match self.connections.get(&connection) {
            Some(tx) => {
                if tx.send(event).is_err() {
                    tracing::debug!("Dropping event for closing connection {}", connection);
                }
            }
            None => tracing::debug!(
                "Dropping {} for unknown connection {}",
                event.name(),
                connection
            ),
        }
    }

    fn emit_to_all(&self, event: ServerEvent) {
        for entry in self.connections.iter() {
            let _ = entry.value().send(event.clone());
        }
    }
}
