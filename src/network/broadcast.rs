//! Outbound Fan-out
//!
//! Maps each live connection to its bounded outbound channel. Sends are
//! `try_send`: a full or closed channel drops the message for that
//! connection only.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::game::state::ConnectionId;
use crate::network::protocol::ServerMessage;

/// Registry of outbound channels.
#[derive(Default)]
pub struct Broadcaster {
    clients: RwLock<BTreeMap<ConnectionId, mpsc::Sender<ServerMessage>>>,
}

impl Broadcaster {
    /// Empty broadcaster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's channel.
    pub fn register(&self, conn: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn, sender);
    }

    /// Forget a connection.
    pub fn unregister(&self, conn: ConnectionId) {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&conn);
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Send to one connection. Returns whether the message was queued.
    pub fn send_to(&self, conn: ConnectionId, message: ServerMessage) -> bool {
        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        match clients.get(&conn) {
            Some(sender) => Self::deliver(conn, sender, message),
            None => {
                debug!("No channel for {}, dropping message", conn);
                false
            }
        }
    }

    /// Send the same message to every listed connection.
    pub fn fan_out(&self, conns: &[ConnectionId], message: &ServerMessage) {
        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        for conn in conns {
            if let Some(sender) = clients.get(conn) {
                Self::deliver(*conn, sender, message.clone());
            }
        }
    }

    /// Send to every registered connection.
    pub fn send_all(&self, message: &ServerMessage) {
        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        for (conn, sender) in clients.iter() {
            Self::deliver(*conn, sender, message.clone());
        }
    }

    fn deliver(conn: ConnectionId, sender: &mpsc::Sender<ServerMessage>, message: ServerMessage) -> bool {
        match sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for {}, skipping message", conn);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Outbound channel closed for {}", conn);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shutdown(reason: &str) -> ServerMessage {
        ServerMessage::Shutdown {
            reason: reason.to_string(),
        }
    }

    #[tokio::test]
    async fn test_fan_out_reaches_listed_connections() {
        let broadcaster = Broadcaster::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        let (tx3, mut rx3) = mpsc::channel(4);
        broadcaster.register(ConnectionId(1), tx1);
        broadcaster.register(ConnectionId(2), tx2);
        broadcaster.register(ConnectionId(3), tx3);

        broadcaster.fan_out(&[ConnectionId(1), ConnectionId(3), ConnectionId(9)], &shutdown("x"));

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let broadcaster = Broadcaster::new();
        let (tx, mut rx) = mpsc::channel(1);
        broadcaster.register(ConnectionId(1), tx);

        assert!(broadcaster.send_to(ConnectionId(1), shutdown("a")));
        assert!(!broadcaster.send_to(ConnectionId(1), shutdown("b")));

        match rx.try_recv() {
            Ok(ServerMessage::Shutdown { reason }) => assert_eq!(reason, "a"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister() {
        let broadcaster = Broadcaster::new();
        let (tx, _rx) = mpsc::channel(1);
        broadcaster.register(ConnectionId(5), tx);
        assert_eq!(broadcaster.connection_count(), 1);

        broadcaster.unregister(ConnectionId(5));
        assert_eq!(broadcaster.connection_count(), 0);
        assert!(!broadcaster.send_to(ConnectionId(5), shutdown("gone")));
    }
}
