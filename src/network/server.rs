//! WebSocket Game Server
//!
//! Accepts connections, decodes client frames and routes them to the room
//! registry. Each connection gets a [`ConnectionId`] and a bounded outbound
//! channel registered with the [`Broadcaster`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::config::ServerConfig;
use crate::game::state::ConnectionId;
use crate::network::broadcast::Broadcaster;
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::network::session::{RoomRegistry, SessionError};

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Live rooms.
    registry: Arc<RoomRegistry>,
    /// Outbound channels.
    broadcaster: Arc<Broadcaster>,
    /// Next connection id.
    next_conn: AtomicU64,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let broadcaster = Arc::new(Broadcaster::new());
        let registry = Arc::new(RoomRegistry::new(config.room.clone(), broadcaster.clone()));

        Self {
            config,
            registry,
            broadcaster,
            next_conn: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    /// Run the server until [`GameServer::shutdown`] is called.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", self.config.bind_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if let Err(e) = self.admit(addr) {
                                warn!("Rejecting {}: {}", addr, e);
                                continue;
                            }
                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.registry.close_all().await;
        Ok(())
    }

    fn admit(&self, addr: SocketAddr) -> Result<(), GameServerError> {
        if self.broadcaster.connection_count() >= self.config.max_connections {
            debug!("{} arrived at the limit of {} connections", addr, self.config.max_connections);
            return Err(GameServerError::ConnectionLimitReached);
        }
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let conn = ConnectionId(self.next_conn.fetch_add(1, Ordering::Relaxed));
        let registry = self.registry.clone();
        let broadcaster = self.broadcaster.clone();
        let capacity = self.config.channel_capacity;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(capacity);
            broadcaster.register(conn, msg_tx.clone());
            debug!("{} assigned {}", addr, conn);

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => {
                                        Self::handle_client_message(conn, client_msg, &registry, &msg_tx).await;
                                    }
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", conn, e);
                                        let _ = msg_tx.try_send(ServerMessage::error(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        ));
                                    }
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.try_send(ServerMessage::error(
                                    ErrorCode::InvalidInput,
                                    "Binary frames are not supported",
                                ));
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", conn);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", conn, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Cleanup
            broadcaster.unregister(conn);
            registry.disconnect(conn).await;
            drop(msg_tx);
            if tokio::time::timeout(std::time::Duration::from_secs(1), sender_task).await.is_err() {
                debug!("Sender task for {} did not drain in time", conn);
            }

            info!("Client {} ({}) cleaned up", conn, addr);
        });
    }

    /// Route one decoded client message.
    async fn handle_client_message(
        conn: ConnectionId,
        msg: ClientMessage,
        registry: &RoomRegistry,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let result = match msg {
            ClientMessage::JoinRoom(req) => {
                registry
                    .join(req.room_id, req.player_id, req.nick, req.score, conn)
                    .await;
                Ok(())
            }
            ClientMessage::LeaveRoom(req) => {
                registry.leave(&req.room_id, &req.player_id).await;
                Ok(())
            }
            ClientMessage::ToggleReady(req) => registry.toggle_ready(&req.room_id, &req.player_id).await,
            ClientMessage::Buzz(req) => registry.buzz(&req.room_id, &req.player_id).await,
            ClientMessage::SubmitCards(req) => {
                registry
                    .submit_cards(&req.room_id, &req.player_id, req.cards, req.is_win, req.score)
                    .await
            }
            ClientMessage::GiveUp(req) => registry.give_up(&req.room_id, &req.player_id).await,
            ClientMessage::Ping { timestamp } => {
                let _ = sender.try_send(ServerMessage::Pong {
                    timestamp,
                    server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
                });
                Ok(())
            }
        };

        if let Err(e) = result {
            Self::reject(conn, &e, sender);
        }
    }

    fn reject(conn: ConnectionId, err: &SessionError, sender: &mpsc::Sender<ServerMessage>) {
        debug!("Rejected request from {}: {}", conn, err);
        let _ = sender.try_send(ServerMessage::error(err.code(), err.to_string()));
    }

    /// Shutdown the server. Connected clients are told before their
    /// sessions close.
    pub fn shutdown(&self) {
        self.broadcaster.send_all(&ServerMessage::Shutdown {
            reason: "Server shutting down".to_string(),
        });
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub fn connection_count(&self) -> usize {
        self.broadcaster.connection_count()
    }

    /// Get active room count.
    pub async fn room_count(&self) -> usize {
        self.registry.room_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::room::RoomError;
    use crate::game::state::{PlayerId, RoomId};
    use crate::network::protocol::{JoinRoomRequest, RoomRequest};

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(test_config());

        assert_eq!(server.connection_count(), 0);
        assert_eq!(server.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let config = ServerConfig {
            max_connections: 1,
            ..test_config()
        };
        let server = GameServer::new(config);
        let addr: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        assert!(server.admit(addr).is_ok());

        let (tx, _rx) = mpsc::channel(1);
        server.broadcaster.register(ConnectionId(1), tx);
        assert!(matches!(server.admit(addr), Err(GameServerError::ConnectionLimitReached)));
    }

    #[tokio::test]
    async fn test_shutdown_notifies_clients() {
        let server = GameServer::new(test_config());
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        server.broadcaster.register(ConnectionId(1), tx_a);
        server.broadcaster.register(ConnectionId(2), tx_b);

        server.shutdown();

        assert!(matches!(rx_a.try_recv(), Ok(ServerMessage::Shutdown { .. })));
        assert!(matches!(rx_b.try_recv(), Ok(ServerMessage::Shutdown { .. })));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let server = Arc::new(GameServer::new(test_config()));
        let running = server.clone();
        let handle = tokio::spawn(async move { running.run().await });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        server.shutdown();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn test_routing_and_private_rejection() {
        let server = GameServer::new(test_config());
        let (tx, mut rx) = mpsc::channel(16);
        server.broadcaster.register(ConnectionId(1), tx.clone());

        let join = ClientMessage::JoinRoom(JoinRoomRequest {
            room_id: RoomId::new("20"),
            player_id: PlayerId::new("A"),
            nick: "Ann".into(),
            score: 0,
        });
        GameServer::handle_client_message(ConnectionId(1), join, &server.registry, &tx).await;
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::RoomUpdate(_))));

        let buzz = ClientMessage::Buzz(RoomRequest {
            room_id: RoomId::new("20"),
            player_id: PlayerId::new("A"),
        });
        GameServer::handle_client_message(ConnectionId(1), buzz, &server.registry, &tx).await;
        match rx.try_recv() {
            Ok(ServerMessage::Error(err)) => {
                assert_eq!(err.code, ErrorCode::WrongMode);
                assert_eq!(err.message, RoomError::WrongMode.to_string());
            }
            other => panic!("expected a rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let server = GameServer::new(test_config());
        let (tx, mut rx) = mpsc::channel(4);

        GameServer::handle_client_message(
            ConnectionId(1),
            ClientMessage::Ping { timestamp: 77 },
            &server.registry,
            &tx,
        )
        .await;

        match rx.try_recv() {
            Ok(ServerMessage::Pong { timestamp, server_time }) => {
                assert_eq!(timestamp, 77);
                assert!(server_time > 0);
            }
            other => panic!("expected pong, got {:?}", other),
        }
    }
}
