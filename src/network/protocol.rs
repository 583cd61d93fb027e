//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON text frame tagged by `type` (kebab-case) with
//! camelCase fields.

use serde::{Serialize, Deserialize};

use crate::game::events::RoomEvent;
use crate::game::room::{RoomError, RoomSession};
use crate::game::state::{Card, PlayerId, RoomId, RoomMode, RoomStatus};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Enter a room (or refresh the connection after a reconnect).
    JoinRoom(JoinRoomRequest),

    /// Leave a room.
    LeaveRoom(RoomRequest),

    /// Flip the ready flag.
    ToggleReady(RoomRequest),

    /// Claim exclusive move rights (race rooms).
    Buzz(RoomRequest),

    /// Replace the table with the player's resulting cards.
    SubmitCards(SubmitCardsRequest),

    /// Abandon the current round.
    GiveUp(RoomRequest),

    /// Ping for latency measurement.
    Ping {
        /// Client clock, echoed back.
        timestamp: u64,
    },
}

/// Room entry request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    /// Room to enter.
    pub room_id: RoomId,
    /// Stable player id.
    pub player_id: PlayerId,
    /// Display name.
    #[serde(default)]
    pub nick: String,
    /// Score carried in by the client; used only on first join.
    #[serde(default)]
    pub score: u32,
}

/// Request naming a room and the acting player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequest {
    /// Target room.
    pub room_id: RoomId,
    /// Acting player.
    pub player_id: PlayerId,
}

/// Card submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCardsRequest {
    /// Target room.
    pub room_id: RoomId,
    /// Acting player.
    pub player_id: PlayerId,
    /// Resulting hand.
    pub cards: Vec<Card>,
    /// Client believes this hand is a solution.
    #[serde(default)]
    pub is_win: bool,
    /// Score to record if the win is accepted.
    #[serde(default)]
    pub score: u32,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Full room snapshot.
    RoomUpdate(RoomUpdate),

    /// Authoritative countdown value.
    #[serde(rename_all = "camelCase")]
    TimerSync {
        /// Seconds left.
        time_left: u32,
    },

    /// Countdown reached zero.
    ForceTimeout {
        /// Reason shown to players.
        message: String,
    },

    /// Round ended without a winner.
    #[serde(rename_all = "camelCase")]
    GameResult {
        /// Whether the round was won.
        is_win: bool,
        /// Reason shown to players.
        message: String,
    },

    /// Private rejection of the sender's last request.
    Error(ServerError),

    /// Pong response.
    #[serde(rename_all = "camelCase")]
    Pong {
        /// Client timestamp from the ping.
        timestamp: u64,
        /// Server wall clock (ms since epoch).
        server_time: u64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// Snapshot of one room as every member sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUpdate {
    /// Room id.
    pub id: RoomId,
    /// Arbitration mode.
    pub mode: RoomMode,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Roster in join order.
    pub players: Vec<PlayerView>,
    /// Cards on the table.
    pub cards: Vec<Card>,
    /// `null`, `"ALL"` or the buzzing player's id.
    pub grabbed_by: Option<String>,
    /// Winner of the current round.
    pub winner: Option<PlayerId>,
    /// Seconds left on the countdown.
    pub time_left: u32,
}

/// Public view of a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    /// Stable id.
    pub id: PlayerId,
    /// Display name.
    pub nick: String,
    /// Cumulative score.
    pub score: u32,
    /// Ready flag.
    pub ready: bool,
    /// Gave up on the current round.
    pub gave_up: bool,
}

impl From<&RoomSession> for RoomUpdate {
    fn from(room: &RoomSession) -> Self {
        Self {
            id: room.id().clone(),
            mode: room.mode(),
            status: room.status(),
            players: room
                .players()
                .iter()
                .map(|p| PlayerView {
                    id: p.id.clone(),
                    nick: p.nick.clone(),
                    score: p.score,
                    ready: p.ready,
                    gave_up: p.gave_up,
                })
                .collect(),
            cards: room.cards().to_vec(),
            grabbed_by: room.grab().to_wire(),
            winner: room.winner().cloned(),
            time_left: room.time_left(),
        }
    }
}

impl ServerMessage {
    /// Wire message for a room event, rendered against the room's current state.
    pub fn from_event(event: &RoomEvent, room: &RoomSession) -> Self {
        match event {
            RoomEvent::Updated => ServerMessage::RoomUpdate(RoomUpdate::from(room)),
            RoomEvent::TimerSync { time_left } => ServerMessage::TimerSync {
                time_left: *time_left,
            },
            RoomEvent::ForceTimeout { message } => ServerMessage::ForceTimeout {
                message: message.clone(),
            },
            RoomEvent::GameResult { is_win, message } => ServerMessage::GameResult {
                is_win: *is_win,
                message: message.clone(),
            },
        }
    }

    /// Private rejection.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame could not be decoded.
    InvalidInput,
    /// No such room.
    UnknownRoom,
    /// Player is not in the room.
    UnknownPlayer,
    /// No round in progress.
    NotPlaying,
    /// Operation not available in this room's mode.
    WrongMode,
    /// Someone else already buzzed.
    AlreadyGrabbed,
    /// Sender does not hold move rights.
    NotYourTurn,
    /// Submitted hand failed validation.
    IllegalMove,
    /// Server overloaded.
    ServerOverloaded,
}

impl From<&RoomError> for ErrorCode {
    fn from(err: &RoomError) -> Self {
        match err {
            RoomError::UnknownPlayer(_) => ErrorCode::UnknownPlayer,
            RoomError::NotPlaying => ErrorCode::NotPlaying,
            RoomError::WrongMode => ErrorCode::WrongMode,
            RoomError::AlreadyGrabbed(_) => ErrorCode::AlreadyGrabbed,
            RoomError::NotYourTurn => ErrorCode::NotYourTurn,
            RoomError::HandTooLarge(_) | RoomError::IllegalMove(_) => ErrorCode::IllegalMove,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::room::RoomConfig;
    use crate::game::state::{CardCategory, ConnectionId};
    use serde_json::Value;

    #[test]
    fn test_parse_join_room() {
        let json = r#"{"type":"join-room","roomId":"3","playerId":"p-1","nick":"Ann","score":7}"#;
        match ClientMessage::from_json(json).unwrap() {
            ClientMessage::JoinRoom(req) => {
                assert_eq!(req.room_id, RoomId::new("3"));
                assert_eq!(req.player_id, PlayerId::new("p-1"));
                assert_eq!(req.nick, "Ann");
                assert_eq!(req.score, 7);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_join_defaults() {
        let json = r#"{"type":"join-room","roomId":"9","playerId":"p"}"#;
        match ClientMessage::from_json(json).unwrap() {
            ClientMessage::JoinRoom(req) => {
                assert_eq!(req.nick, "");
                assert_eq!(req.score, 0);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_parse_room_requests() {
        for (tag, check) in [
            ("leave-room", 0),
            ("toggle-ready", 1),
            ("buzz", 2),
            ("give-up", 3),
        ] {
            let json = format!(r#"{{"type":"{}","roomId":"1","playerId":"A"}}"#, tag);
            let parsed = ClientMessage::from_json(&json).unwrap();
            let matched = match parsed {
                ClientMessage::LeaveRoom(_) => 0,
                ClientMessage::ToggleReady(_) => 1,
                ClientMessage::Buzz(_) => 2,
                ClientMessage::GiveUp(_) => 3,
                _ => -1,
            };
            assert_eq!(matched, check, "tag {}", tag);
        }
    }

    #[test]
    fn test_parse_submit_cards() {
        let card = Card::merged(24.0);
        let json = serde_json::json!({
            "type": "submit-cards",
            "roomId": "2",
            "playerId": "A",
            "cards": [card],
            "isWin": true,
            "score": 3
        })
        .to_string();

        match ClientMessage::from_json(&json).unwrap() {
            ClientMessage::SubmitCards(req) => {
                assert!(req.is_win);
                assert_eq!(req.score, 3);
                assert_eq!(req.cards.len(), 1);
                assert_eq!(req.cards[0].value, 24.0);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_frames_rejected() {
        assert!(ClientMessage::from_json("not json").is_err());
        assert!(ClientMessage::from_json(r#"{"type":"teleport"}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"type":"buzz","roomId":"1"}"#).is_err());
    }

    #[test]
    fn test_timer_sync_shape() {
        let json = ServerMessage::TimerSync { time_left: 29 }.to_json().unwrap();
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "timer-sync");
        assert_eq!(v["timeLeft"], 29);
    }

    #[test]
    fn test_game_result_and_pong_shape() {
        let v: Value = serde_json::from_str(
            &ServerMessage::GameResult {
                is_win: false,
                message: "x".into(),
            }
            .to_json()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(v["type"], "game-result");
        assert_eq!(v["isWin"], false);

        let v: Value = serde_json::from_str(
            &ServerMessage::Pong {
                timestamp: 5,
                server_time: 9,
            }
            .to_json()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(v["type"], "pong");
        assert_eq!(v["serverTime"], 9);
    }

    #[test]
    fn test_room_update_snapshot() {
        let config = RoomConfig::default();
        let mut room = RoomSession::new(RoomId::new("7"), config);
        room.join(PlayerId::new("A"), "Ann".into(), 4, ConnectionId(1));

        let msg = ServerMessage::from_event(&RoomEvent::Updated, &room);
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(v["type"], "room-update");
        assert_eq!(v["id"], "7");
        assert_eq!(v["mode"], "open");
        assert_eq!(v["status"], "waiting");
        assert_eq!(v["timeLeft"], 120);
        assert!(v["grabbedBy"].is_null());
        assert!(v["winner"].is_null());
        assert_eq!(v["players"][0]["nick"], "Ann");
        assert_eq!(v["players"][0]["score"], 4);
        assert_eq!(v["players"][0]["gaveUp"], false);

        let race = RoomSession::new(RoomId::new("1"), RoomConfig::default());
        let update = serde_json::to_value(RoomUpdate::from(&race)).unwrap();
        assert_eq!(update["mode"], "race-to-buzz");
    }

    #[test]
    fn test_card_fields_on_wire() {
        let card = Card::dealt(12, CardCategory::Hearts);
        let v = serde_json::to_value(&card).unwrap();
        assert_eq!(v["displayValue"], "Q");
        assert_eq!(v["colorTag"], "red");
        assert_eq!(v["value"], 12.0);
    }

    #[test]
    fn test_error_codes() {
        let msg = ServerMessage::error(
            ErrorCode::from(&RoomError::AlreadyGrabbed(PlayerId::new("B"))),
            "B already holds the buzz",
        );
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("already_grabbed"));
    }
}
