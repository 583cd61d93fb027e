//! Network Layer
//!
//! WebSocket gateway, room registry and outbound fan-out.
//! Game rules live in `game/`; this layer only routes and schedules.

pub mod protocol;
pub mod broadcast;
pub mod session;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, RoomUpdate, ErrorCode};
pub use broadcast::Broadcaster;
pub use session::{RoomRegistry, SessionError};
pub use server::{GameServer, GameServerError};
