//! Game Logic Module
//!
//! Everything a room needs to run a round, with no I/O.
//!
//! ## Module Structure
//!
//! - `state`: Ids, cards, players, room enums
//! - `solver`: 24-reachability search
//! - `puzzle`: Solvable hand generation
//! - `moves`: Submitted-hand validation policies
//! - `events`: Effects returned by room transitions
//! - `room`: Per-room state machine

pub mod state;
pub mod solver;
pub mod puzzle;
pub mod moves;
pub mod events;
pub mod room;

// Re-export key types
pub use state::{Card, CardCategory, ConnectionId, Grab, Player, PlayerId, RoomId, RoomMode, RoomStatus};
pub use solver::{can_make_24, Solver};
pub use puzzle::PuzzleGenerator;
pub use moves::MovePolicy;
pub use events::{Effect, RoomEvent};
pub use room::{RoomConfig, RoomError, RoomSession};
