//! # Reach24 Room Server
//!
//! Authoritative server for a multiplayer card puzzle: every round deals
//! four cards that can be combined into 24, and players race to find it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      REACH24 SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  └── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │                                                              │
//! │  game/           - Room rules (no I/O)                       │
//! │  ├── state.rs    - Cards, players, room enums                │
//! │  ├── solver.rs   - 24-reachability search                    │
//! │  ├── puzzle.rs   - Solvable hand generation                  │
//! │  ├── moves.rs    - Submitted-hand validation                 │
//! │  ├── events.rs   - Effects of a transition                   │
//! │  └── room.rs     - Per-room state machine                    │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── server.rs   - WebSocket gateway                         │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── session.rs  - Room registry and timers                  │
//! │  └── broadcast.rs- Outbound fan-out                          │
//! │                                                              │
//! │  config.rs       - Environment configuration                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Room Authority
//!
//! A room's state only changes inside its own lock, one event at a time.
//! Timers are round-keyed tasks owned by the room: leaving `playing`
//! aborts the countdown in the same step, and any tick that still arrives
//! for a finished round is dropped.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::ServerConfig;
pub use crate::core::rng::DeterministicRng;
pub use game::room::{RoomConfig, RoomSession};
pub use game::solver::{can_make_24, Solver};
pub use game::state::{Card, PlayerId, RoomId};
pub use network::server::GameServer;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
