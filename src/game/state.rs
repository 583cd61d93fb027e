//! Game State Definitions
//!
//! Identifiers, cards, players and room-level enums shared by the room state
//! machine and the wire protocol.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Tolerance used for every "equals 24" comparison.
pub const EPSILON: f64 = 1e-4;

/// The number every round is trying to reach.
pub const TARGET: f64 = 24.0;

/// Whether a value counts as 24.
#[inline]
pub fn is_target(value: f64) -> bool {
    (value - TARGET).abs() < EPSILON
}

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Stable player identifier chosen by the client; survives reconnects.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Create from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Room identifier as sent by the client.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Create from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transient handle of one WebSocket connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// =============================================================================
// CARDS
// =============================================================================

/// Card category: a suit for dealt cards, `Star` for merged results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardCategory {
    /// ♠
    Spades,
    /// ♥
    Hearts,
    /// ♣
    Clubs,
    /// ♦
    Diamonds,
    /// Result of combining two cards.
    Star,
}

impl CardCategory {
    /// The four dealable suits.
    pub const SUITS: [CardCategory; 4] = [
        CardCategory::Spades,
        CardCategory::Hearts,
        CardCategory::Clubs,
        CardCategory::Diamonds,
    ];

    /// Color tag a card of this category is rendered with.
    pub fn color(self) -> ColorTag {
        match self {
            CardCategory::Hearts | CardCategory::Diamonds => ColorTag::Red,
            CardCategory::Spades | CardCategory::Clubs => ColorTag::Dark,
            CardCategory::Star => ColorTag::Accent,
        }
    }
}

/// Render color hint for clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorTag {
    /// Red suits.
    Red,
    /// Black suits.
    Dark,
    /// Merged result cards.
    Accent,
}

/// Rank labels for values 1..=13.
pub const RANK_LABELS: [&str; 13] = [
    "A", "2", "3", "4", "5", "6", "7", "8", "9", "10", "J", "Q", "K",
];

/// One card on the table. Immutable: a move replaces cards, never edits them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    /// Id, unique within the current round.
    pub id: String,
    /// Numeric value (merged cards may be fractional).
    pub value: f64,
    /// Label shown on the card face.
    pub display_value: String,
    /// Suit or result marker.
    pub category: CardCategory,
    /// Render color.
    pub color_tag: ColorTag,
}

impl Card {
    /// A freshly dealt card of rank `rank` (1..=13).
    pub fn dealt(rank: u8, suit: CardCategory) -> Self {
        let label = RANK_LABELS
            .get(usize::from(rank.saturating_sub(1)))
            .copied()
            .unwrap_or("?");
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            value: f64::from(rank),
            display_value: label.to_string(),
            category: suit,
            color_tag: suit.color(),
        }
    }

    /// A result card produced by combining two cards.
    pub fn merged(value: f64) -> Self {
        let display_value = if value.fract() == 0.0 && value.abs() < 1_000_000.0 {
            format!("{}", value as i64)
        } else {
            format!("{:.1}", value)
        };
        Self {
            id: format!("R-{}", uuid::Uuid::new_v4().simple()),
            value,
            display_value,
            category: CardCategory::Star,
            color_tag: ColorTag::Accent,
        }
    }
}

// =============================================================================
// PLAYERS
// =============================================================================

/// A player seated in one room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Player {
    /// Stable id.
    pub id: PlayerId,
    /// Display name.
    pub nick: String,
    /// Cumulative score.
    pub score: u32,
    /// Ready for the next round.
    pub ready: bool,
    /// Gave up on the current round (open rooms).
    pub gave_up: bool,
    /// Connection currently carrying this player's traffic.
    pub conn: ConnectionId,
}

impl Player {
    /// New player, not ready.
    pub fn new(id: PlayerId, nick: String, score: u32, conn: ConnectionId) -> Self {
        Self {
            id,
            nick,
            score,
            ready: false,
            gave_up: false,
            conn,
        }
    }
}

// =============================================================================
// ROOM ENUMS
// =============================================================================

/// Arbitration mode of a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomMode {
    /// First buzz wins exclusive move rights.
    #[serde(rename = "race-to-buzz")]
    Race,
    /// Everyone moves on the shared cards.
    Open,
}

/// Lifecycle status of a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Between rounds.
    Waiting,
    /// Everyone ready; pre-round freeze.
    Counting,
    /// Round in progress.
    Playing,
    /// Someone reached 24; reset pending.
    Won,
}

/// Who may currently submit moves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Grab {
    /// Nobody holds the buzz.
    #[default]
    None,
    /// Open room: everyone may move.
    All,
    /// Race room: this player buzzed first.
    Player(PlayerId),
}

impl Grab {
    /// Wire form: `null`, `"ALL"` or the player id.
    pub fn to_wire(&self) -> Option<String> {
        match self {
            Grab::None => None,
            Grab::All => Some("ALL".to_string()),
            Grab::Player(id) => Some(id.0.clone()),
        }
    }

    /// Holder, when a single player holds it.
    pub fn holder(&self) -> Option<&PlayerId> {
        match self {
            Grab::Player(id) => Some(id),
            _ => None,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
