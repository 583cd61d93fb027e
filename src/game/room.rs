//! Room State Machine
//!
//! One room's roster, cards, arbitration and countdown value. Every
//! operation is synchronous and returns the [`Effect`]s it produced; the
//! caller applies them while still holding the room, so a transition and its
//! timer commands are one atomic step.
//!
//! ```text
//! waiting ──all ready──▶ counting ──deal──▶ playing ──24──▶ won
//!    ▲                                        │              │
//!    └──────────── timeout / give-up ─────────┘◀── reset ────┘
//! ```

use std::time::Duration;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::rng::{derive_round_seed, entropy_seed, DeterministicRng};
use crate::game::events::{Effect, RoomEvent};
use crate::game::moves::{check_merge, is_undo, MoveError, MovePolicy};
use crate::game::puzzle::{PuzzleGenerator, DEFAULT_MAX_DRAWS, HAND_SIZE};
use crate::game::state::{
    is_target, Card, ConnectionId, Grab, Player, PlayerId, RoomId, RoomMode, RoomStatus,
};

/// Minimum roster size before a round can start.
pub const MIN_PLAYERS: usize = 2;

/// Round-level tuning shared by every room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Countdown ceiling at round start (seconds).
    pub round_secs: u32,
    /// Countdown ceiling after a successful buzz (seconds).
    pub buzz_secs: u32,
    /// Pre-round freeze; zero deals immediately.
    pub counting_delay: Duration,
    /// Delay between a win and the automatic reset.
    pub reset_delay: Duration,
    /// Rooms "1" through this number are race-to-buzz rooms. The whole id
    /// must parse as an integer, so ids like "3a" are open rooms.
    pub race_rooms: u32,
    /// How submitted hands are checked.
    pub move_policy: MovePolicy,
    /// Random draws before the puzzle fallback table is used.
    pub max_draws: u32,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            round_secs: 120,
            buzz_secs: 30,
            counting_delay: Duration::from_secs(2),
            reset_delay: Duration::from_secs(4),
            race_rooms: 4,
            move_policy: MovePolicy::Trusted,
            max_draws: DEFAULT_MAX_DRAWS,
        }
    }
}

impl RoomConfig {
    /// Mode a room id maps to.
    pub fn mode_for(&self, room_id: &RoomId) -> RoomMode {
        match room_id.as_str().trim().parse::<u32>() {
            Ok(n) if (1..=self.race_rooms).contains(&n) => RoomMode::Race,
            _ => RoomMode::Open,
        }
    }
}

/// Rejected room operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoomError {
    /// Player is not seated in this room.
    #[error("player {0} is not in this room")]
    UnknownPlayer(PlayerId),

    /// Operation requires a round in progress.
    #[error("no round in progress")]
    NotPlaying,

    /// Buzzing is only possible in race rooms.
    #[error("this room does not use buzzing")]
    WrongMode,

    /// Another player already holds the buzz.
    #[error("{0} already holds the buzz")]
    AlreadyGrabbed(PlayerId),

    /// Player does not hold move rights.
    #[error("you do not hold the buzz")]
    NotYourTurn,

    /// Submitted hand is larger than any hand a round can produce.
    #[error("hand of {0} cards is larger than a dealt hand")]
    HandTooLarge(usize),

    /// Strict move check failed.
    #[error("illegal move: {0}")]
    IllegalMove(#[from] MoveError),
}

/// Result of a room operation.
pub type RoomResult = Result<Vec<Effect>, RoomError>;

/// State of one room.
#[derive(Debug, Clone)]
pub struct RoomSession {
    id: RoomId,
    mode: RoomMode,
    status: RoomStatus,
    players: Vec<Player>,
    cards: Vec<Card>,
    grab: Grab,
    time_left: u32,
    winner: Option<PlayerId>,
    round: u64,
    countdown_running: bool,
    history: Vec<Vec<Card>>,
    config: RoomConfig,
    generator: PuzzleGenerator,
}

impl RoomSession {
    /// Create an empty room; mode follows from the id.
    pub fn new(id: RoomId, config: RoomConfig) -> Self {
        let mode = config.mode_for(&id);
        Self::with_mode(id, mode, config)
    }

    /// Create an empty room with an explicit mode.
    pub fn with_mode(id: RoomId, mode: RoomMode, config: RoomConfig) -> Self {
        let generator = PuzzleGenerator::new().with_max_draws(config.max_draws);
        Self {
            id,
            mode,
            status: RoomStatus::Waiting,
            players: Vec::new(),
            cards: Vec::new(),
            grab: Grab::None,
            time_left: config.round_secs,
            winner: None,
            round: 0,
            countdown_running: false,
            history: Vec::new(),
            config,
            generator,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Room id.
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Arbitration mode.
    pub fn mode(&self) -> RoomMode {
        self.mode
    }

    /// Lifecycle status.
    pub fn status(&self) -> RoomStatus {
        self.status
    }

    /// Roster in join order.
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Look up one player.
    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| &p.id == id)
    }

    /// Cards on the table.
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Who holds move rights.
    pub fn grab(&self) -> &Grab {
        &self.grab
    }

    /// Seconds left on the countdown.
    pub fn time_left(&self) -> u32 {
        self.time_left
    }

    /// Winner of the current round.
    pub fn winner(&self) -> Option<&PlayerId> {
        self.winner.as_ref()
    }

    /// Counter identifying the current (or last) round.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Whether the room expects its countdown task to be running.
    pub fn countdown_running(&self) -> bool {
        self.countdown_running
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Connections of every member, for fan-out.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.players.iter().map(|p| p.conn).collect()
    }

    fn player_mut(&mut self, id: &PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| &p.id == id)
    }

    fn all_ready(&self) -> bool {
        self.players.len() >= MIN_PLAYERS && self.players.iter().all(|p| p.ready)
    }

    // =========================================================================
    // ROSTER
    // =========================================================================

    /// Seat a player, or refresh the connection of one already seated.
    pub fn join(
        &mut self,
        player_id: PlayerId,
        nick: String,
        score: u32,
        conn: ConnectionId,
    ) -> Vec<Effect> {
        match self.players.iter().position(|p| p.id == player_id) {
            Some(idx) => {
                let existing = &mut self.players[idx];
                existing.conn = conn;
                existing.nick = nick;
                debug!("Player {} rejoined room {} on {}", player_id, self.id, conn);
            }
            None => {
                debug!("Player {} joined room {}", player_id, self.id);
                self.players.push(Player::new(player_id, nick, score, conn));
            }
        }
        vec![Effect::updated()]
    }

    /// Remove a player. Unknown players are ignored.
    pub fn leave(&mut self, player_id: &PlayerId) -> Vec<Effect> {
        let before = self.players.len();
        self.players.retain(|p| &p.id != player_id);
        if self.players.len() == before {
            return Vec::new();
        }
        debug!("Player {} left room {}", player_id, self.id);
        self.after_departure()
    }

    /// Remove every player still bound to a closed connection.
    pub fn disconnect(&mut self, conn: ConnectionId) -> Vec<Effect> {
        let before = self.players.len();
        self.players.retain(|p| p.conn != conn);
        if self.players.len() == before {
            return Vec::new();
        }
        debug!("{} dropped from room {}", conn, self.id);
        self.after_departure()
    }

    fn after_departure(&mut self) -> Vec<Effect> {
        if self.players.is_empty() {
            let mut effects = self.reset_round();
            effects.push(Effect::Destroy);
            return effects;
        }

        let mut effects = Vec::new();
        match self.status {
            RoomStatus::Counting if !self.all_ready() => {
                self.status = RoomStatus::Waiting;
                effects.push(Effect::CancelScheduled);
            }
            RoomStatus::Playing => {
                // Release the buzz if its holder left
                if let Some(holder) = self.grab.holder() {
                    if self.player(holder).is_none() {
                        self.grab = Grab::None;
                    }
                }
                if self.mode == RoomMode::Open && self.players.iter().all(|p| p.gave_up) {
                    effects.extend(self.reset_round());
                    effects.push(Effect::Broadcast(RoomEvent::GameResult {
                        is_win: false,
                        message: "Everyone gave up, dealing again.".to_string(),
                    }));
                }
            }
            _ => {}
        }
        effects.push(Effect::updated());
        effects
    }

    // =========================================================================
    // ROUND LIFECYCLE
    // =========================================================================

    /// Flip a player's ready flag; starts the round once everyone is ready.
    pub fn toggle_ready(&mut self, player_id: &PlayerId) -> RoomResult {
        let player = self
            .player_mut(player_id)
            .ok_or_else(|| RoomError::UnknownPlayer(player_id.clone()))?;
        player.ready = !player.ready;

        let mut effects = Vec::new();
        match self.status {
            RoomStatus::Waiting if self.all_ready() => {
                self.round += 1;
                if self.config.counting_delay.is_zero() {
                    effects.extend(self.start_playing());
                } else {
                    self.status = RoomStatus::Counting;
                    effects.push(Effect::ScheduleDeal {
                        round: self.round,
                        after: self.config.counting_delay,
                    });
                }
            }
            RoomStatus::Counting if !self.all_ready() => {
                self.status = RoomStatus::Waiting;
                effects.push(Effect::CancelScheduled);
            }
            _ => {}
        }
        effects.push(Effect::updated());
        Ok(effects)
    }

    /// Scheduled end of the pre-round freeze. Stale calls are dropped.
    pub fn deal(&mut self, round: u64) -> Vec<Effect> {
        if self.status != RoomStatus::Counting || round != self.round {
            debug!("Dropping stale deal for round {} in room {}", round, self.id);
            return Vec::new();
        }
        let mut effects = self.start_playing();
        effects.push(Effect::updated());
        effects
    }

    fn start_playing(&mut self) -> Vec<Effect> {
        let seed = derive_round_seed(self.id.as_str(), self.round, entropy_seed());
        let mut rng = DeterministicRng::new(seed);
        let deal = self.generator.deal(&mut rng);

        info!(
            "Room {} round {} dealt (seed {}, {} draws{})",
            self.id,
            self.round,
            hex::encode(seed.to_be_bytes()),
            deal.draws,
            if deal.fallback { ", fallback" } else { "" }
        );

        self.status = RoomStatus::Playing;
        self.cards = deal.cards;
        self.history.clear();
        if self.config.move_policy == MovePolicy::Strict {
            self.history.push(self.cards.clone());
        }
        self.time_left = self.config.round_secs;
        self.winner = None;
        self.grab = match self.mode {
            RoomMode::Race => Grab::None,
            RoomMode::Open => Grab::All,
        };
        for p in &mut self.players {
            p.gave_up = false;
        }
        self.countdown_running = true;

        vec![Effect::StartCountdown { round: self.round }]
    }

    /// Return to `waiting` with an empty table. Idempotent.
    pub fn reset_round(&mut self) -> Vec<Effect> {
        self.status = RoomStatus::Waiting;
        self.cards.clear();
        self.history.clear();
        self.grab = Grab::None;
        self.winner = None;
        self.time_left = self.config.round_secs;
        for p in &mut self.players {
            p.ready = false;
            p.gave_up = false;
        }
        self.countdown_running = false;
        vec![Effect::CancelCountdown, Effect::CancelScheduled]
    }

    /// Scheduled reset after a win. Stale calls are dropped.
    pub fn expire_win(&mut self, round: u64) -> Vec<Effect> {
        if self.status != RoomStatus::Won || round != self.round {
            debug!("Dropping stale reset for round {} in room {}", round, self.id);
            return Vec::new();
        }
        let mut effects = self.reset_round();
        effects.push(Effect::updated());
        effects
    }

    /// One countdown second. Stale ticks are dropped.
    pub fn tick(&mut self, round: u64) -> Vec<Effect> {
        if self.status != RoomStatus::Playing || round != self.round {
            return Vec::new();
        }

        self.time_left = self.time_left.saturating_sub(1);
        let mut effects = vec![Effect::Broadcast(RoomEvent::TimerSync {
            time_left: self.time_left,
        })];

        if self.time_left == 0 {
            let arbitration = self.grab.holder().is_some();
            info!(
                "Room {} round {} timed out ({})",
                self.id,
                self.round,
                if arbitration { "buzz window" } else { "unsolved" }
            );

            effects.extend(self.reset_round());
            let message = if arbitration {
                "Arbitration timed out."
            } else {
                "Time is up, nobody solved it."
            };
            effects.push(Effect::Broadcast(RoomEvent::ForceTimeout {
                message: message.to_string(),
            }));
            if arbitration {
                effects.push(Effect::Broadcast(RoomEvent::GameResult {
                    is_win: false,
                    message: message.to_string(),
                }));
            }
            effects.push(Effect::updated());
        }

        effects
    }

    // =========================================================================
    // PLAYER ACTIONS
    // =========================================================================

    /// Claim exclusive move rights in a race room. First accepted wins.
    pub fn buzz(&mut self, player_id: &PlayerId) -> RoomResult {
        if self.mode != RoomMode::Race {
            return Err(RoomError::WrongMode);
        }
        if self.status != RoomStatus::Playing {
            return Err(RoomError::NotPlaying);
        }
        if self.player(player_id).is_none() {
            return Err(RoomError::UnknownPlayer(player_id.clone()));
        }
        if let Some(holder) = self.grab.holder() {
            return Err(RoomError::AlreadyGrabbed(holder.clone()));
        }

        self.grab = Grab::Player(player_id.clone());
        self.time_left = self.config.buzz_secs;
        debug!("Player {} buzzed in room {}", player_id, self.id);

        Ok(vec![
            Effect::Broadcast(RoomEvent::TimerSync {
                time_left: self.time_left,
            }),
            Effect::updated(),
        ])
    }

    fn ensure_can_move(&self, player_id: &PlayerId) -> Result<(), RoomError> {
        if self.status != RoomStatus::Playing {
            return Err(RoomError::NotPlaying);
        }
        if self.player(player_id).is_none() {
            return Err(RoomError::UnknownPlayer(player_id.clone()));
        }
        if self.mode == RoomMode::Race && self.grab.holder() != Some(player_id) {
            return Err(RoomError::NotYourTurn);
        }
        Ok(())
    }

    /// Replace the table with a player's resulting cards.
    pub fn submit_move(
        &mut self,
        player_id: &PlayerId,
        cards: Vec<Card>,
        claimed_win: bool,
        claimed_score: u32,
    ) -> RoomResult {
        self.ensure_can_move(player_id)?;
        if cards.len() > HAND_SIZE {
            return Err(RoomError::HandTooLarge(cards.len()));
        }

        if self.config.move_policy == MovePolicy::Strict {
            if is_undo(&self.history, &cards) {
                debug!("Player {} restored an earlier hand", player_id);
            } else {
                check_merge(&self.cards, &cards)?;
                self.history.push(cards.clone());
            }
        }

        let solved = cards.len() == 1 && is_target(cards[0].value);
        self.cards = cards;

        if !(claimed_win && solved) {
            return Ok(vec![Effect::updated()]);
        }

        info!("Player {} solved room {} round {}", player_id, self.id, self.round);
        self.status = RoomStatus::Won;
        self.winner = Some(player_id.clone());
        self.countdown_running = false;
        if let Some(p) = self.player_mut(player_id) {
            p.score = claimed_score;
        }

        Ok(vec![
            Effect::CancelCountdown,
            Effect::ScheduleReset {
                round: self.round,
                after: self.config.reset_delay,
            },
            Effect::updated(),
        ])
    }

    /// Abandon the round (race: buzz holder only; open: once everyone gave up).
    pub fn give_up(&mut self, player_id: &PlayerId) -> RoomResult {
        self.ensure_can_move(player_id)?;

        let message = match self.mode {
            RoomMode::Race => {
                let nick = self
                    .player(player_id)
                    .map(|p| p.nick.clone())
                    .unwrap_or_default();
                format!("{} gave up, round over.", nick)
            }
            RoomMode::Open => {
                if let Some(p) = self.player_mut(player_id) {
                    p.gave_up = true;
                }
                if !self.players.iter().all(|p| p.gave_up) {
                    return Ok(vec![Effect::updated()]);
                }
                "Everyone gave up, dealing again.".to_string()
            }
        };

        let mut effects = self.reset_round();
        effects.push(Effect::Broadcast(RoomEvent::GameResult { is_win: false, message }));
        effects.push(Effect::updated());
        Ok(effects)
    }
}

// =============================================================================
// TESTS
// =============================================================================
