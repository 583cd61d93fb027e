//! Room Events
//!
//! What a room transition produced: messages for the room's members and
//! commands for the room's scheduled tasks. The state machine only returns
//! these; the network layer carries them out.

use std::time::Duration;

/// Notification for every member of a room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoomEvent {
    /// Room state changed; members need a fresh snapshot.
    Updated,
    /// Authoritative countdown value.
    TimerSync {
        /// Seconds left in the round.
        time_left: u32,
    },
    /// Countdown hit zero and the round was reset.
    ForceTimeout {
        /// Human-readable reason.
        message: String,
    },
    /// Round ended without a winner (give-up or lost arbitration).
    GameResult {
        /// Always false today; kept for wire compatibility.
        is_win: bool,
        /// Human-readable reason.
        message: String,
    },
}

/// Side effect of one transition, applied in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Fan an event out to every member.
    Broadcast(RoomEvent),
    /// Start the one-second countdown for `round`.
    StartCountdown {
        /// Round the ticks belong to.
        round: u64,
    },
    /// Stop the countdown, if one runs.
    CancelCountdown,
    /// Deal `round` after the pre-round freeze.
    ScheduleDeal {
        /// Round to deal.
        round: u64,
        /// Freeze length.
        after: Duration,
    },
    /// Reset the room after a win.
    ScheduleReset {
        /// Round that was won.
        round: u64,
        /// Delay before the reset.
        after: Duration,
    },
    /// Drop a pending deal or reset.
    CancelScheduled,
    /// Roster is empty; remove the room.
    Destroy,
}

impl Effect {
    /// Shorthand for a snapshot broadcast.
    pub fn updated() -> Self {
        Effect::Broadcast(RoomEvent::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_helpers() {
        assert_eq!(Effect::updated(), Effect::Broadcast(RoomEvent::Updated));
        assert_ne!(Effect::updated(), Effect::Broadcast(RoomEvent::TimerSync { time_left: 0 }));
    }
}
